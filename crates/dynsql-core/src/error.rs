use thiserror::Error;

use crate::clause::ClauseError;
use crate::executor::ExecutorError;
use crate::params::ParamError;
use crate::template::TemplateError;

/// Errors returned by [`crate::QueryService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unknown business type: {0}")]
    UnknownBizType(String),

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Clause(#[from] ClauseError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Query execution failed: {0}")]
    Execution(#[from] ExecutorError),
}

impl ServiceError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownBizType(_) => "UNKNOWN_BIZ_TYPE",
            Self::Param(ParamError::Missing { .. }) => "MISSING_PARAMETER",
            Self::Param(ParamError::InvalidType { .. }) => "INVALID_PARAMETER_TYPE",
            Self::Clause(ClauseError::InvalidGroupField(_)) => "INVALID_GROUP_FIELD",
            Self::Clause(_) => "INVALID_SORT_TYPE",
            Self::Template(_) => "TEMPLATE_SYNTAX_ERROR",
            Self::Execution(_) => "EXECUTION_ERROR",
        }
    }

    /// Whether the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Template(_) | Self::Execution(_))
    }
}
