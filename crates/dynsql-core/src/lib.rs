//! Templated SQL rendering for business queries.
//!
//! A business type names a SQL template. Callers supply parameters and,
//! optionally, GROUP BY / ORDER BY field lists; the engine validates them,
//! renders parameterized PostgreSQL SQL, caches the result and hands it to an
//! [`Executor`].

pub mod builtin;
pub mod cache;
pub mod clause;
pub mod error;
pub mod executor;
pub mod params;
pub mod registry;
pub mod render;
pub mod service;
pub mod template;

pub use cache::{CacheLookup, CacheStats, Fingerprint, RenderCache};
pub use clause::{
    ClauseError, GroupClause, SortClause, SortDirection, SortParam, build_group_clause,
    build_sort_clause,
};
pub use error::ServiceError;
pub use executor::{Executor, ExecutorError, Row};
pub use params::{ParamError, ParamType, ParamValue, ValidatedParams};
pub use registry::{
    DefinitionsError, ExternalDefinitions, LoadReport, SampleRequest, TemplateRegistry,
    load_definitions_file,
};
pub use render::{Binds, RenderResult};
pub use service::{PreparedQuery, QueryResponse, QueryService, RenderRequest};
pub use template::{Template, TemplateDefinition, TemplateError};
