//! Dynamic GROUP BY / ORDER BY clause building.
//!
//! Column lists cannot be bind parameters, so this is the only place where
//! caller text becomes SQL text. Every field must pass the identifier policy
//! below; anything else is rejected before rendering.

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// `column` or `table.column`.
static IDENTIFIER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("Invalid identifier regex")
});

const MAX_IDENTIFIER_LEN: usize = 128;

/// Statement-level keywords that may not be used as a field or field part.
const RESERVED_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "alter", "create", "truncate", "grant",
    "revoke", "union", "intersect", "except", "exec", "execute", "merge", "call", "into", "from",
    "where", "having", "limit", "offset",
];

/// The only function form accepted as a sort field.
const COUNT_STAR: &str = "count(*)";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClauseError {
    #[error("Invalid group field: '{0}'")]
    InvalidGroupField(String),

    #[error("Invalid sort field: '{0}'")]
    InvalidSortField(String),

    #[error("Invalid sort direction '{direction}' for field '{field}'")]
    InvalidSortDirection { field: String, direction: String },
}

impl ClauseError {
    /// The rejected token.
    pub fn token(&self) -> &str {
        match self {
            Self::InvalidGroupField(field) | Self::InvalidSortField(field) => field,
            Self::InvalidSortDirection { direction, .. } => direction,
        }
    }
}

fn is_safe_identifier(field: &str) -> bool {
    field.len() <= MAX_IDENTIFIER_LEN
        && IDENTIFIER_REGEX.is_match(field)
        && field
            .split('.')
            .all(|part| !RESERVED_KEYWORDS.iter().any(|kw| part.eq_ignore_ascii_case(kw)))
}

// ============================================================================
// GROUP BY
// ============================================================================

/// Validated GROUP BY field list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupClause {
    fields: Vec<String>,
}

impl GroupClause {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Fields sorted and de-duplicated, for fingerprinting.
    pub fn canonical_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self.fields.iter().map(String::as_str).collect();
        fields.sort_unstable();
        fields.dedup();
        fields
    }

    pub fn to_sql(&self) -> String {
        format!("GROUP BY {}", self.fields.join(", "))
    }
}

impl fmt::Display for GroupClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// Build a GROUP BY clause from a comma separated field list.
///
/// Absent or blank input yields `None`. Duplicate fields keep their first
/// position.
pub fn build_group_clause(csv: Option<&str>) -> Result<Option<GroupClause>, ClauseError> {
    let Some(csv) = csv.filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };

    let mut fields: Vec<String> = Vec::new();
    for raw in csv.split(',') {
        let field = raw.trim();
        if !is_safe_identifier(field) {
            return Err(ClauseError::InvalidGroupField(field.to_string()));
        }
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
        }
    }

    Ok(Some(GroupClause { fields }))
}

// ============================================================================
// ORDER BY
// ============================================================================

/// Sort order for query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(Self::Asc),
            "desc" | "descending" => Some(Self::Desc),
            _ => None,
        }
    }
}

/// One requested sort entry, as supplied by the caller.
///
/// Both members stay untyped JSON so a number or object in either position is
/// reported as a bad sort token rather than a malformed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortParam {
    pub sort_param: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_type: Option<Value>,
}

impl SortParam {
    pub fn new(field: impl Into<String>, direction: Option<&str>) -> Self {
        Self {
            sort_param: Value::String(field.into()),
            sort_type: direction.map(|d| Value::String(d.to_string())),
        }
    }
}

/// Text of a caller token; non-strings are rendered as JSON for the error.
fn token_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

/// Validated ORDER BY entries, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortClause {
    entries: Vec<(String, SortDirection)>,
}

impl SortClause {
    pub fn entries(&self) -> &[(String, SortDirection)] {
        &self.entries
    }

    pub fn to_sql(&self) -> String {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(field, dir)| format!("{field} {}", dir.as_sql()))
            .collect();
        format!("ORDER BY {}", parts.join(", "))
    }
}

impl fmt::Display for SortClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// Build an ORDER BY clause. An empty list yields `None`.
pub fn build_sort_clause(params: &[SortParam]) -> Result<Option<SortClause>, ClauseError> {
    if params.is_empty() {
        return Ok(None);
    }

    let mut entries = Vec::with_capacity(params.len());
    for param in params {
        let Value::String(raw) = &param.sort_param else {
            return Err(ClauseError::InvalidSortField(
                token_text(&param.sort_param).into_owned(),
            ));
        };
        let raw = raw.trim();
        let field = if raw.eq_ignore_ascii_case(COUNT_STAR) {
            "COUNT(*)".to_string()
        } else if is_safe_identifier(raw) {
            raw.to_string()
        } else {
            return Err(ClauseError::InvalidSortField(raw.to_string()));
        };

        let direction = match &param.sort_type {
            None => Some(SortDirection::Asc),
            Some(Value::String(d)) => SortDirection::parse(d),
            Some(_) => None,
        }
        .ok_or_else(|| ClauseError::InvalidSortDirection {
            field: raw.to_string(),
            direction: param
                .sort_type
                .as_ref()
                .map(|d| token_text(d).into_owned())
                .unwrap_or_default(),
        })?;

        entries.push((field, direction));
    }

    Ok(Some(SortClause { entries }))
}
