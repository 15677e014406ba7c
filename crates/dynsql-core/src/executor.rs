//! The seam between rendering and the database.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

use crate::render::Binds;

/// One result row; column order is preserved.
pub type Row = IndexMap<String, Value>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Failed to decode row: {0}")]
    Decode(String),

    #[error("Database unavailable: {0}")]
    Unavailable(String),
}

/// Runs rendered SQL against a store.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute `sql`, binding `binds` to `$1..$n` in order.
    async fn fetch_rows(&self, sql: &str, binds: &Binds) -> Result<Vec<Row>, ExecutorError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), ExecutorError>;
}
