//! PostgreSQL executor.
//!
//! Rendered statements are wrapped as
//! `SELECT row_to_json(q)::text FROM (<statement>) AS q` so every column type,
//! NUMERIC and dates included, comes back as JSON with column order intact.
//! Row order is that of the inner statement.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use dynsql_core::{Binds, Executor, ExecutorError, ParamValue, Row};
use sqlx_core::error::Error as SqlxError;
use sqlx_core::pool::PoolOptions;
use sqlx_core::query::Query;
use sqlx_core::row::Row as _;
use sqlx_postgres::{PgArguments, PgConnectOptions, PgPool, Postgres};
use tracing::{debug, info, instrument, warn};

use crate::config::PostgresStorageConfig;

/// Type alias for PostgreSQL pool options.
pub type PgPoolOptions = PoolOptions<Postgres>;

/// Creates a lazily connecting PostgreSQL pool from the given configuration.
///
/// Connections are opened on first use, so the server starts even when the
/// database is down and `/health` reports it.
#[instrument(skip(config), fields(url = %mask_password(&config.connection_url())))]
pub fn create_pool(config: &PostgresStorageConfig) -> Result<PgPool, SqlxError> {
    info!(
        max_connections = config.pool_size,
        acquire_timeout_ms = config.connect_timeout_ms,
        statement_timeout_ms = ?config.statement_timeout_ms,
        "Creating lazy PostgreSQL pool"
    );

    let mut connect = PgConnectOptions::from_str(&config.connection_url())?;
    if let Some(timeout) = config.statement_timeout_ms {
        connect = connect.options([("statement_timeout", timeout.to_string())]);
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(config.connect_timeout())
        .idle_timeout(config.idle_timeout_ms.map(Duration::from_millis))
        .connect_lazy_with(connect);
    Ok(pool)
}

/// Replace the password in a connection URL with `***` for logging.
pub fn mask_password(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, url),
    };
    let masked = match rest.rsplit_once('@') {
        Some((userinfo, host)) => match userinfo.split_once(':') {
            Some((user, _)) => format!("{user}:***@{host}"),
            None => rest.to_string(),
        },
        None => rest.to_string(),
    };
    match scheme {
        Some(scheme) => format!("{scheme}://{masked}"),
        None => masked,
    }
}

/// Wrap a rendered statement so each row comes back as one JSON text value.
fn wrap_statement(sql: &str) -> String {
    let inner = sql.trim_end().trim_end_matches(';').trim_end();
    format!("SELECT row_to_json(q)::text FROM ({inner}) AS q")
}

/// Bind a validated parameter to a sqlx query.
fn bind_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q ParamValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        ParamValue::Integer(i) => query.bind(*i),
        ParamValue::Float(f) => query.bind(*f),
        ParamValue::Text(s) => query.bind(s.as_str()),
        ParamValue::Date(d) => query.bind(*d),
        ParamValue::Boolean(b) => query.bind(*b),
    }
}

fn map_sqlx_error(err: SqlxError) -> ExecutorError {
    match err {
        SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Io(_) | SqlxError::Tls(_) => {
            ExecutorError::Unavailable(err.to_string())
        }
        other => ExecutorError::Database(other.to_string()),
    }
}

/// [`Executor`] backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Executor for PgExecutor {
    async fn fetch_rows(&self, sql: &str, binds: &Binds) -> Result<Vec<Row>, ExecutorError> {
        let statement = wrap_statement(sql);
        let mut query = sqlx_core::query::query(&statement);
        for value in binds.values() {
            query = bind_param(query, value);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            warn!(error = %e, "SQL query execution failed");
            map_sqlx_error(e)
        })?;

        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            let text: Option<String> = row
                .try_get(0)
                .map_err(|e| ExecutorError::Decode(e.to_string()))?;
            let Some(text) = text else {
                continue;
            };
            let decoded: Row =
                serde_json::from_str(&text).map_err(|e| ExecutorError::Decode(e.to_string()))?;
            result.push(decoded);
        }

        debug!(row_count = result.len(), "SQL query executed");
        Ok(result)
    }

    async fn ping(&self) -> Result<(), ExecutorError> {
        sqlx_core::query::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
