//! Server configuration.
//!
//! Every section falls back to its defaults, so an empty file (or no file at
//! all) yields a runnable config pointing at a local PostgreSQL.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    /// External business-type definitions.
    pub templates: TemplatesConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Check the merged config. All problems are reported together,
    /// separated by `; `.
    pub fn validate(&self) -> Result<(), String> {
        let mut problems: Vec<String> = Vec::new();

        if self.server.host.parse::<IpAddr>().is_err() {
            problems.push(format!(
                "server.host must be an IP address, got '{}'",
                self.server.host
            ));
        }
        if self.server.port == 0 {
            problems.push("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            problems.push("server.body_limit_bytes must be > 0".into());
        }

        match &self.storage.postgres {
            None => problems.push("storage.postgres section is required".into()),
            Some(pg) => problems.extend(pg.problems()),
        }

        if self
            .templates
            .path
            .as_deref()
            .is_some_and(|p| p.trim().is_empty())
        {
            problems.push("templates.path must not be empty when set".into());
        }

        let level = self.logging.level.trim().to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            problems.push(format!(
                "logging.level '{}' is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    /// Listen address. Call after [`validate`](Self::validate); an
    /// unparsable host falls back to all interfaces.
    pub fn addr(&self) -> SocketAddr {
        let ip = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        SocketAddr::new(ip, self.server.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body.
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            body_limit_bytes: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub postgres: Option<PostgresStorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            postgres: Some(PostgresStorageConfig::default()),
        }
    }
}

/// PostgreSQL connection and pool settings.
///
/// `url` takes precedence; without it the URL is assembled from `host`,
/// `port`, `user`, `password` and `database`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresStorageConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    /// Maximum pool connections.
    pub pool_size: u32,
    /// How long to wait for a pooled connection.
    pub connect_timeout_ms: u64,
    pub idle_timeout_ms: Option<u64>,
    /// `statement_timeout` set on every connection.
    pub statement_timeout_ms: Option<u64>,
}

impl Default for PostgresStorageConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: None,
            database: "dynsql".into(),
            pool_size: 10,
            connect_timeout_ms: 5_000,
            idle_timeout_ms: Some(300_000),
            statement_timeout_ms: Some(30_000),
        }
    }
}

impl PostgresStorageConfig {
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let credentials = match &self.password {
            Some(password) => format!("{}:{password}", self.user),
            None => self.user.clone(),
        };
        format!(
            "postgres://{credentials}@{}:{}/{}",
            self.host, self.port, self.database
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.url.as_deref().is_some_and(|u| u.trim().is_empty()) {
            problems.push("storage.postgres.url must not be empty when set".into());
        }
        if self.url.is_none() {
            if self.host.trim().is_empty() {
                problems.push("storage.postgres needs either 'url' or 'host'".into());
            }
            if self.database.trim().is_empty() {
                problems.push("storage.postgres.database must not be empty".into());
            }
        }
        if self.pool_size == 0 {
            problems.push("storage.postgres.pool_size must be > 0".into());
        }
        if self.statement_timeout_ms == Some(0) {
            problems.push("storage.postgres.statement_timeout_ms must be > 0 when set".into());
        }
        problems
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    /// JSON file of business-type definitions, merged over the built-ins.
    /// A missing file is not an error.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

pub mod loader {
    use std::path::Path;

    use config::{Config, Environment, File, FileFormat};

    use super::AppConfig;

    pub const DEFAULT_CONFIG_PATH: &str = "dynsql.toml";

    /// Environment prefix; `DYNSQL__SERVER__PORT=8080` sets `server.port`.
    pub const ENV_PREFIX: &str = "DYNSQL";

    /// Load `path` (default [`DEFAULT_CONFIG_PATH`]) if it exists, overlay
    /// `DYNSQL__*` variables and validate the result.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

        let mut builder = Config::builder();
        if Path::new(path).exists() {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }
        let cfg: AppConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| format!("{path}: {e}"))?;

        cfg.validate()?;
        Ok(cfg)
    }
}
