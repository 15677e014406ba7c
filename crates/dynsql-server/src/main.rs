use std::{env, fmt, process::ExitCode};

use dynsql_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use dynsql_server::{ServerBuilder, observability};

/// Where the config file path came from.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    Flag,
    Env,
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Flag => "--config",
            Self::Env => "DYNSQL_CONFIG",
            Self::Default => "default",
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional
    match dotenvy::dotenv() {
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => eprintln!("Warning: ignoring .env: {e}"),
        Ok(_) => {}
    }

    observability::init_tracing();

    let (path, source) = config_path(env::args().skip(1), env::var("DYNSQL_CONFIG").ok());
    let cfg = match load_config(Some(&path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error ({path}): {e}");
            return ExitCode::from(2);
        }
    };
    tracing::info!(path = %path, source = %source, "Configuration loaded");
    observability::apply_logging_level(&cfg.logging.level);

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Server initialization failed");
            return ExitCode::from(2);
        }
    };

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server stopped with an error");
            ExitCode::FAILURE
        }
    }
}

/// `--config <path>` first, then `DYNSQL_CONFIG`, then `dynsql.toml`.
fn config_path(
    mut args: impl Iterator<Item = String>,
    env_path: Option<String>,
) -> (String, ConfigSource) {
    while let Some(arg) = args.next() {
        if let Some(path) = arg.strip_prefix("--config=") {
            return (path.to_string(), ConfigSource::Flag);
        }
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::Flag);
        }
    }

    match env_path {
        Some(path) if !path.trim().is_empty() => (path, ConfigSource::Env),
        _ => (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default),
    }
}
