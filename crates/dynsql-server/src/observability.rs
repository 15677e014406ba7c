//! Log setup. The filter sits behind a reload layer so the level from the
//! config file can replace the startup default once config is loaded.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Level used before the config file has been read.
pub const STARTUP_LEVEL: &str = "info";

/// Filter directives for `level`. sqlx logs every statement at `info`, so it
/// is held at `warn` unless tracing is turned all the way up.
fn directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "off" => level,
        _ => format!("{level},sqlx=warn"),
    }
}

fn explicit_env_filter() -> Option<EnvFilter> {
    std::env::var_os("RUST_LOG")?;
    EnvFilter::try_from_default_env().ok()
}

/// Install the global subscriber. `RUST_LOG`, when set and valid, wins over
/// the startup level.
pub fn init_tracing() {
    let filter = explicit_env_filter().unwrap_or_else(|| EnvFilter::new(directives(STARTUP_LEVEL)));
    let (filter, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok();
    if installed {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Switch to the configured `logging.level`. No-op when `RUST_LOG` is set or
/// tracing was not initialised here.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return;
    };
    if let Err(e) = handle.reload(EnvFilter::new(directives(level))) {
        tracing::warn!(error = %e, level, "Failed to apply logging level");
        return;
    }
    tracing::debug!(level, "Logging level applied");
}
