use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{Request, Response, StatusCode};
use axum::routing::{get, post};
use dynsql_core::{
    Executor, ExternalDefinitions, QueryService, RenderCache, TemplateRegistry,
    load_definitions_file,
};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{Span, error, info, warn};

use crate::config::AppConfig;
use crate::executor::{PgExecutor, create_pool};
use crate::handlers;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<QueryService>,
    pub executor: Arc<dyn Executor>,
    /// Definitions file re-read by `POST /api/templates/reload`.
    pub templates_path: Option<PathBuf>,
}

fn request_span(req: &Request<Body>) -> Span {
    tracing::info_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path(),
        status = tracing::field::Empty,
    )
}

fn record_response(status: StatusCode, latency: Duration, span: &Span) {
    let status = status.as_u16();
    span.record("status", status);
    info!(status, latency_ms = latency.as_millis() as u64, "response");
}

pub fn build_app(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/query", post(handlers::query))
        .route("/api/templates", get(handlers::list_templates))
        .route("/api/templates/reload", post(handlers::reload_templates))
        .route("/api/sample/{biz_type}", get(handlers::sample))
        .route("/api/cache/stats", get(handlers::cache_stats))
        .route("/api/cache/clear", post(handlers::clear_cache))
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(request_span)
                        .on_request(())
                        .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                            record_response(res.status(), latency, span)
                        }),
                )
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
}

/// Query service with the built-in templates plus the configured definitions
/// file. A file that cannot be read is logged and only built-ins are served.
pub fn build_service(cfg: &AppConfig) -> QueryService {
    let cache = if cfg.cache.enabled {
        RenderCache::new()
    } else {
        info!("Render cache disabled by configuration");
        RenderCache::disabled()
    };

    let external = cfg
        .templates
        .path
        .as_deref()
        .map(|path| {
            load_definitions_file(path).unwrap_or_else(|e| {
                error!(error = %e, "Ignoring template definitions file");
                ExternalDefinitions::new()
            })
        })
        .unwrap_or_default();

    let service = QueryService::new(TemplateRegistry::builtin(), cache);
    service.reload_templates(external);
    service
}

pub struct DynsqlServer {
    addr: SocketAddr,
    app: Router,
}

/// Assembles a [`DynsqlServer`] from config, optionally with a caller
/// supplied executor in place of PostgreSQL.
#[derive(Default)]
pub struct ServerBuilder {
    config: AppConfig,
    addr: Option<SocketAddr>,
    executor: Option<Arc<dyn Executor>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(self, config: AppConfig) -> Self {
        Self { config, ..self }
    }

    /// Listen on `addr` instead of `server.host:server.port`.
    pub fn with_addr(self, addr: SocketAddr) -> Self {
        Self {
            addr: Some(addr),
            ..self
        }
    }

    pub fn with_executor(self, executor: Arc<dyn Executor>) -> Self {
        Self {
            executor: Some(executor),
            ..self
        }
    }

    pub async fn build(self) -> anyhow::Result<DynsqlServer> {
        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(connect_postgres(&self.config).await?),
        };

        let state = AppState {
            service: Arc::new(build_service(&self.config)),
            executor,
            templates_path: self.config.templates.path.as_ref().map(PathBuf::from),
        };

        Ok(DynsqlServer {
            addr: self.addr.unwrap_or_else(|| self.config.addr()),
            app: build_app(state, self.config.server.body_limit_bytes),
        })
    }
}

/// Pool connects lazily: an unreachable database is only a warning here and
/// shows up on `/health`.
async fn connect_postgres(config: &AppConfig) -> anyhow::Result<PgExecutor> {
    let pg = config
        .storage
        .postgres
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("missing [storage.postgres] configuration"))?;
    let executor = PgExecutor::new(create_pool(pg)?);
    match executor.ping().await {
        Ok(()) => info!("Database reachable"),
        Err(e) => warn!(error = %e, "Database unreachable at startup, continuing"),
    }
    Ok(executor)
}

impl DynsqlServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "dynsql listening");
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("dynsql stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received, draining connections");
}
