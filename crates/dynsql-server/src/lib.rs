pub mod config;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod observability;
pub mod server;

pub use config::AppConfig;
pub use error::ApiError;
pub use executor::PgExecutor;
pub use server::{AppState, DynsqlServer, ServerBuilder, build_app, build_service};
