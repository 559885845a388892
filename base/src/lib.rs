//! Shared ambient pieces for the hitlflow workspace: env-driven configuration
//! loading, logging setup and the base error type.

pub mod config;
pub mod error;
pub mod logging;

pub use config::load_from_env;
pub use error::BaseError;
pub use logging::{tracing_init, LogFormat, LoggingConfig};

pub static APP_NAME: &str = "hitlflow";

/// Crate version reported in the default user agent.
pub static APP_VERSION: &str = env!("CARGO_PKG_VERSION");
