//! Logging setup shared by every binary in the workspace.
//!
//! # Environment Variables
//!
//! - `LOG_LEVEL`: default filter directive when `RUST_LOG` is unset (default: info)
//! - `LOG_FORMAT`: `plain`, `compact` or `json` (default: plain)
//! - `LOG_WITH_TARGET`: include the event target in each line (default: true)

use crate::config::load_from_env;
use crate::error::BaseError;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Compact,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_with_target() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            with_target: default_with_target(),
        }
    }
}

pub fn load_tracing_config_from_env() -> Result<LoggingConfig, BaseError> {
    load_from_env("LOG_")
}

fn make_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Logs go to stderr so they never mix with
/// command output on stdout.
///
/// Returns `Ok(false)` when a subscriber was already installed (tests call
/// this repeatedly), `Ok(true)` when this call installed it.
pub fn tracing_init(conf: LoggingConfig) -> Result<bool, BaseError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(make_filter(&conf.level))
        .with_target(conf.with_target)
        .with_writer(std::io::stderr);
    let result = match conf.format {
        LogFormat::Plain => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) => {
            // the only failure mode is an already-set global default
            tracing::debug!("tracing subscriber already installed: {}", e);
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_iter;

    #[test]
    fn test_default_config() {
        let conf = LoggingConfig::default();
        assert_eq!(conf.level, "info");
        assert_eq!(conf.format, LogFormat::Plain);
        assert!(conf.with_target);
    }

    #[test]
    fn test_config_from_vars() {
        let vars = vec![
            ("LOG_LEVEL".to_string(), "debug,hyper=warn".to_string()),
            ("LOG_FORMAT".to_string(), "json".to_string()),
            ("LOG_WITH_TARGET".to_string(), "false".to_string()),
        ];
        let conf: LoggingConfig = load_from_iter("LOG_", vars).unwrap();
        assert_eq!(conf.level, "debug,hyper=warn");
        assert_eq!(conf.format, LogFormat::Json);
        assert!(!conf.with_target);
    }

    #[test]
    fn test_init_twice_is_noop() {
        // another test in this binary may have installed it first
        let _ = tracing_init(LoggingConfig::default()).unwrap();
        let second = tracing_init(LoggingConfig::default()).unwrap();
        assert!(!second);
    }
}
