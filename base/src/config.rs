//! Env-driven configuration loading.
//!
//! Every config struct in the workspace is a plain `Deserialize` type read with
//! `envy` under a fixed prefix (`HITLFLOW_`, `LOG_`, ...).

use crate::error::BaseError;
use serde::de::DeserializeOwned;

/// Load `T` from environment variables starting with `prefix`.
///
/// Missing variables fall back to the field defaults declared with
/// `#[serde(default)]`; malformed values are reported as [`BaseError::Config`].
pub fn load_from_env<T: DeserializeOwned>(prefix: &str) -> Result<T, BaseError> {
    envy::prefixed(prefix).from_env::<T>().map_err(|e| {
        BaseError::Config(format!("cannot load config with prefix {prefix}: {e}"))
    })
}

/// Same as [`load_from_env`] but reading from an explicit key/value list.
pub fn load_from_iter<T, I>(prefix: &str, vars: I) -> Result<T, BaseError>
where
    T: DeserializeOwned,
    I: IntoIterator<Item = (String, String)>,
{
    envy::prefixed(prefix)
        .from_iter::<_, T>(vars)
        .map_err(|e| BaseError::Config(format!("cannot load config with prefix {prefix}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default = "default_port")]
        port: u16,
        name: Option<String>,
    }

    fn default_port() -> u16 {
        8000
    }

    #[test]
    fn test_load_with_defaults() {
        let conf: Sample = load_from_iter("SAMPLE_", Vec::new()).unwrap();
        assert_eq!(
            conf,
            Sample {
                port: 8000,
                name: None
            }
        );
    }

    #[test]
    fn test_load_prefixed_values() {
        let vars = vec![
            ("SAMPLE_PORT".to_string(), "9001".to_string()),
            ("SAMPLE_NAME".to_string(), "local".to_string()),
            ("OTHER_PORT".to_string(), "1".to_string()),
        ];
        let conf: Sample = load_from_iter("SAMPLE_", vars).unwrap();
        assert_eq!(conf.port, 9001);
        assert_eq!(conf.name.as_deref(), Some("local"));
    }

    #[test]
    fn test_load_invalid_value() {
        let vars = vec![("SAMPLE_PORT".to_string(), "not-a-port".to_string())];
        let err = load_from_iter::<Sample, _>("SAMPLE_", vars).unwrap_err();
        assert!(matches!(err, BaseError::Config(_)));
        assert!(err.to_string().contains("SAMPLE_"));
    }
}
