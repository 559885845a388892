use thiserror::Error;

#[derive(Debug, Error)]
pub enum BaseError {
    #[error("ConfigError({0})")]
    Config(String),
}
