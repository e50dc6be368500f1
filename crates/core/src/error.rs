use thiserror::Error;

/// Errors raised while building configuration from the environment.
///
/// All of these are fatal: a service that cannot assemble a valid config
/// must not start in a half-initialized state.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set or is empty")]
    Missing(String),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    pub fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}
