//! Error taxonomy for provider calls.

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SDKError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl SDKError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) => true,
            Self::Configuration(_) | Self::InvalidResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for SDKError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::Http {
                status: status.as_u16(),
                body: error.to_string(),
            };
        }
        Self::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        assert!(
            SDKError::Http {
                status: 429,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            SDKError::Http {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !SDKError::Http {
                status: 401,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!SDKError::Configuration(ConfigurationError::new("x")).is_retryable());
    }
}
