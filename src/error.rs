//! Error types for the gateway.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Schema transform error: {message}")]
    SchemaTransform { message: String },

    #[error("Malformed upstream delta: {message}")]
    MalformedDelta { message: String },

    #[error("Upstream error ({kind}): {message}")]
    UpstreamProtocol { kind: String, message: String },

    #[error("Upstream stream ended without a terminal event: {message}")]
    IncompleteStream { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn schema_transform(msg: impl Into<String>) -> Self {
        Self::SchemaTransform {
            message: msg.into(),
        }
    }

    pub fn malformed_delta(msg: impl Into<String>) -> Self {
        Self::MalformedDelta {
            message: msg.into(),
        }
    }

    pub fn upstream(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::UpstreamProtocol {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    pub fn incomplete_stream(msg: impl Into<String>) -> Self {
        Self::IncompleteStream {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Anthropic error-type slug used when this error reaches the wire, either as a
    /// JSON error body or a terminal `error` SSE event.
    pub fn error_type(&self) -> &str {
        match self {
            Self::Validation { .. } | Self::SchemaTransform { .. } => "invalid_request_error",
            Self::IncompleteStream { .. } => "incomplete_stream_error",
            Self::UpstreamProtocol { kind, .. } => kind,
            _ => "api_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_slugs() {
        assert_eq!(
            GatewayError::validation("no model").error_type(),
            "invalid_request_error"
        );
        assert_eq!(
            GatewayError::schema_transform("not an object").error_type(),
            "invalid_request_error"
        );
        assert_eq!(
            GatewayError::incomplete_stream("ended early").error_type(),
            "incomplete_stream_error"
        );
        assert_eq!(
            GatewayError::upstream("overloaded_error", "busy").error_type(),
            "overloaded_error"
        );
        assert_eq!(GatewayError::backend("boom").error_type(), "api_error");
    }
}
