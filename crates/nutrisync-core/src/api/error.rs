use thiserror::Error;

/// Why a request produced no usable response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    Connect,
    /// Connection dropped or the body could not be read.
    Other,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Unauthorized - please sign in again")]
    AuthRequired { message: Option<String> },

    #[error("Resource not found")]
    NotFound,

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Request rejected ({status}): {message}")]
    ClientError { status: u16, message: String },

    #[error("Network error: {message}")]
    Transport { kind: TransportKind, message: String },

    #[error("Invalid response: {0}")]
    Decode(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// The `error` field of a JSON error body, if there is one.
    fn server_message(body: &str) -> Option<String> {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()?
            .get("error")?
            .as_str()
            .map(str::to_string)
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let server_message = Self::server_message(body);
        let message = || server_message.clone().unwrap_or_else(|| Self::truncate_body(body));
        match status.as_u16() {
            401 => ApiError::AuthRequired {
                message: server_message.clone(),
            },
            404 => ApiError::NotFound,
            500..=599 => ApiError::ServerError {
                status: status.as_u16(),
                message: message(),
            },
            code => ApiError::ClientError {
                status: code,
                message: message(),
            },
        }
    }

    pub fn from_transport(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_connect() {
            TransportKind::Connect
        } else {
            TransportKind::Other
        };
        ApiError::Transport {
            kind,
            message: err.to_string(),
        }
    }

    /// Whether a caller with a retry policy may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::ServerError { .. } | ApiError::Transport { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ApiError::Transport {
                kind: TransportKind::Timeout,
                ..
            }
        )
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::AuthRequired { message: Some(m) } => m.clone(),
            ApiError::AuthRequired { message: None } => {
                "Your session has expired. Please sign in again.".to_string()
            }
            ApiError::NotFound => "Not found".to_string(),
            ApiError::ServerError { .. } => {
                "Server temporarily unavailable. Please try again later.".to_string()
            }
            ApiError::ClientError { message, .. } => message.clone(),
            ApiError::Transport {
                kind: TransportKind::Timeout,
                ..
            } => "Connection timed out. Please try again.".to_string(),
            ApiError::Transport { .. } => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            ApiError::Decode(_) => "Received an unexpected response from the server".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_classification() {
        assert_eq!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, r#"{"error":"Invalid credentials"}"#),
            ApiError::AuthRequired {
                message: Some("Invalid credentials".to_string())
            }
        );
        assert_eq!(ApiError::from_status(StatusCode::NOT_FOUND, ""), ApiError::NotFound);
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>"),
            ApiError::ServerError { status: 502, .. }
        ));
        assert_eq!(
            ApiError::from_status(StatusCode::CONFLICT, r#"{"error":"Email already registered"}"#),
            ApiError::ClientError {
                status: 409,
                message: "Email already registered".to_string()
            }
        );
    }

    #[test]
    fn test_client_error_without_json_keeps_body() {
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, "plain text");
        assert_eq!(err.user_message(), "plain text");
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 100);
        match ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            ApiError::ServerError { message, .. } => {
                assert!(message.contains("truncated"));
                assert!(message.len() < body.len());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_retryable_errors() {
        let timeout = ApiError::Transport {
            kind: TransportKind::Timeout,
            message: "timed out".to_string(),
        };
        let dropped = ApiError::Transport {
            kind: TransportKind::Other,
            message: "connection reset".to_string(),
        };
        assert!(timeout.is_retryable());
        assert!(timeout.is_timeout());
        assert!(dropped.is_retryable());
        assert!(!dropped.is_timeout());
        assert!(ApiError::ServerError {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!ApiError::NotFound.is_retryable());
        assert!(!ApiError::Decode("bad".to_string()).is_retryable());
        assert!(!ApiError::AuthRequired { message: None }.is_retryable());
    }
}
