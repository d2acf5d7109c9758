use crate::session::AuthFailure;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Route the UI sends the user to after an auth-class failure
pub const LOGIN_ROUTE: &str = "/login";

pub const NETWORK_ERROR_MESSAGE: &str = "Network error. Please check your connection.";
pub const UPLOAD_NETWORK_ERROR_MESSAGE: &str = "Network error during upload";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Session expired. Please log in again.")]
    Expired,

    #[error("{message}")]
    Unauthorized { message: String },

    #[error("{message}")]
    Http {
        status: u16,
        status_text: String,
        message: String,
    },

    #[error("{0}")]
    Network(String),

    #[error("Upload cancelled")]
    Aborted,

    #[error("Invalid response format")]
    InvalidResponse(#[source] serde_json::Error),

    #[error("Failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to read upload file: {0}")]
    File(#[from] std::io::Error),
}

impl ApiError {
    /// HTTP status, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn auth_failure(&self) -> Option<AuthFailure> {
        match self {
            Self::Unauthenticated => Some(AuthFailure::Unauthenticated),
            Self::Expired => Some(AuthFailure::Expired),
            Self::Unauthorized { .. } => Some(AuthFailure::Unauthorized),
            _ => None,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        self.auth_failure().is_some()
    }

    /// Where the caller should send the user, if anywhere
    pub fn redirect_to(&self) -> Option<&'static str> {
        self.auth_failure().map(|_| LOGIN_ROUTE)
    }
}

impl From<AuthFailure> for ApiError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::Unauthenticated => Self::Unauthenticated,
            AuthFailure::Expired => Self::Expired,
            AuthFailure::Unauthorized => Self::Unauthorized {
                message: "Unauthorized".to_string(),
            },
        }
    }
}

/// Error payload returned by the API.
///
/// `detail` wins over `message`. FastAPI validation errors put a list of
/// `{loc, msg, type}` objects under `detail`.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// `None` when the body is not a JSON object
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }

    pub fn message(&self) -> Option<String> {
        self.detail_message()
            .or_else(|| self.message.clone().filter(|m| !m.is_empty()))
    }

    fn detail_message(&self) -> Option<String> {
        match self.detail.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Array(items) => {
                let parts: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(Value::as_str))
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("; "))
                }
            }
            _ => None,
        }
    }
}

/// Message for a failed response: body message if any, else status text
pub fn error_message(body: &[u8], status_text: &str) -> String {
    ErrorBody::parse(body)
        .and_then(|b| b.message())
        .unwrap_or_else(|| status_text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_takes_precedence() {
        let body = br#"{"detail": "X", "message": "Y"}"#;
        assert_eq!(error_message(body, "Bad Request"), "X");
    }

    #[test]
    fn test_message_fallback() {
        let body = br#"{"message": "Y"}"#;
        assert_eq!(error_message(body, "Bad Request"), "Y");
    }

    #[test]
    fn test_status_text_fallback() {
        assert_eq!(error_message(b"", "Not Found"), "Not Found");
        assert_eq!(error_message(b"<html>oops</html>", "Bad Gateway"), "Bad Gateway");
        assert_eq!(error_message(b"{}", "Not Found"), "Not Found");
        assert_eq!(error_message(br#"{"detail": ""}"#, "Conflict"), "Conflict");
    }

    #[test]
    fn test_validation_detail_list() {
        let body = br#"{"detail": [
            {"loc": ["body", "username"], "msg": "field required", "type": "value_error.missing"},
            {"loc": ["body", "password"], "msg": "too short", "type": "value_error"}
        ]}"#;
        assert_eq!(
            error_message(body, "Unprocessable Entity"),
            "field required; too short"
        );
    }

    #[test]
    fn test_redirect_only_for_auth_failures() {
        assert_eq!(ApiError::Unauthenticated.redirect_to(), Some(LOGIN_ROUTE));
        assert_eq!(ApiError::Expired.redirect_to(), Some(LOGIN_ROUTE));
        let unauthorized = ApiError::Unauthorized {
            message: "revoked".to_string(),
        };
        assert_eq!(unauthorized.redirect_to(), Some(LOGIN_ROUTE));
        assert_eq!(unauthorized.status(), Some(401));

        let http = ApiError::Http {
            status: 413,
            status_text: "Payload Too Large".to_string(),
            message: "File too big".to_string(),
        };
        assert_eq!(http.redirect_to(), None);
        assert_eq!(http.status(), Some(413));
        assert_eq!(http.to_string(), "File too big");

        assert_eq!(ApiError::Network(NETWORK_ERROR_MESSAGE.to_string()).redirect_to(), None);
    }
}
