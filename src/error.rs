//! Error type for the detection service boundary

use serde_json::Value;
use thiserror::Error;

pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
pub const MALFORMED_RESPONSE: &str = "MALFORMED_RESPONSE";
pub const MEDIA_READ_ERROR: &str = "MEDIA_READ_ERROR";

const NETWORK_ERROR_MESSAGE: &str = "Network error - check your connection and server URL.";
const REQUEST_FAILED_MESSAGE: &str = "Request failed";

pub const CONNECT_FAILURE_MESSAGE: &str =
    "Could not connect to the server. Check your network and server URL in Settings.";
pub const UNEXPECTED_FAILURE_MESSAGE: &str = "An unexpected error occurred.";

/// Coarse classification of an [`ApiError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The request never produced a response
    Network,
    /// The service answered with a non-success status
    Server,
    /// The service answered successfully but the body did not match the expected shape
    MalformedResponse,
    Unexpected,
}

/// Every failure of the detection client is reported as an `ApiError`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} (status {status})")]
pub struct ApiError {
    pub message: String,
    pub status: u16,
    pub code: Option<String>,
}

impl ApiError {
    pub fn new(message: impl Into<String>, status: u16, code: Option<String>) -> Self {
        Self {
            message: message.into(),
            status,
            code,
        }
    }

    /// Transport-level failure: DNS, refused connection, timeout, broken body stream
    pub fn network() -> Self {
        Self::new(NETWORK_ERROR_MESSAGE, 0, Some(NETWORK_ERROR.to_string()))
    }

    /// Builds the error for a non-success response from its status and raw body.
    /// An unparsable body is treated as an empty object.
    pub fn from_response_body(status: u16, body: &[u8]) -> Self {
        let body: Value = serde_json::from_slice(body).unwrap_or_else(|_| Value::Object(Default::default()));

        let message = ["detail", "message", "error"]
            .iter()
            .find_map(|field| body.get(*field).and_then(message_text))
            .unwrap_or_else(|| REQUEST_FAILED_MESSAGE.to_string());

        let code = body
            .get("code")
            .and_then(Value::as_str)
            .map(str::to_string);

        Self::new(message, status, code)
    }

    pub fn malformed(status: u16, detail: impl std::fmt::Display) -> Self {
        Self::new(
            format!("Malformed response from detection service: {}", detail),
            status,
            Some(MALFORMED_RESPONSE.to_string()),
        )
    }

    pub fn media_read(uri: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(
            format!("Could not read media at {}: {}", uri, detail),
            0,
            Some(MEDIA_READ_ERROR.to_string()),
        )
    }

    pub fn kind(&self) -> ApiErrorKind {
        match self.code.as_deref() {
            Some(NETWORK_ERROR) => ApiErrorKind::Network,
            Some(MALFORMED_RESPONSE) => ApiErrorKind::MalformedResponse,
            _ if (400..=599).contains(&self.status) => ApiErrorKind::Server,
            _ => ApiErrorKind::Unexpected,
        }
    }

    pub fn is_network(&self) -> bool {
        self.kind() == ApiErrorKind::Network
    }

    /// Text shown to a user when an analysis fails with this error
    pub fn user_message(&self) -> String {
        if self.is_network() {
            CONNECT_FAILURE_MESSAGE.to_string()
        } else {
            self.message.clone()
        }
    }
}

// Empty strings, null, false and zero do not count as a message.
fn message_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}

/// Maps any failure from the analysis path to a user-facing message.
pub fn failure_message(error: &anyhow::Error) -> String {
    match error.downcast_ref::<ApiError>() {
        Some(api_error) => api_error.user_message(),
        None => UNEXPECTED_FAILURE_MESSAGE.to_string(),
    }
}
