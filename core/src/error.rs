//! Error taxonomy for the payments client.
//!
//! # Design
//! Every failure a call can end with is one `Error` variant, and the variant
//! decides retryability. `Error::is_retryable` is consulted only by the retry
//! loop; the decoder and the transport classify and return. Server-reported
//! failures keep the full structured body in `ApiError` so callers can branch
//! on type, code or individual field errors.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::TransportError;

/// Sub-error reason attached to creates whose idempotency key was already used.
pub const IDEMPOTENT_CREATION_CONFLICT: &str = "idempotent_creation_conflict";

/// Sub-error reason the API uses when a client exceeds its request rate.
pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";

/// Errors returned by `Client` and `Service` calls.
#[derive(Debug, Error)]
pub enum Error {
    /// No complete HTTP response was received.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a structured `error` object.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The response body was not the JSON the client expected.
    #[error("could not decode response (HTTP {status}): {reason}")]
    Decode {
        status: u16,
        reason: String,
        /// Leading part of the raw body, for debugging.
        snippet: String,
    },

    /// A 2xx response decoded, but the expected top-level payload was absent.
    #[error("response is missing the `{key}` payload")]
    MissingResult { key: String },

    /// Request parameters could not be encoded.
    #[error("could not encode request: {0}")]
    Encode(String),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(err) => err.is_retryable(),
            Error::Api(err) => err.is_retryable(),
            Error::Decode { .. }
            | Error::MissingResult { .. }
            | Error::Encode(_)
            | Error::Config(_) => false,
        }
    }

    /// True when the caller's context cancelled the call or ran out of time.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Transport(err) if err.is_cancellation())
    }

    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(err) => Some(err),
            _ => None,
        }
    }
}

/// A structured error reported by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{error_type} error (HTTP {status}): {message}")]
pub struct ApiError {
    /// HTTP status of the response that carried the error.
    #[serde(skip)]
    pub status: u16,
    #[serde(rename = "type", default)]
    pub error_type: ApiErrorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl ApiError {
    /// Rate limiting, gateway failures and internal server errors are
    /// transient. Validation, auth, not-found and conflicts are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self.status, 429 | 502 | 503 | 504)
            || self.error_type == ApiErrorType::Internal
            || self.has_reason(RATE_LIMIT_EXCEEDED)
    }

    pub fn has_reason(&self, reason: &str) -> bool {
        self.errors
            .iter()
            .any(|err| err.reason.as_deref() == Some(reason))
    }

    /// Id of the resource an earlier request with the same idempotency key
    /// already created.
    pub fn conflicting_resource_id(&self) -> Option<&str> {
        self.errors
            .iter()
            .filter(|err| err.reason.as_deref() == Some(IDEMPOTENT_CREATION_CONFLICT))
            .find_map(|err| err.links.get("conflicting_resource_id"))
            .map(String::as_str)
    }
}

/// Category of an API error, as reported in the `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ApiErrorType {
    InvalidApiUsage,
    InvalidState,
    ValidationFailed,
    Internal,
    /// A category this client does not know about.
    Other(String),
    #[default]
    Unknown,
}

impl ApiErrorType {
    pub fn as_str(&self) -> &str {
        match self {
            ApiErrorType::InvalidApiUsage => "invalid_api_usage",
            ApiErrorType::InvalidState => "invalid_state",
            ApiErrorType::ValidationFailed => "validation_failed",
            ApiErrorType::Internal => "internal_error",
            ApiErrorType::Other(other) => other,
            ApiErrorType::Unknown => "unknown",
        }
    }
}

impl From<String> for ApiErrorType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "invalid_api_usage" => ApiErrorType::InvalidApiUsage,
            "invalid_state" => ApiErrorType::InvalidState,
            "validation_failed" => ApiErrorType::ValidationFailed,
            "internal_error" => ApiErrorType::Internal,
            "" | "unknown" => ApiErrorType::Unknown,
            _ => ApiErrorType::Other(value),
        }
    }
}

impl From<ApiErrorType> for String {
    fn from(value: ApiErrorType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ApiErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `code` field, which the API sends either as a number or as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Number(i64),
    Text(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Number(code) => write!(f, "{code}"),
            ErrorCode::Text(code) => f.write_str(code),
        }
    }
}

/// One entry of an API error's `errors` list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_pointer: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub links: HashMap<String, String>,
}
