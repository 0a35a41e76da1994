//! Error types
//!
//! `ConfigError` is raised while building a client configuration and never
//! reaches an envelope. `StorageError` covers every runtime failure and knows
//! its fault category, provider code and the envelope status derived from
//! them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::multipart::UploadState;

/// Provider error codes that indicate a problem with the request itself
/// (malformed, unauthenticated or badly signed) rather than a provider-side
/// rejection. Retrying these does not help.
const CLIENT_FAULT_CODES: &[&str] = &[
    "AccessDenied",
    "AuthorizationHeaderMalformed",
    "AuthorizationQueryParametersError",
    "ExpiredToken",
    "InvalidAccessKeyId",
    "InvalidArgument",
    "InvalidBucketName",
    "InvalidDigest",
    "InvalidRequest",
    "InvalidURI",
    "MalformedXML",
    "MissingContentLength",
    "RequestTimeTooSkewed",
    "SignatureDoesNotMatch",
    "TokenRefreshRequired",
];

/// Fault category of a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Malformed request, local validation, auth or signing failure
    Client,
    /// Provider-side rejection (quota, not found, conflict, ...)
    Server,
    /// Network failure or timeout
    Transport,
}

/// Configuration errors, raised by `ClientSettings::build`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid config: {0} must not be empty")]
    Missing(&'static str),

    #[error("invalid config: {0} must be positive")]
    NonPositive(&'static str),

    #[error("invalid config: endpoint {0:?} must start with http:// or https://")]
    InvalidEndpoint(String),
}

/// Runtime storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("client error: {code}: {message}")]
    Client {
        code: String,
        message: String,
        /// HTTP status when the provider rejected the request
        status: Option<u16>,
    },

    #[error("server error: {code} ({status}): {message}")]
    Server {
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid encoded payload: {0}")]
    InvalidEncoding(String),

    #[error("part {part_number} failed after {attempts} attempt(s): {source}")]
    PartUploadFailed {
        part_number: u32,
        attempts: u32,
        #[source]
        source: Box<StorageError>,
    },

    #[error("incomplete upload: {received} of {expected} parts received, missing {missing:?}")]
    IncompleteUpload {
        expected: u32,
        received: u32,
        missing: Vec<u32>,
    },

    #[error("cannot {operation} an upload in state {state}")]
    InvalidState {
        operation: &'static str,
        state: UploadState,
    },

    #[error("upload {upload_id} was cancelled")]
    Cancelled { upload_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Local validation failure
    pub fn client(code: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::Client {
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Classify a provider error response by its error code
    pub fn from_provider(
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    ) -> Self {
        if CLIENT_FAULT_CODES.contains(&code.as_str()) {
            StorageError::Client {
                code,
                message,
                status: Some(status),
            }
        } else {
            StorageError::Server {
                status,
                code,
                message,
                request_id,
            }
        }
    }

    /// Fault category
    pub fn kind(&self) -> FaultKind {
        match self {
            StorageError::Server { .. } => FaultKind::Server,
            StorageError::Transport(_) => FaultKind::Transport,
            StorageError::PartUploadFailed { source, .. } => source.kind(),
            _ => FaultKind::Client,
        }
    }

    /// Provider error code, or a local code for failures raised by this crate
    pub fn code(&self) -> &str {
        match self {
            StorageError::Client { code, .. } | StorageError::Server { code, .. } => code,
            StorageError::Transport(_) => "TransportError",
            StorageError::InvalidEncoding(_) => "InvalidEncoding",
            StorageError::PartUploadFailed { .. } => "PartUploadFailed",
            StorageError::IncompleteUpload { .. } => "IncompleteUpload",
            StorageError::InvalidState { .. } => "InvalidState",
            StorageError::Cancelled { .. } => "UploadCancelled",
            StorageError::Io(_) => "LocalIoError",
        }
    }

    /// Envelope status derived from the error
    pub fn status_code(&self) -> u16 {
        match self {
            StorageError::Client { status, .. } => status.unwrap_or(400),
            StorageError::Server { status, .. } => *status,
            StorageError::Transport(_) => 503,
            StorageError::InvalidEncoding(_) => 400,
            StorageError::PartUploadFailed { source, .. } => source.status_code(),
            StorageError::IncompleteUpload { .. }
            | StorageError::InvalidState { .. }
            | StorageError::Cancelled { .. } => 409,
            StorageError::Io(err) if err.kind() == std::io::ErrorKind::NotFound => 404,
            StorageError::Io(_) => 400,
        }
    }

    /// Request id reported by the provider, if any
    pub fn request_id(&self) -> Option<&str> {
        match self {
            StorageError::Server { request_id, .. } => request_id.as_deref(),
            StorageError::PartUploadFailed { source, .. } => source.request_id(),
            _ => None,
        }
    }

    /// Whether a bounded retry of the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Transport(_) => true,
            StorageError::Server { status, code, .. } => {
                matches!(*status, 429 | 500 | 502 | 503 | 504)
                    || matches!(code.as_str(), "SlowDown" | "InternalError" | "RequestTimeout")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_classification() {
        let err = StorageError::from_provider(
            403,
            "SignatureDoesNotMatch".to_string(),
            "bad signature".to_string(),
            None,
        );
        assert_eq!(err.kind(), FaultKind::Client);
        assert_eq!(err.status_code(), 403);
        assert!(!err.is_retryable());

        let err = StorageError::from_provider(
            409,
            "BucketAlreadyExists".to_string(),
            "taken".to_string(),
            Some("req-1".to_string()),
        );
        assert_eq!(err.kind(), FaultKind::Server);
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.request_id(), Some("req-1"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable() {
        let slow = StorageError::from_provider(503, "SlowDown".to_string(), String::new(), None);
        assert!(slow.is_retryable());
        assert!(StorageError::Transport("reset".to_string()).is_retryable());
        assert!(!StorageError::client("InvalidObjectKey", "empty").is_retryable());
    }

    #[test]
    fn test_part_failure_inherits_source() {
        let err = StorageError::PartUploadFailed {
            part_number: 3,
            attempts: 3,
            source: Box::new(StorageError::Transport("timed out".to_string())),
        };
        assert_eq!(err.kind(), FaultKind::Transport);
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.code(), "PartUploadFailed");
    }

    #[test]
    fn test_local_status_codes() {
        assert_eq!(StorageError::client("InvalidBucketName", "x").status_code(), 400);
        assert_eq!(StorageError::InvalidEncoding("x".to_string()).status_code(), 400);
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(StorageError::from(missing).status_code(), 404);
    }
}
