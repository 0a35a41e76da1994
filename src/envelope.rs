//! Uniform response envelope returned by every client operation

use serde::{Deserialize, Serialize};

use crate::error::{FaultKind, StorageError};
use crate::types::{
    BucketInfo, DeletedObject, DownloadResult, ListObjectsPage, ObjectMetadata, UploadResult,
};

/// Message carried by every successful envelope
pub const SUCCESS_MESSAGE: &str = "Success";

/// Operation-specific payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Bucket(BucketInfo),
    Buckets(Vec<BucketInfo>),
    Object(ObjectMetadata),
    Objects(ListObjectsPage),
    Deleted(DeletedObject),
    Download(DownloadResult),
    Upload(UploadResult),
}

/// Structured failure information, so callers can tell a client fault from a
/// server fault without parsing the message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: FaultKind,
    pub code: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl From<&StorageError> for ErrorDetail {
    fn from(err: &StorageError) -> Self {
        Self {
            kind: err.kind(),
            code: err.code().to_string(),
            retryable: err.is_retryable(),
            request_id: err.request_id().map(str::to_string),
        }
    }
}

/// `{status, message, data, error}` result of a public operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl ResponseEnvelope {
    pub fn success(data: Payload) -> Self {
        Self {
            status: 200,
            message: SUCCESS_MESSAGE.to_string(),
            data: Some(data),
            error: None,
        }
    }

    /// Envelope for a failure; the status is derived from the error
    pub fn failure(err: &StorageError) -> Self {
        Self {
            status: err.status_code(),
            message: err.to_string(),
            data: None,
            error: Some(ErrorDetail::from(err)),
        }
    }

    pub fn from_result(result: Result<Payload, StorageError>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(err) => Self::failure(&err),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn error_kind(&self) -> Option<FaultKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope() {
        let env = ResponseEnvelope::success(Payload::Bucket(BucketInfo::new(
            "media-125".to_string(),
        )));
        assert!(env.is_success());
        assert_eq!(env.message, "Success");
        assert!(env.error.is_none());

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], 200);
        assert_eq!(json["data"]["type"], "bucket");
        assert_eq!(json["data"]["value"]["name"], "media-125");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failure_keeps_fault_kind() {
        let client = StorageError::from_provider(
            403,
            "AccessDenied".to_string(),
            "denied".to_string(),
            None,
        );
        let server = StorageError::from_provider(
            409,
            "BucketAlreadyExists".to_string(),
            "exists".to_string(),
            None,
        );

        let env = ResponseEnvelope::failure(&client);
        assert_eq!(env.status, 403);
        assert_eq!(env.error_kind(), Some(FaultKind::Client));

        let env = ResponseEnvelope::failure(&server);
        assert_eq!(env.status, 409);
        assert_eq!(env.error_kind(), Some(FaultKind::Server));
        assert_eq!(env.error_code(), Some("BucketAlreadyExists"));
        assert!(env.message.contains("exists"));
    }
}
