//! stowage - object storage client with a uniform response envelope
//!
//! A [`ServiceClient`] creates and lists buckets for one account; a
//! [`BucketClient`] puts, lists, downloads and deletes objects in one bucket,
//! and drives chunked uploads through an [`UploadCoordinator`]. Every public
//! operation returns a [`ResponseEnvelope`] instead of an error.

pub mod cli;
pub mod client;
pub mod config;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod multipart;
pub mod progress;
pub mod transport;
pub mod types;

pub use client::{BucketClient, ServiceClient};
pub use config::{ClientConfig, ClientSettings, Config, Credentials};
pub use envelope::{ErrorDetail, Payload, ResponseEnvelope};
pub use error::{ConfigError, FaultKind, Result, StorageError};
pub use multipart::{UploadCoordinator, UploadSession, UploadState};
pub use progress::{Progress, ProgressObserver};
pub use transport::{HttpTransport, MemoryTransport, Transport};
pub use types::{BucketRef, MultipartConfig, ObjectKey, ObjectSource};
