//! Chunked (multipart) uploads

pub mod coordinator;
pub mod session;

pub use coordinator::UploadCoordinator;
pub use session::{PartPlan, UploadPart, UploadSession, UploadState};
