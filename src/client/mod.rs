//! Service and bucket clients
//!
//! Every public operation returns a `ResponseEnvelope`; failures are logged
//! here and converted, never propagated.

pub mod bucket;
pub mod service;

pub use bucket::BucketClient;
pub use service::ServiceClient;

use tracing::warn;

use crate::envelope::{Payload, ResponseEnvelope};
use crate::error::Result;

fn respond(operation: &'static str, result: Result<Payload>) -> ResponseEnvelope {
    report(operation, ResponseEnvelope::from_result(result))
}

/// Log a failed envelope and hand it back
fn report(operation: &'static str, envelope: ResponseEnvelope) -> ResponseEnvelope {
    if let Some(ref error) = envelope.error {
        warn!(
            operation,
            kind = ?error.kind,
            code = %error.code,
            status = envelope.status,
            error = %envelope.message,
            "Operation failed"
        );
    }
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    use crate::config::ClientSettings;
    use crate::transport::{Fault, MemoryTransport};
    use crate::types::MultipartConfig;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_put_large_object_failure_is_logged() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let transport = Arc::new(MemoryTransport::new().with_bucket("media-125"));
        let (config, credentials) = ClientSettings::new("125", "ap-guangzhou", "ak", "sk")
            .build()
            .unwrap();
        let client = ServiceClient::with_transport(config, &credentials, transport.clone())
            .with_multipart(MultipartConfig::default().with_exact_part_size(4));
        let bucket = client.bucket("media").unwrap();

        transport.fail_part(2, Fault::provider(403, "AccessDenied"), u32::MAX);
        let env = bucket.put_large_object("big.bin", vec![7u8; 12], None).await;
        assert_eq!(env.status, 403);
        assert_eq!(transport.abort_calls(), 1);

        let logs = captured.text();
        assert!(logs.contains("Operation failed"), "{}", logs);
        assert!(logs.contains("operation=\"put_large_object\""), "{}", logs);
        assert!(logs.contains("code=AccessDenied"), "{}", logs);
        assert!(logs.contains("status=403"), "{}", logs);
    }
}
