//! Account-level operations

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{respond, BucketClient};
use crate::config::{ClientConfig, Credentials};
use crate::envelope::{Payload, ResponseEnvelope};
use crate::error::Result;
use crate::transport::{HttpTransport, Transport};
use crate::types::{BucketRef, MultipartConfig};

/// Client for bucket-level operations of one account
///
/// Clone is cheap - the transport is shared.
#[derive(Clone)]
pub struct ServiceClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    /// Default signing validity window
    validity: Duration,
    multipart: MultipartConfig,
}

impl ServiceClient {
    /// Create a client talking HTTP to the configured endpoint
    pub fn new(config: ClientConfig, credentials: Credentials) -> Result<Self> {
        let transport = HttpTransport::new(&config, &credentials)?;
        Ok(Self {
            config,
            transport: Arc::new(transport),
            validity: credentials.validity(),
            multipart: MultipartConfig::default(),
        })
    }

    /// Create a client over any transport, signing with the credentials'
    /// validity window
    pub fn with_transport(
        config: ClientConfig,
        credentials: &Credentials,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            transport,
            validity: credentials.validity(),
            multipart: MultipartConfig::default(),
        }
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Chunked upload settings handed to bucket clients
    pub fn with_multipart(mut self, multipart: MultipartConfig) -> Self {
        self.multipart = multipart;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Create `<name>-<account_id>`
    pub async fn create_bucket(&self, name: &str) -> ResponseEnvelope {
        respond("create_bucket", self.try_create_bucket(name).await)
    }

    async fn try_create_bucket(&self, name: &str) -> Result<Payload> {
        let bucket = BucketRef::new(name, self.config.account_id())?;
        info!(bucket = %bucket, region = %self.config.region(), "Creating bucket");
        let info = self.transport.create_bucket(bucket.id(), self.validity).await?;
        Ok(Payload::Bucket(info))
    }

    /// List the account's buckets, signed with the default window
    pub async fn list_buckets(&self) -> ResponseEnvelope {
        self.list_buckets_with_validity(self.validity).await
    }

    pub async fn list_buckets_with_validity(&self, validity: Duration) -> ResponseEnvelope {
        let result = self
            .transport
            .list_buckets(validity)
            .await
            .map(Payload::Buckets);
        respond("list_buckets", result)
    }

    /// Scope a client to one bucket, given its logical name
    pub fn bucket(&self, name: &str) -> Result<BucketClient> {
        let bucket = BucketRef::new(name, self.config.account_id())?;
        Ok(BucketClient::new(
            bucket,
            self.transport.clone(),
            self.validity,
            self.multipart.clone(),
        ))
    }
}
