use anyhow::{Context, Result};
use futures::TryStreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::args::default_file_name;
use crate::client::{BucketClient, ServiceClient};
use crate::envelope::{Payload, ResponseEnvelope};
use crate::progress::{Progress, ProgressObserver};
use crate::types::{ListObjectsOptions, ListObjectsPage, MultipartConfig};

/// Progress observer drawing an indicatif bar on stderr
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(message: String) -> Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}")?
                .progress_chars("=>-"),
        );
        bar.set_message(message);
        Ok(Self { bar })
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressObserver for BarProgress {
    fn on_progress(&self, progress: Progress) {
        if self.bar.length() != Some(progress.total) {
            self.bar.set_length(progress.total);
        }
        self.bar.set_position(progress.transferred);
    }
}

/// Everything a command needs: the account client plus CLI-wide choices
pub struct CommandContext {
    pub client: ServiceClient,
    pub bucket: Option<String>,
    pub multipart: MultipartConfig,
    pub show_progress: bool,
}

impl CommandContext {
    fn bucket_client(&self) -> Result<BucketClient> {
        let name = self
            .bucket
            .as_deref()
            .context("No bucket given: pass --bucket or set one in the profile")?;
        Ok(self.client.bucket(name)?)
    }

    /// Run `op` with a progress bar attached when requested
    async fn with_bar<F, Fut>(
        &self,
        bucket: BucketClient,
        message: String,
        op: F,
    ) -> Result<ResponseEnvelope>
    where
        F: FnOnce(BucketClient) -> Fut,
        Fut: std::future::Future<Output = ResponseEnvelope>,
    {
        if !self.show_progress {
            return Ok(op(bucket).await);
        }

        let bar = Arc::new(BarProgress::new(message)?);
        let envelope = op(bucket.with_progress(bar.clone())).await;
        bar.finish();
        Ok(envelope)
    }
}

pub async fn cmd_mb(ctx: &CommandContext, name: &str) -> Result<ResponseEnvelope> {
    Ok(ctx.client.create_bucket(name).await)
}

pub async fn cmd_buckets(ctx: &CommandContext) -> Result<ResponseEnvelope> {
    Ok(ctx.client.list_buckets().await)
}

pub async fn cmd_put(
    ctx: &CommandContext,
    key: &str,
    file: &Path,
    content_type: Option<&str>,
) -> Result<ResponseEnvelope> {
    let bucket = ctx.bucket_client()?;
    let source = file.to_path_buf();
    ctx.with_bar(bucket, format!("Uploading {}", file.display()), |b| async move {
        b.put_object(key, source, content_type).await
    })
    .await
}

pub async fn cmd_put_encoded(
    ctx: &CommandContext,
    key: &str,
    payload: &str,
) -> Result<ResponseEnvelope> {
    let bucket = ctx.bucket_client()?;
    let encoded = match payload.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read encoded payload from {}", path))?,
        None => payload.to_string(),
    };
    Ok(bucket.put_object_from_encoded(key, encoded.trim()).await)
}

pub async fn cmd_upload(
    ctx: &CommandContext,
    key: &str,
    file: &Path,
    content_type: Option<&str>,
    part_size_mib: Option<usize>,
    concurrency: Option<usize>,
) -> Result<ResponseEnvelope> {
    let mut multipart = ctx.multipart.clone();
    if let Some(mib) = part_size_mib {
        multipart = multipart.with_part_size(mib.saturating_mul(1024 * 1024));
    }
    if let Some(n) = concurrency {
        multipart = multipart.with_concurrency(n);
    }
    debug!(
        part_size = multipart.part_size,
        concurrency = multipart.concurrency,
        "Chunked upload settings"
    );

    let bucket = ctx.bucket_client()?.with_multipart(multipart);
    let source = file.to_path_buf();
    ctx.with_bar(bucket, format!("Uploading {}", file.display()), |b| async move {
        b.put_large_object(key, source, content_type).await
    })
    .await
}

pub async fn cmd_ls(
    ctx: &CommandContext,
    options: ListObjectsOptions,
    all: bool,
) -> Result<ResponseEnvelope> {
    let bucket = ctx.bucket_client()?;
    if !all {
        return Ok(bucket.list_objects_page(options).await);
    }
    anyhow::ensure!(
        options.delimiter.is_none()
            && options.max_keys.is_none()
            && options.continuation_token.is_none(),
        "--all lists every key under the prefix and takes no page options"
    );

    let result = bucket
        .objects(options.prefix.clone())
        .try_collect::<Vec<_>>()
        .await
        .map(|objects| {
            Payload::Objects(ListObjectsPage {
                bucket: bucket.bucket().id().to_string(),
                prefix: options.prefix,
                objects,
                ..Default::default()
            })
        });
    Ok(ResponseEnvelope::from_result(result))
}

pub async fn cmd_get(
    ctx: &CommandContext,
    key: &str,
    dir: &Path,
    name: Option<&str>,
) -> Result<ResponseEnvelope> {
    let bucket = ctx.bucket_client()?;
    let file_name = match name {
        Some(name) => name,
        None => default_file_name(key)
            .with_context(|| format!("Cannot derive a file name from key {:?}; pass --name", key))?,
    };
    let dir: PathBuf = dir.to_path_buf();
    ctx.with_bar(bucket, format!("Downloading {}", key), |b| async move {
        b.get_object(key, dir, file_name).await
    })
    .await
}

pub async fn cmd_rm(ctx: &CommandContext, key: &str) -> Result<ResponseEnvelope> {
    let bucket = ctx.bucket_client()?;
    Ok(bucket.delete_object(key).await)
}

