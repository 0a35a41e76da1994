//! Command-line interface
//!
//! Every command prints the operation's response envelope as JSON on stdout
//! and exits non-zero when the envelope reports a failure.
//!
//! # Usage
//!
//! ```bash
//! # Create a bucket (the account id is appended to the name)
//! stowage mb media
//!
//! # Upload, list, download and delete
//! stowage --bucket media put docs/readme.txt ./README.md
//! stowage --bucket media ls --prefix docs/ --all
//! stowage --bucket media get docs/readme.txt ./out
//! stowage --bucket media rm docs/readme.txt
//!
//! # Chunked upload of a large file with a progress bar
//! stowage --bucket media --progress upload videos/big.mp4 ./big.mp4 -P 8
//! ```

pub mod args;
pub mod commands;

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info};

use crate::client::ServiceClient;
use crate::config;
use crate::envelope::ResponseEnvelope;
use crate::types::ListObjectsOptions;
use args::{Cli, Commands};
use commands::*;

/// Load configuration, run the parsed command and print its envelope
pub async fn execute(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref(), cli.profile.as_deref())?;
    let settings = config
        .get_profile(cli.profile.as_deref())
        .context("No profile found in configuration")?;

    let (client_config, credentials) = settings.build()?;
    debug!(
        endpoint = client_config.endpoint(),
        region = client_config.region(),
        "Client configured"
    );

    let mut client = ServiceClient::new(client_config, credentials)?
        .with_multipart(config.multipart.clone());
    if let Some(secs) = cli.validity {
        client = client.with_validity(Duration::from_secs(secs));
    }

    let ctx = CommandContext {
        client,
        bucket: cli.bucket.clone().or_else(|| settings.bucket.clone()),
        multipart: config.multipart.clone(),
        show_progress: cli.progress,
    };

    let envelope = dispatch(&ctx, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&envelope)?);

    if !envelope.is_success() {
        anyhow::bail!("Request failed ({}): {}", envelope.status, envelope.message);
    }

    info!("Command completed successfully");
    Ok(())
}

async fn dispatch(ctx: &CommandContext, command: Commands) -> Result<ResponseEnvelope> {
    match command {
        Commands::Mb { name } => cmd_mb(ctx, &name).await,
        Commands::Buckets => cmd_buckets(ctx).await,
        Commands::Put {
            key,
            file,
            content_type,
        } => cmd_put(ctx, &key, &file, content_type.as_deref()).await,
        Commands::PutEncoded { key, payload } => cmd_put_encoded(ctx, &key, &payload).await,
        Commands::Upload {
            key,
            file,
            content_type,
            part_size,
            concurrency,
        } => {
            cmd_upload(
                ctx,
                &key,
                &file,
                content_type.as_deref(),
                part_size,
                concurrency,
            )
            .await
        }
        Commands::Ls {
            prefix,
            delimiter,
            max_keys,
            continuation_token,
            all,
        } => {
            let options = ListObjectsOptions {
                prefix,
                delimiter,
                max_keys,
                continuation_token,
            };
            cmd_ls(ctx, options, all).await
        }
        Commands::Get { key, dir, name } => cmd_get(ctx, &key, &dir, name.as_deref()).await,
        Commands::Rm { key } => cmd_rm(ctx, &key).await,
    }
}
