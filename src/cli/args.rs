use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// stowage - object storage client
#[derive(Parser, Debug)]
#[command(name = "stowage")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (falls back to environment variables)
    #[arg(long, global = true, env = "STOWAGE_CONFIG")]
    pub config: Option<String>,

    /// Profile to use from config
    #[arg(long, global = true, env = "STOWAGE_PROFILE")]
    pub profile: Option<String>,

    /// Bucket (logical name), overriding the profile's default bucket
    #[arg(short, long, global = true)]
    pub bucket: Option<String>,

    /// Signing validity window in seconds, overriding the profile
    #[arg(long, global = true)]
    pub validity: Option<u64>,

    /// Show a progress bar for transfers
    #[arg(short, long, global = true)]
    pub progress: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Disable TLS certificate verification
    #[arg(long, global = true)]
    pub insecure: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a bucket
    Mb {
        /// Logical bucket name (the account id is appended)
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// List the account's buckets
    Buckets,

    /// Upload a file in a single request
    Put {
        /// Object key
        #[arg(value_name = "KEY")]
        key: String,

        /// Local file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Content type
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Upload a data-URI encoded payload (`data:<type>;base64,<data>`)
    PutEncoded {
        /// Object key
        #[arg(value_name = "KEY")]
        key: String,

        /// Encoded payload, or @path to read it from a file
        #[arg(value_name = "PAYLOAD")]
        payload: String,
    },

    /// Upload a large file in parts
    Upload {
        /// Object key
        #[arg(value_name = "KEY")]
        key: String,

        /// Local file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Content type
        #[arg(long)]
        content_type: Option<String>,

        /// Part size in MiB
        #[arg(long)]
        part_size: Option<usize>,

        /// Parts uploaded concurrently
        #[arg(short = 'P', long)]
        concurrency: Option<usize>,
    },

    /// List objects in the bucket
    Ls {
        /// Key prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Group keys by this delimiter
        #[arg(long)]
        delimiter: Option<String>,

        /// Page size
        #[arg(long)]
        max_keys: Option<u32>,

        /// Continue a previous listing
        #[arg(long)]
        continuation_token: Option<String>,

        /// Follow continuation tokens and print every object
        #[arg(
            short,
            long,
            conflicts_with_all = ["delimiter", "max_keys", "continuation_token"]
        )]
        all: bool,
    },

    /// Download an object
    Get {
        /// Object key
        #[arg(value_name = "KEY")]
        key: String,

        /// Destination directory (created when missing)
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,

        /// Destination file name (defaults to the last key segment)
        #[arg(long)]
        name: Option<String>,
    },

    /// Delete an object
    Rm {
        /// Object key
        #[arg(value_name = "KEY")]
        key: String,
    },
}

/// File name for a downloaded key: its last non-empty `/` segment
pub fn default_file_name(key: &str) -> Option<&str> {
    key.rsplit('/').find(|s| !s.is_empty())
}
