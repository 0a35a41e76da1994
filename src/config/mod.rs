use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::MultipartConfig;

/// Default signing validity window, in seconds
pub const DEFAULT_VALIDITY_SECS: u64 = 600;

/// Raw client settings, as read from a profile or assembled by hand.
///
/// Nothing here is validated; call [`ClientSettings::build`] to obtain the
/// immutable configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Account id, appended to every bucket name (`name-accountid`)
    pub account_id: String,

    /// Region, e.g. ap-guangzhou
    pub region: String,

    /// Endpoint override; derived from the region when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Access key id
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Read/write timeout in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Use https for the derived endpoint
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,

    /// Signing validity window in seconds
    #[serde(default = "default_validity_secs")]
    pub validity_secs: u64,

    /// Transport retries on throttling or connection failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Optional default bucket (logical name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

fn default_connect_timeout_ms() -> u64 {
    60_000
}

fn default_read_timeout_ms() -> u64 {
    40_000
}

fn default_use_tls() -> bool {
    true
}

fn default_validity_secs() -> u64 {
    DEFAULT_VALIDITY_SECS
}

fn default_max_retries() -> u32 {
    3
}

impl fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSettings")
            .field("account_id", &self.account_id)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("use_tls", &self.use_tls)
            .field("validity_secs", &self.validity_secs)
            .field("max_retries", &self.max_retries)
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl ClientSettings {
    /// Settings with the given account, region and key pair; everything else
    /// takes its default
    pub fn new(
        account_id: impl Into<String>,
        region: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            endpoint: None,
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            use_tls: default_use_tls(),
            validity_secs: default_validity_secs(),
            max_retries: default_max_retries(),
            bucket: None,
        }
    }

    /// Validate and produce the immutable client configuration and credentials.
    ///
    /// Pure value construction: no network activity happens here.
    pub fn build(&self) -> std::result::Result<(ClientConfig, Credentials), ConfigError> {
        if self.account_id.trim().is_empty() {
            return Err(ConfigError::Missing("account_id"));
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::Missing("region"));
        }
        if self.access_key.is_empty() {
            return Err(ConfigError::Missing("access_key"));
        }
        if self.secret_key.is_empty() {
            return Err(ConfigError::Missing("secret_key"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::NonPositive("connect_timeout_ms"));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::NonPositive("read_timeout_ms"));
        }
        if self.validity_secs == 0 {
            return Err(ConfigError::NonPositive("validity_secs"));
        }

        let region = self.region.trim().to_string();
        let (endpoint, use_tls) = match &self.endpoint {
            Some(endpoint) => {
                let endpoint = endpoint.trim().trim_end_matches('/').to_string();
                let use_tls = if endpoint.starts_with("https://") {
                    true
                } else if endpoint.starts_with("http://") {
                    false
                } else {
                    return Err(ConfigError::InvalidEndpoint(endpoint));
                };
                (endpoint, use_tls)
            }
            None => {
                let scheme = if self.use_tls { "https" } else { "http" };
                (format!("{}://cos.{}.myqcloud.com", scheme, region), self.use_tls)
            }
        };

        let config = ClientConfig {
            region,
            account_id: self.account_id.trim().to_string(),
            endpoint,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            use_tls,
            max_retries: self.max_retries,
        };
        let credentials = Credentials {
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            validity: Duration::from_secs(self.validity_secs),
        };

        Ok((config, credentials))
    }
}

/// Immutable client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    region: String,
    account_id: String,
    endpoint: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    use_tls: bool,
    max_retries: u32,
}

impl ClientConfig {
    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Endpoint URL including scheme, without a trailing slash
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Signing credentials. The secret never appears in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
    validity: Duration,
}

impl Credentials {
    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    /// How long each signed request stays valid
    pub fn validity(&self) -> Duration {
        self.validity
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("validity", &self.validity)
            .finish()
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Named profiles
    #[serde(default)]
    pub profiles: HashMap<String, ClientSettings>,

    /// Profile used when none is requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,

    /// Chunked upload settings
    #[serde(default)]
    pub multipart: MultipartConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a profile by name, or the default profile if not specified
    pub fn get_profile(&self, name: Option<&str>) -> Option<&ClientSettings> {
        if let Some(name) = name {
            self.profiles.get(name)
        } else if let Some(default) = &self.default_profile {
            self.profiles.get(default)
        } else {
            self.profiles.values().next()
        }
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

fn env_any(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| std::env::var(name).ok())
}

/// Load configuration from environment variables
///
/// Supports both AWS standard variables and stowage-specific names:
/// - STOWAGE_ACCOUNT_ID (required)
/// - STOWAGE_REGION / AWS_REGION (required)
/// - AWS_ACCESS_KEY_ID / STOWAGE_SECRET_ID (required)
/// - AWS_SECRET_ACCESS_KEY / STOWAGE_SECRET_KEY (required)
/// - STOWAGE_ENDPOINT, STOWAGE_USE_TLS, STOWAGE_MAX_RETRIES, STOWAGE_BUCKET (optional)
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let account_id = std::env::var("STOWAGE_ACCOUNT_ID")
        .context("STOWAGE_ACCOUNT_ID environment variable not set")?;

    let region = env_any(&["STOWAGE_REGION", "AWS_REGION"])
        .context("Neither STOWAGE_REGION nor AWS_REGION environment variable is set")?;

    let access_key = env_any(&["AWS_ACCESS_KEY_ID", "STOWAGE_SECRET_ID"])
        .context("Neither AWS_ACCESS_KEY_ID nor STOWAGE_SECRET_ID environment variable is set")?;

    let secret_key = env_any(&["AWS_SECRET_ACCESS_KEY", "STOWAGE_SECRET_KEY"]).context(
        "Neither AWS_SECRET_ACCESS_KEY nor STOWAGE_SECRET_KEY environment variable is set",
    )?;

    let mut settings = ClientSettings::new(account_id, region, access_key, secret_key);
    settings.endpoint = std::env::var("STOWAGE_ENDPOINT").ok();
    settings.bucket = std::env::var("STOWAGE_BUCKET").ok();

    if let Ok(use_tls) = std::env::var("STOWAGE_USE_TLS") {
        settings.use_tls = !matches!(use_tls.as_str(), "false" | "0");
    }

    if let Ok(retries) = std::env::var("STOWAGE_MAX_RETRIES") {
        if let Ok(val) = retries.parse() {
            settings.max_retries = val;
        }
    }

    let mut config = Config::new();
    config.profiles.insert("default".to_string(), settings);
    config.default_profile = Some("default".to_string());

    Ok(config)
}

/// Load configuration from file or environment
///
/// Tries the YAML file first when a path is given, otherwise falls back to
/// environment variables. A requested profile must exist in the file.
pub fn load_config(config_path: Option<&str>, profile_name: Option<&str>) -> Result<Config> {
    if let Some(path) = config_path {
        let mut config = load_from_yaml(path)?;

        if let Some(name) = profile_name {
            if !config.profiles.contains_key(name) {
                anyhow::bail!("Profile '{}' not found in config file", name);
            }
            config.default_profile = Some(name.to_string());
        }

        Ok(config)
    } else {
        load_from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ClientSettings {
        ClientSettings::new("1250000000", "ap-guangzhou", "AKIDEXAMPLE", "secret")
    }

    #[test]
    fn test_build_defaults() {
        let (config, credentials) = settings().build().unwrap();
        assert_eq!(config.account_id(), "1250000000");
        assert_eq!(config.endpoint(), "https://cos.ap-guangzhou.myqcloud.com");
        assert_eq!(config.connect_timeout(), Duration::from_secs(60));
        assert_eq!(config.read_timeout(), Duration::from_secs(40));
        assert!(config.use_tls());
        assert_eq!(credentials.validity(), Duration::from_secs(600));
    }

    #[test]
    fn test_build_rejects_invalid() {
        let mut s = settings();
        s.account_id = "  ".to_string();
        assert_eq!(s.build().unwrap_err(), ConfigError::Missing("account_id"));

        let mut s = settings();
        s.region = String::new();
        assert_eq!(s.build().unwrap_err(), ConfigError::Missing("region"));

        let mut s = settings();
        s.connect_timeout_ms = 0;
        assert_eq!(
            s.build().unwrap_err(),
            ConfigError::NonPositive("connect_timeout_ms")
        );

        let mut s = settings();
        s.read_timeout_ms = 0;
        assert_eq!(s.build().unwrap_err(), ConfigError::NonPositive("read_timeout_ms"));

        let mut s = settings();
        s.endpoint = Some("minio.local:9000".to_string());
        assert!(matches!(s.build().unwrap_err(), ConfigError::InvalidEndpoint(_)));
    }

    #[test]
    fn test_explicit_endpoint_sets_tls() {
        let mut s = settings();
        s.endpoint = Some("http://localhost:9000/".to_string());
        let (config, _) = s.build().unwrap();
        assert_eq!(config.endpoint(), "http://localhost:9000");
        assert!(!config.use_tls());
    }

    #[test]
    fn test_secret_is_redacted() {
        let (_, credentials) = settings().build().unwrap();
        let printed = format!("{:?} {:?}", credentials, settings());
        assert!(!printed.contains("\"secret\""));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
profiles:
  production:
    account_id: "1250000000"
    region: ap-guangzhou
    access_key: AKIDEXAMPLE
    secret_key: secret
    bucket: media
    read_timeout_ms: 5000

default_profile: production

multipart:
  part_size: 16777216
  concurrency: 8
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let profile = config.get_profile(None).unwrap();
        assert_eq!(profile.bucket.as_deref(), Some("media"));
        assert_eq!(profile.read_timeout_ms, 5000);
        assert_eq!(profile.connect_timeout_ms, 60_000);
        assert_eq!(config.multipart.part_size, 16 * 1024 * 1024);
        assert_eq!(config.multipart.concurrency, 8);
        assert_eq!(config.multipart.max_part_attempts, 3);
    }
}
