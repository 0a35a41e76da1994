use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

use stowage::config::{load_config, load_from_env, load_from_yaml};
use stowage::ConfigError;

fn write_config(dir: &TempDir, yaml: &str) -> PathBuf {
    let path = dir.path().join("config.yaml");
    fs::write(&path, yaml).unwrap();
    path
}

/// Test loading configuration from YAML file
#[test]
fn test_load_yaml_config() {
    let yaml = r#"
profiles:
  prod:
    account_id: "1250000000"
    region: ap-guangzhou
    access_key: AKIDPROD
    secret_key: prodsecret
    connect_timeout_ms: 5000
    read_timeout_ms: 20000
    validity_secs: 900
    max_retries: 5
    bucket: media
  local:
    account_id: "1"
    region: local
    endpoint: http://127.0.0.1:9000/
    access_key: minio
    secret_key: minio123

default_profile: prod

multipart:
  part_size: 16777216
  concurrency: 8
  max_part_attempts: 4
  retry_base_delay: 250
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(&temp_dir, yaml);
    let config = load_from_yaml(&config_path).unwrap();

    assert_eq!(config.profiles.len(), 2);
    let prod = config.get_profile(None).unwrap();
    assert_eq!(prod.access_key, "AKIDPROD");
    assert_eq!(prod.bucket.as_deref(), Some("media"));

    let (client, credentials) = prod.build().unwrap();
    assert_eq!(client.endpoint(), "https://cos.ap-guangzhou.myqcloud.com");
    assert_eq!(client.connect_timeout(), Duration::from_secs(5));
    assert_eq!(client.read_timeout(), Duration::from_secs(20));
    assert_eq!(client.max_retries(), 5);
    assert_eq!(credentials.validity(), Duration::from_secs(900));

    let (local, _) = config.get_profile(Some("local")).unwrap().build().unwrap();
    assert_eq!(local.endpoint(), "http://127.0.0.1:9000");
    assert!(!local.use_tls());

    assert_eq!(config.multipart.part_size, 16 * 1024 * 1024);
    assert_eq!(config.multipart.concurrency, 8);
    assert_eq!(config.multipart.max_part_attempts, 4);
    assert_eq!(config.multipart.retry_base_delay, Duration::from_millis(250));
}

/// Test default values
#[test]
fn test_default_values() {
    let yaml = r#"
profiles:
  minimal:
    account_id: "125"
    region: ap-beijing
    access_key: key
    secret_key: secret
"#;

    let temp_dir = TempDir::new().unwrap();
    let config = load_from_yaml(write_config(&temp_dir, yaml)).unwrap();

    let profile = config.profiles.get("minimal").unwrap();
    assert_eq!(profile.bucket, None);
    assert_eq!(profile.endpoint, None);
    assert_eq!(profile.validity_secs, 600);

    let (client, credentials) = profile.build().unwrap();
    assert_eq!(client.connect_timeout(), Duration::from_secs(60));
    assert_eq!(client.read_timeout(), Duration::from_secs(40));
    assert_eq!(client.max_retries(), 3);
    assert_eq!(credentials.validity(), Duration::from_secs(600));

    // Only profile, so it is the default
    assert!(config.get_profile(None).is_some());
    assert_eq!(config.multipart.concurrency, 4);
    assert_eq!(config.multipart.part_size, 8 * 1024 * 1024);
}

#[test]
fn test_invalid_profile_rejected_by_build() {
    let yaml = r#"
profiles:
  broken:
    account_id: "125"
    region: ap-beijing
    access_key: key
    secret_key: ""
  zero:
    account_id: "125"
    region: ap-beijing
    access_key: key
    secret_key: secret
    read_timeout_ms: 0
  scheme:
    account_id: "125"
    region: ap-beijing
    endpoint: cos.example.com
    access_key: key
    secret_key: secret
"#;

    let temp_dir = TempDir::new().unwrap();
    let config = load_from_yaml(write_config(&temp_dir, yaml)).unwrap();

    let err = config.profiles["broken"].build().unwrap_err();
    assert_eq!(err, ConfigError::Missing("secret_key"));

    let err = config.profiles["zero"].build().unwrap_err();
    assert_eq!(err, ConfigError::NonPositive("read_timeout_ms"));

    let err = config.profiles["scheme"].build().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidEndpoint(_)));
}

#[test]
fn test_malformed_yaml() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, "profiles: [not, a, map");
    assert!(load_from_yaml(&path).is_err());
    assert!(load_from_yaml(temp_dir.path().join("missing.yaml")).is_err());
}

/// Test get_profile method and profile selection in load_config
#[test]
fn test_get_profile() {
    let yaml = r#"
profiles:
  prod:
    account_id: "1"
    region: ap-guangzhou
    access_key: prod_key
    secret_key: prod_secret
  dev:
    account_id: "2"
    region: ap-guangzhou
    access_key: dev_key
    secret_key: dev_secret

default_profile: prod
"#;

    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, yaml);
    let path = path.to_str().unwrap();

    let config = load_config(Some(path), None).unwrap();
    assert_eq!(config.get_profile(Some("dev")).unwrap().access_key, "dev_key");
    assert_eq!(config.get_profile(None).unwrap().access_key, "prod_key");
    assert!(config.get_profile(Some("nonexistent")).is_none());

    // A requested profile becomes the default
    let config = load_config(Some(path), Some("dev")).unwrap();
    assert_eq!(config.get_profile(None).unwrap().account_id, "2");

    assert!(load_config(Some(path), Some("nonexistent")).is_err());
}

/// Environment variables are process-wide, so every env case runs in this
/// one test
#[test]
fn test_load_env_config() {
    const VARS: &[&str] = &[
        "STOWAGE_ACCOUNT_ID",
        "STOWAGE_REGION",
        "AWS_REGION",
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "STOWAGE_SECRET_ID",
        "STOWAGE_SECRET_KEY",
        "STOWAGE_ENDPOINT",
        "STOWAGE_USE_TLS",
        "STOWAGE_MAX_RETRIES",
        "STOWAGE_BUCKET",
    ];
    let saved: Vec<(&str, Option<String>)> =
        VARS.iter().map(|v| (*v, env::var(v).ok())).collect();
    for var in VARS {
        env::remove_var(var);
    }

    // Account id is mandatory
    assert!(load_from_env().is_err());

    env::set_var("STOWAGE_ACCOUNT_ID", "1250000000");
    env::set_var("AWS_REGION", "ap-shanghai");
    env::set_var("STOWAGE_SECRET_ID", "AKIDENV");
    env::set_var("STOWAGE_SECRET_KEY", "envsecret");
    env::set_var("STOWAGE_USE_TLS", "false");
    env::set_var("STOWAGE_MAX_RETRIES", "7");
    env::set_var("STOWAGE_BUCKET", "media");

    let config = load_from_env().unwrap();
    let profile = config.get_profile(None).unwrap();
    assert_eq!(profile.account_id, "1250000000");
    assert_eq!(profile.region, "ap-shanghai");
    assert_eq!(profile.access_key, "AKIDENV");
    assert_eq!(profile.bucket.as_deref(), Some("media"));

    let (client, _) = profile.build().unwrap();
    assert_eq!(client.endpoint(), "http://cos.ap-shanghai.myqcloud.com");
    assert_eq!(client.max_retries(), 7);

    // AWS names take precedence over the stowage aliases
    env::set_var("AWS_ACCESS_KEY_ID", "AKIDAWS");
    env::set_var("STOWAGE_ENDPOINT", "https://storage.internal");
    let config = load_from_env().unwrap();
    let profile = config.get_profile(None).unwrap();
    assert_eq!(profile.access_key, "AKIDAWS");
    assert_eq!(
        profile.build().unwrap().0.endpoint(),
        "https://storage.internal"
    );

    // Without a path, load_config reads the environment
    let config = load_config(None, None).unwrap();
    assert!(config.profiles.contains_key("default"));

    for (key, value) in saved {
        cleanup_env(key, value);
    }
}

/// Helper function to cleanup environment variables
fn cleanup_env(key: &str, orig_val: Option<String>) {
    match orig_val {
        Some(val) => env::set_var(key, val),
        None => env::remove_var(key),
    }
}
