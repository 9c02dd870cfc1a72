use base64::{engine::general_purpose, Engine as _};
use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default rotation period (24 hours).
pub const DEFAULT_ROTATION_INTERVAL_SECONDS: u64 = 24 * 60 * 60;

/// Default TTL of a rotation lock attempt.
pub const DEFAULT_LOCK_TTL_SECONDS: u64 = 30;

/// Default TTL of the in-process key ring cache.
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;

/// Default deadline for a single blob store or oracle call.
pub const DEFAULT_STORAGE_TIMEOUT_SECONDS: u64 = 5;

/// Store and oracle calls made while the rotation lock is held.
///
/// The lock TTL must leave room for all of them at the storage timeout.
pub const LOCKED_STORAGE_CALLS: u32 = 4;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_ENVIRONMENT: &str = "dev";
pub const DEFAULT_REGION: &str = "us-east-1";

/// Length of the AES-256 key used by the local oracle.
pub const KEY_ENCRYPTION_KEY_LEN: usize = 32;

/// Where the key bundle and lock objects live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    S3 {
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    },
    /// Process-local store. Only useful for a single instance or local runs.
    Memory,
}

/// How key material is protected at rest.
#[derive(Debug, Clone)]
pub enum EncryptionSettings {
    /// Remote oracle reachable over HTTP.
    Oracle { url: String },
    /// AES-256-GCM with a locally held key (base64, 32 bytes).
    LocalKey(SecretString),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub environment: String,
    pub store: StoreBackend,
    pub object_key: String,
    pub encryption: EncryptionSettings,
    pub rotation_interval: Duration,
    pub lock_ttl: Duration,
    pub cache_ttl: Duration,
    pub storage_timeout: Duration,
    pub drain_period: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Invalid key encryption key: {0}")]
    InvalidEncryptionKey(String),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let environment = vars
            .get("ENVIRONMENT")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

        let store = match vars.get("JWK_STORE_BACKEND").map(String::as_str) {
            None | Some("s3") => StoreBackend::S3 {
                bucket: vars
                    .get("JWK_BUCKET_NAME")
                    .cloned()
                    .unwrap_or_else(|| default_bucket_name(&environment)),
                region: vars
                    .get("AWS_REGION")
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_REGION.to_string()),
                endpoint_url: vars.get("S3_ENDPOINT_URL").cloned(),
            },
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "JWK_STORE_BACKEND".to_string(),
                    reason: format!("unknown backend '{}', expected 's3' or 'memory'", other),
                })
            }
        };

        let object_key = vars
            .get("JWK_OBJECT_KEY")
            .cloned()
            .unwrap_or_else(|| format!("encrypted-keys-{}.txt", environment));

        let encryption = match vars.get("ENCRYPTION_ORACLE_URL") {
            Some(url) => EncryptionSettings::Oracle {
                url: url.trim_end_matches('/').to_string(),
            },
            None => {
                let key_base64 = vars
                    .get("KEY_ENCRYPTION_KEY")
                    .ok_or_else(|| ConfigError::MissingEnvVar("KEY_ENCRYPTION_KEY".to_string()))?;
                validate_encryption_key(key_base64)?;
                EncryptionSettings::LocalKey(SecretString::from(key_base64.clone()))
            }
        };

        let lock_ttl =
            positive_seconds(vars, "ROTATION_LOCK_TTL_SECONDS", DEFAULT_LOCK_TTL_SECONDS)?;
        let storage_timeout = positive_seconds(
            vars,
            "STORAGE_TIMEOUT_SECONDS",
            DEFAULT_STORAGE_TIMEOUT_SECONDS,
        )?;
        if storage_timeout * LOCKED_STORAGE_CALLS >= lock_ttl {
            return Err(ConfigError::InvalidValue {
                name: "STORAGE_TIMEOUT_SECONDS".to_string(),
                reason: format!(
                    "{} calls of {}s do not fit in the {}s rotation lock TTL",
                    LOCKED_STORAGE_CALLS,
                    storage_timeout.as_secs(),
                    lock_ttl.as_secs()
                ),
            });
        }

        Ok(Config {
            bind_address,
            environment,
            store,
            object_key,
            encryption,
            rotation_interval: positive_seconds(
                vars,
                "KEY_ROTATION_INTERVAL_SECONDS",
                DEFAULT_ROTATION_INTERVAL_SECONDS,
            )?,
            lock_ttl,
            cache_ttl: positive_seconds(vars, "KEY_CACHE_TTL_SECONDS", DEFAULT_CACHE_TTL_SECONDS)?,
            storage_timeout,
            drain_period: Duration::from_secs(parse_seconds(vars, "SHUTDOWN_DRAIN_SECONDS", 0)?),
        })
    }
}

fn default_bucket_name(environment: &str) -> String {
    match environment {
        "staging" => "jwk-keys-staging".to_string(),
        "prod" => "jwk-keys-prod".to_string(),
        _ => "jwk-keys-dev".to_string(),
    }
}

fn validate_encryption_key(key_base64: &str) -> Result<(), ConfigError> {
    let bytes = general_purpose::STANDARD.decode(key_base64)?;
    if bytes.len() != KEY_ENCRYPTION_KEY_LEN {
        return Err(ConfigError::InvalidEncryptionKey(format!(
            "Expected {} bytes, got {}",
            KEY_ENCRYPTION_KEY_LEN,
            bytes.len()
        )));
    }
    Ok(())
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn positive_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let seconds = parse_seconds(vars, name, default)?;
    if seconds == 0 {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(seconds))
}
