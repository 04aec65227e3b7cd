//! Configuration loading for the autobulk dispatch engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `AUTOBULK_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration derived from `AUTOBULK_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default = "default_recipient_cache_path")]
    pub recipient_cache_path: PathBuf,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Worker-loop configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WorkerConfig {
    /// Seconds between due-job polls.
    #[serde(default = "default_worker_tick_interval_seconds")]
    pub tick_interval_seconds: u64,

    /// Maximum due jobs processed per tick; bounds a single cycle's work.
    #[serde(default = "default_worker_batch_size")]
    pub batch_size: u64,

    /// Maximum in-flight gateway sends per job.
    #[serde(default = "default_worker_dispatch_concurrency")]
    pub dispatch_concurrency: usize,

    /// Fraction of attempted recipients that must fail before the cycle
    /// counts as a job-level failure. 0.0 means any recipient failure
    /// fails the job.
    #[serde(default = "default_worker_failure_threshold")]
    pub failure_threshold: f64,

    /// Upper bound for exponential retry backoff.
    #[serde(default = "default_worker_max_backoff_seconds")]
    pub max_backoff_seconds: u64,

    /// Random factor applied to backoff delays; 0.0 disables jitter.
    #[serde(default = "default_worker_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_worker_tick_interval_seconds(),
            batch_size: default_worker_batch_size(),
            dispatch_concurrency: default_worker_dispatch_concurrency(),
            failure_threshold: default_worker_failure_threshold(),
            max_backoff_seconds: default_worker_max_backoff_seconds(),
            jitter_factor: default_worker_jitter_factor(),
        }
    }
}

impl WorkerConfig {
    /// Validate worker configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_seconds < 1 || self.tick_interval_seconds > 300 {
            return Err(ConfigError::InvalidWorkerTickInterval {
                value: self.tick_interval_seconds,
            });
        }

        if self.batch_size < 1 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidWorkerBatchSize {
                value: self.batch_size,
            });
        }

        if self.dispatch_concurrency < 1 || self.dispatch_concurrency > 64 {
            return Err(ConfigError::InvalidDispatchConcurrency {
                value: self.dispatch_concurrency,
            });
        }

        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Err(ConfigError::InvalidFailureThreshold {
                value: self.failure_threshold,
            });
        }

        if self.max_backoff_seconds < 1 {
            return Err(ConfigError::InvalidMaxBackoff {
                value: self.max_backoff_seconds,
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidJitterFactor {
                value: self.jitter_factor,
            });
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            recipient_cache_path: default_recipient_cache_path(),
            worker: WorkerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Validate the full configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        self.worker.validate()
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_database_url() -> String {
    "sqlite://autobulk.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    5
}

fn default_db_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_recipient_cache_path() -> PathBuf {
    PathBuf::from("recipients.csv")
}

fn default_worker_tick_interval_seconds() -> u64 {
    5
}

fn default_worker_batch_size() -> u64 {
    50
}

fn default_worker_dispatch_concurrency() -> usize {
    8
}

fn default_worker_failure_threshold() -> f64 {
    0.0
}

fn default_worker_max_backoff_seconds() -> u64 {
    86_400
}

fn default_worker_jitter_factor() -> f64 {
    0.0
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },

    #[error("database URL cannot be empty; set AUTOBULK_DATABASE_URL")]
    EmptyDatabaseUrl,

    #[error("invalid AUTOBULK_{key} value '{value}': {reason}")]
    InvalidEnvValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("worker tick interval must be between 1 and 300 seconds, got {value}")]
    InvalidWorkerTickInterval { value: u64 },

    #[error("worker batch size must be between 1 and 1000, got {value}")]
    InvalidWorkerBatchSize { value: u64 },

    #[error("dispatch concurrency must be between 1 and 64, got {value}")]
    InvalidDispatchConcurrency { value: usize },

    #[error("failure threshold must be between 0.0 and 1.0, got {value}")]
    InvalidFailureThreshold { value: f64 },

    #[error("max backoff must be at least 1 second, got {value}")]
    InvalidMaxBackoff { value: u64 },

    #[error("jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidJitterFactor { value: f64 },
}

/// Parse a numeric setting, falling back to its default only when the
/// variable is absent or empty; a present-but-unparsable value is an error.
fn remove_parsed<T>(
    values: &mut BTreeMap<String, String>,
    key: &'static str,
    default: fn() -> T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match values.remove(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse().map_err(|err: T::Err| ConfigError::InvalidEnvValue {
            key,
            value: raw.clone(),
            reason: err.to_string(),
        }),
        None => Ok(default()),
    }
}

/// Loads configuration using layered `.env` files and `AUTOBULK_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration: `.env` layers first, process environment last
    /// so it wins.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("AUTOBULK_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections =
            remove_parsed(&mut layered, "DB_MAX_CONNECTIONS", default_db_max_connections)?;
        let db_acquire_timeout_ms = remove_parsed(
            &mut layered,
            "DB_ACQUIRE_TIMEOUT_MS",
            default_db_acquire_timeout_ms,
        )?;
        let recipient_cache_path = layered
            .remove("RECIPIENT_CACHE_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_recipient_cache_path);

        let worker = WorkerConfig {
            tick_interval_seconds: remove_parsed(
                &mut layered,
                "WORKER_TICK_INTERVAL_SECONDS",
                default_worker_tick_interval_seconds,
            )?,
            batch_size: remove_parsed(&mut layered, "WORKER_BATCH_SIZE", default_worker_batch_size)?,
            dispatch_concurrency: remove_parsed(
                &mut layered,
                "WORKER_DISPATCH_CONCURRENCY",
                default_worker_dispatch_concurrency,
            )?,
            failure_threshold: remove_parsed(
                &mut layered,
                "WORKER_FAILURE_THRESHOLD",
                default_worker_failure_threshold,
            )?,
            max_backoff_seconds: remove_parsed(
                &mut layered,
                "WORKER_MAX_BACKOFF_SECONDS",
                default_worker_max_backoff_seconds,
            )?,
            jitter_factor: remove_parsed(
                &mut layered,
                "WORKER_JITTER_FACTOR",
                default_worker_jitter_factor,
            )?,
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            recipient_cache_path,
            worker,
        };

        config.validate()?;
        Ok(config)
    }

    /// Collect `.env`, `.env.local`, `.env.<profile>`, `.env.<profile>.local`
    /// in that order; later layers override earlier ones.
    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("AUTOBULK_PROFILE")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(self.base_dir.join(format!(".env.{profile}")), &mut values)?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{profile}.local")),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("AUTOBULK_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
