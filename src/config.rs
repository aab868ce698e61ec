//! Server configuration, read once from `TUTORBOOK_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::RetryPolicy;
use crate::limits::*;

/// Signing key used when `TUTORBOOK_JWT_SECRET` is unset. Fine for local
/// runs only.
pub const DEV_JWT_SECRET: &str = "tutorbook-dev-secret";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// HMAC key for signing access tokens.
    pub jwt_secret: String,
    /// Lifetime of an issued access token.
    pub token_ttl: Duration,
    pub metrics_port: Option<u16>,
    /// WAL appends that trigger a compaction.
    pub compact_threshold: u64,
    pub lock_timeout: Duration,
    pub retry: RetryPolicy,
    /// Tutors added on startup when the directory is empty.
    pub seed_tutors: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            jwt_secret: DEV_JWT_SECRET.into(),
            token_ttl: Duration::from_secs(24 * 60 * 60),
            metrics_port: None,
            compact_threshold: 1000,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            retry: RetryPolicy::default(),
            seed_tutors: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or unparseable values fall back to
    /// the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            bind: lookup("TUTORBOOK_BIND").unwrap_or(defaults.bind),
            port: lookup("TUTORBOOK_PORT")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.port),
            data_dir: lookup("TUTORBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            jwt_secret: lookup("TUTORBOOK_JWT_SECRET")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.jwt_secret),
            token_ttl: parsed("TUTORBOOK_TOKEN_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.token_ttl),
            metrics_port: lookup("TUTORBOOK_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            compact_threshold: parsed("TUTORBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            lock_timeout: parsed("TUTORBOOK_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            retry: RetryPolicy {
                max_attempts: lookup("TUTORBOOK_MAX_ATTEMPTS")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(defaults.retry.max_attempts),
                backoff: parsed("TUTORBOOK_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.backoff),
            },
            seed_tutors: lookup("TUTORBOOK_SEED_TUTORS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("tutorbook.wal")
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}
