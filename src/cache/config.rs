//! Cache configuration.
//!
//! `StoreConfig` names the three backend namespaces; `HttpCacheConfig`
//! tunes the request-serving kernel. Both are built from the `store` and
//! `proxy` sections of `strata.toml`.

use std::time::Duration;

const DEFAULT_DIGEST_PREFIX: &str = "hrd";
const DEFAULT_METADATA_PREFIX: &str = "hrm";
const DEFAULT_LOCK_NAMESPACE: &str = "hrl";
const DEFAULT_LOCK_WAIT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_LOCK_POLL_INTERVAL_MS: u64 = 50;
const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_RETRY_AFTER_SECS: u64 = 10;

/// Backend key namespaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Prefix of content-addressed body keys.
    pub digest_prefix: String,
    /// Prefix of per-URI metadata list keys.
    pub metadata_prefix: String,
    /// Key of the single hash holding every lock flag.
    pub lock_namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            digest_prefix: DEFAULT_DIGEST_PREFIX.to_owned(),
            metadata_prefix: DEFAULT_METADATA_PREFIX.to_owned(),
            lock_namespace: DEFAULT_LOCK_NAMESPACE.to_owned(),
        }
    }
}

impl From<&crate::config::StoreSettings> for StoreConfig {
    fn from(settings: &crate::config::StoreSettings) -> Self {
        Self {
            digest_prefix: settings.digest_prefix.clone(),
            metadata_prefix: settings.metadata_prefix.clone(),
            lock_namespace: settings.lock_namespace.clone(),
        }
    }
}

/// Knobs of the HTTP cache kernel.
#[derive(Debug, Clone)]
pub struct HttpCacheConfig {
    /// How long a request waits for another node to finish regenerating.
    pub lock_wait_timeout: Duration,
    /// Delay between two lock probes while waiting.
    pub lock_poll_interval: Duration,
    /// Responses with larger bodies are forwarded but never stored.
    pub max_body_bytes: usize,
    /// `Retry-After` seconds sent with 503 answers.
    pub retry_after_secs: u64,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            lock_wait_timeout: Duration::from_millis(DEFAULT_LOCK_WAIT_TIMEOUT_MS),
            lock_poll_interval: Duration::from_millis(DEFAULT_LOCK_POLL_INTERVAL_MS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
        }
    }
}

impl From<&crate::config::ProxySettings> for HttpCacheConfig {
    fn from(settings: &crate::config::ProxySettings) -> Self {
        Self {
            lock_wait_timeout: settings.lock_wait_timeout,
            lock_poll_interval: settings.lock_poll_interval,
            max_body_bytes: settings.max_body_bytes,
            retry_after_secs: settings.retry_after_secs,
        }
    }
}
