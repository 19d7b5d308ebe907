//! Cache store façade.
//!
//! Composes body storage, metadata lists and locks behind the operations the
//! HTTP cache kernel calls. A `CacheStore` is also a per-request handle: it
//! remembers whether it attempted a lock that was never released, which
//! decides what [`CacheStore::cleanup`] does.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::{
    HeaderMap, HeaderName, HeaderValue, Response,
    header::{CONTENT_LENGTH, TRANSFER_ENCODING},
    request::Parts,
};
use bytes::Bytes;
use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::backend::KeyValueBackend;
use super::config::StoreConfig;
use super::content::ContentStore;
use super::entry::{CacheEntry, DIGEST_FIELD, STATUS_FIELD};
use super::error::StoreError;
use super::freshness;
use super::keys::{CacheKey, ContentDigest};
use super::locking::LockManager;
use super::metadata::MetadataIndex;

struct Components {
    config: StoreConfig,
    content: ContentStore,
    metadata: MetadataIndex,
    locks: LockManager,
}

/// Why a lookup produced no response. Only ever logged and counted; callers
/// see a plain miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissReason {
    NotFound,
    NoMatch,
    MissingBody,
    InvalidStatus,
}

impl MissReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::NoMatch => "no_match",
            Self::MissingBody => "missing_body",
            Self::InvalidStatus => "invalid_status",
        }
    }
}

enum Found {
    Hit(Response<Bytes>),
    Miss(MissReason),
}

pub struct CacheStore {
    shared: Arc<Components>,
    lock_released: AtomicBool,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, config: StoreConfig) -> Self {
        let components = Components {
            content: ContentStore::new(Arc::clone(&backend), config.digest_prefix.clone()),
            metadata: MetadataIndex::new(Arc::clone(&backend)),
            locks: LockManager::new(backend, config.lock_namespace.clone()),
            config,
        };
        Self {
            shared: Arc::new(components),
            lock_released: AtomicBool::new(true),
        }
    }

    /// A handle on the same backend and namespaces with its own lock flag.
    pub fn for_request(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            lock_released: AtomicBool::new(true),
        }
    }

    pub fn metadata_key(&self, request: &Parts) -> CacheKey {
        CacheKey::for_request(&self.shared.config.metadata_prefix, request)
    }

    pub fn url_key(&self, url: &str) -> CacheKey {
        CacheKey::for_url(&self.shared.config.metadata_prefix, url)
    }

    /// Whether this handle attempted a lock and has not released it since.
    pub fn lock_outstanding(&self) -> bool {
        !self.lock_released.load(Ordering::Acquire)
    }

    /// Find the stored variant answering `request`.
    ///
    /// A missing list, no matching variant and an evicted body all read as
    /// `Ok(None)`; only backend failures are errors.
    pub async fn lookup(&self, request: &Parts) -> Result<Option<Response<Bytes>>, StoreError> {
        let key = self.metadata_key(request);
        match self.find(&key, &request.headers).await? {
            Found::Hit(response) => {
                counter!("strata_cache_hit_total").increment(1);
                debug!(cache = "store", outcome = "hit", key = %key, "stored variant found");
                Ok(Some(response))
            }
            Found::Miss(reason) => {
                counter!("strata_cache_miss_total", "reason" => reason.as_str()).increment(1);
                debug!(
                    cache = "store",
                    outcome = "miss",
                    reason = reason.as_str(),
                    key = %key,
                    "no stored variant"
                );
                Ok(None)
            }
        }
    }

    async fn find(&self, key: &CacheKey, headers: &HeaderMap) -> Result<Found, StoreError> {
        let Some(entries) = self.shared.metadata.fetch_stored(key).await? else {
            return Ok(Found::Miss(MissReason::NotFound));
        };
        let Some(entry) = entries.into_iter().find(|entry| entry.matches_request(headers)) else {
            return Ok(Found::Miss(MissReason::NoMatch));
        };
        let Some(digest) = entry.content_digest() else {
            return Ok(Found::Miss(MissReason::MissingBody));
        };
        let Some(body) = self
            .shared
            .content
            .load(&ContentDigest::from_stored(digest))
            .await?
        else {
            return Ok(Found::Miss(MissReason::MissingBody));
        };

        Ok(rebuild_response(&entry, body)
            .map(Found::Hit)
            .unwrap_or(Found::Miss(MissReason::InvalidStatus)))
    }

    /// Store `response` as the newest variant for `request`.
    ///
    /// An original response (no digest header yet) has its body stored first
    /// and is tagged with the digest and a `Content-Length`. Entries the new
    /// variant supersedes are dropped; diverging variants are kept behind it.
    pub async fn write(
        &self,
        request: &Parts,
        response: &mut Response<Bytes>,
    ) -> Result<CacheKey, StoreError> {
        if !response.headers().contains_key(DIGEST_FIELD) {
            self.store_body(response).await?;
        }

        let key = self.metadata_key(request);
        let existing = self.shared.metadata.fetch(&key).await?;
        let previous = existing.len();

        let mut entries = Vec::with_capacity(previous + 1);
        entries.push(CacheEntry::from_fresh_exchange(request, response));
        entries.extend(
            existing
                .into_iter()
                .filter(|entry| entry.diverges_from(&request.headers, response.headers())),
        );
        let superseded = previous + 1 - entries.len();

        self.shared.metadata.replace(&key, &entries).await?;
        counter!("strata_cache_write_total").increment(1);
        debug!(
            cache = "store",
            key = %key,
            variants = entries.len(),
            superseded,
            "stored response variant"
        );
        Ok(key)
    }

    async fn store_body(&self, response: &mut Response<Bytes>) -> Result<(), StoreError> {
        let digest = self.shared.content.digest_for(response.body());
        self.shared.content.store(&digest, response.body()).await?;

        let length = response.body().len();
        let headers = response.headers_mut();
        match HeaderValue::from_str(digest.as_str()) {
            Ok(value) => {
                headers.insert(DIGEST_FIELD, value);
            }
            Err(_) => warn!(
                cache = "store",
                digest = %digest,
                "digest is not a valid header value; variant will not be served"
            ),
        }
        if !headers.contains_key(TRANSFER_ENCODING) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }
        Ok(())
    }

    /// Expire every still-fresh variant stored for `request`.
    ///
    /// Entries are never removed; the list is rewritten only if at least one
    /// entry changed.
    pub async fn invalidate(&self, request: &Parts) -> Result<(), StoreError> {
        self.invalidate_key(&self.metadata_key(request)).await
    }

    pub async fn invalidate_url(&self, url: &str) -> Result<(), StoreError> {
        self.invalidate_key(&self.url_key(url)).await
    }

    async fn invalidate_key(&self, key: &CacheKey) -> Result<(), StoreError> {
        let entries = self.shared.metadata.fetch(key).await?;
        let now = OffsetDateTime::now_utc();

        let mut expired = 0_usize;
        let mut updated = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.status() {
                Some(status) if freshness::is_fresh_at(entry.response_headers(), now) => {
                    let headers = freshness::expire(entry.response_headers());
                    updated.push(CacheEntry::from_stale_copy(&entry, status, headers));
                    expired += 1;
                }
                _ => updated.push(entry),
            }
        }

        if expired == 0 {
            debug!(cache = "store", key = %key, "nothing fresh to invalidate");
            return Ok(());
        }

        self.shared.metadata.replace(key, &updated).await?;
        counter!("strata_cache_invalidate_total").increment(1);
        debug!(cache = "store", key = %key, expired, "expired stored variants");
        Ok(())
    }

    /// Try to become the only regenerator of `request`'s key, fleet-wide.
    ///
    /// Every attempt marks a lock as outstanding on this handle, whether or
    /// not it was acquired, so a later [`CacheStore::cleanup`] clears the
    /// namespace unless [`CacheStore::unlock`] succeeds first.
    pub async fn lock(&self, request: &Parts) -> bool {
        let key = self.metadata_key(request);
        self.lock_released.store(false, Ordering::Release);
        match self.shared.locks.acquire(&key).await {
            Ok(true) => true,
            Ok(false) => {
                counter!("strata_cache_lock_contended_total").increment(1);
                debug!(cache = "store", key = %key, "lock already held");
                false
            }
            Err(err) => {
                warn!(cache = "store", op = "lock", key = %key, error = %err, "lock acquisition failed");
                false
            }
        }
    }

    /// Release the lock for `request`'s key, whoever holds it.
    pub async fn unlock(&self, request: &Parts) -> bool {
        self.release(&self.metadata_key(request)).await
    }

    pub async fn unlock_url(&self, url: &str) -> bool {
        self.release(&self.url_key(url)).await
    }

    async fn release(&self, key: &CacheKey) -> bool {
        match self.shared.locks.release(key).await {
            Ok(removed) => {
                self.lock_released.store(true, Ordering::Release);
                removed
            }
            Err(err) => {
                warn!(cache = "store", op = "unlock", key = %key, error = %err, "lock release failed");
                false
            }
        }
    }

    pub async fn is_locked(&self, request: &Parts) -> bool {
        let key = self.metadata_key(request);
        match self.shared.locks.is_held(&key).await {
            Ok(held) => held,
            Err(err) => {
                warn!(cache = "store", op = "is_locked", key = %key, error = %err, "lock probe failed");
                false
            }
        }
    }

    /// Delete the whole metadata list for `url`; `true` if one existed.
    pub async fn purge(&self, url: &str) -> Result<bool, StoreError> {
        let key = self.url_key(url);
        let removed = self.shared.metadata.delete(&key).await?;
        info!(cache = "store", op = "purge", key = %key, removed, url, "purge handled");
        Ok(removed)
    }

    /// Recover from a lock this handle never released.
    ///
    /// Deletes the entire lock namespace, so every key's lock is dropped, not
    /// only this handle's. Does nothing when no lock is outstanding.
    pub async fn cleanup(&self) -> Result<(), StoreError> {
        if !self.lock_outstanding() {
            return Ok(());
        }

        let removed = self.shared.locks.clear_all().await?;
        self.lock_released.store(true, Ordering::Release);
        if removed == 0 {
            warn!(
                cache = "store",
                namespace = self.shared.locks.namespace(),
                "lock namespace was already empty during cleanup"
            );
        } else {
            info!(
                cache = "store",
                namespace = self.shared.locks.namespace(),
                "cleared lock namespace"
            );
        }
        Ok(())
    }

    /// Stored variants for `url`, newest first.
    pub async fn inspect(&self, url: &str) -> Result<Vec<CacheEntry>, StoreError> {
        self.shared.metadata.fetch(&self.url_key(url)).await
    }
}

fn rebuild_response(entry: &CacheEntry, body: Bytes) -> Option<Response<Bytes>> {
    let status = entry.status()?;
    let mut response = Response::new(body);
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, values) in entry.response_headers().iter() {
        if name == STATUS_FIELD {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    Some(response)
}
