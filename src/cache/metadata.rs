//! Per-key metadata lists.
//!
//! A list is the JSON array of `[requestHeaders, responseHeaders]` pairs for
//! one canonical request URI, newest first. Lists are always replaced whole;
//! there is no compare-and-swap, so two concurrent read-modify-write cycles
//! on one key resolve to whichever `replace` lands last.

use std::sync::Arc;

use tracing::warn;

use super::backend::{KeyValueBackend, Operation};
use super::entry::CacheEntry;
use super::error::StoreError;
use super::keys::CacheKey;

pub struct MetadataIndex {
    backend: Arc<dyn KeyValueBackend>,
}

impl MetadataIndex {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self { backend }
    }

    /// Stored entries for `key`; an absent list reads as empty.
    pub async fn fetch(&self, key: &CacheKey) -> Result<Vec<CacheEntry>, StoreError> {
        Ok(self.fetch_stored(key).await?.unwrap_or_default())
    }

    /// Like [`MetadataIndex::fetch`] but keeps "nothing stored" distinct.
    ///
    /// A list that no longer decodes is reported as absent so the next write
    /// replaces it.
    pub(crate) async fn fetch_stored(
        &self,
        key: &CacheKey,
    ) -> Result<Option<Vec<CacheEntry>>, StoreError> {
        let Some(raw) = self
            .backend
            .get(key.as_str())
            .await
            .map_err(|err| StoreError::backend(Operation::Get, key.as_str(), err))?
        else {
            return Ok(None);
        };

        match serde_json::from_slice(&raw) {
            Ok(entries) => Ok(Some(entries)),
            Err(err) => {
                warn!(
                    target = "strata::cache::metadata",
                    key = %key,
                    error = %err,
                    "discarding undecodable metadata list"
                );
                Ok(None)
            }
        }
    }

    pub async fn replace(&self, key: &CacheKey, entries: &[CacheEntry]) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(entries).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.backend
            .set(key.as_str(), &encoded)
            .await
            .map_err(|err| StoreError::backend(Operation::Set, key.as_str(), err))
    }

    /// Remove the whole list; `true` only if one existed.
    pub async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let removed = self
            .backend
            .del(key.as_str())
            .await
            .map_err(|err| StoreError::backend(Operation::Del, key.as_str(), err))?;
        Ok(removed > 0)
    }
}
