//! Content-addressed body storage.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::backend::{KeyValueBackend, Operation};
use super::error::StoreError;
use super::keys::ContentDigest;

/// Response bodies keyed by the digest of their bytes.
///
/// Bodies are never deleted here; their lifetime belongs to the backend's
/// own eviction policy.
pub struct ContentStore {
    backend: Arc<dyn KeyValueBackend>,
    prefix: String,
}

impl ContentStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    pub fn digest_for(&self, body: &[u8]) -> ContentDigest {
        ContentDigest::of(&self.prefix, body)
    }

    /// Persist `body` under `digest`. Rewriting identical bytes is harmless.
    pub async fn store(&self, digest: &ContentDigest, body: &[u8]) -> Result<(), StoreError> {
        self.backend
            .set(digest.as_str(), body)
            .await
            .map_err(|err| StoreError::backend(Operation::Set, digest.as_str(), err))?;
        debug!(digest = %digest, bytes = body.len(), "stored response body");
        Ok(())
    }

    /// Load a body; `None` means it was never stored or has been evicted.
    pub async fn load(&self, digest: &ContentDigest) -> Result<Option<Bytes>, StoreError> {
        let body = self
            .backend
            .get(digest.as_str())
            .await
            .map_err(|err| StoreError::backend(Operation::Get, digest.as_str(), err))?;
        Ok(body.map(Bytes::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryBackend;

    #[tokio::test]
    async fn identical_bytes_share_one_entry() {
        let backend = Arc::new(MemoryBackend::new());
        let content = ContentStore::new(backend.clone(), "hrd");

        let first = content.digest_for(b"A");
        let second = content.digest_for(b"A");
        content.store(&first, b"A").await.unwrap();
        content.store(&second, b"A").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.keys_with_prefix("hrd"), vec![first.to_string()]);
        assert_eq!(content.load(&first).await.unwrap(), Some(Bytes::from_static(b"A")));
    }

    #[tokio::test]
    async fn missing_body_is_not_an_error() {
        let content = ContentStore::new(Arc::new(MemoryBackend::new()), "hrd");
        let digest = content.digest_for(b"never stored");

        assert_eq!(content.load(&digest).await.unwrap(), None);
    }

    #[tokio::test]
    async fn backend_failure_is_reported() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_operation(Operation::Set);
        let content = ContentStore::new(backend, "hrd");
        let digest = content.digest_for(b"body");

        let err = content.store(&digest, b"body").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Backend {
                op: Operation::Set,
                ..
            }
        ));
    }
}
