//! Fleet-wide regeneration locks.
//!
//! Every lock is one field, named by the metadata key, inside a single hash
//! shared by all keys. There is no owner token and no lease: anyone may
//! release any lock, and a crashed holder is only recovered by
//! [`LockManager::clear_all`].

use std::sync::Arc;

use super::backend::{KeyValueBackend, Operation};
use super::error::StoreError;
use super::keys::CacheKey;

pub struct LockManager {
    backend: Arc<dyn KeyValueBackend>,
    namespace: String,
}

impl LockManager {
    pub fn new(backend: Arc<dyn KeyValueBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Atomic test-and-set; `true` only for the caller that created the field.
    pub async fn acquire(&self, key: &CacheKey) -> Result<bool, StoreError> {
        self.backend
            .hash_set_if_absent(&self.namespace, key.as_str())
            .await
            .map_err(|err| StoreError::backend(Operation::HashSetIfAbsent, key.as_str(), err))
    }

    /// Remove the field; `true` if it existed.
    pub async fn release(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let removed = self
            .backend
            .hash_delete(&self.namespace, key.as_str())
            .await
            .map_err(|err| StoreError::backend(Operation::HashDelete, key.as_str(), err))?;
        Ok(removed > 0)
    }

    pub async fn is_held(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let value = self
            .backend
            .hash_get(&self.namespace, key.as_str())
            .await
            .map_err(|err| StoreError::backend(Operation::HashGet, key.as_str(), err))?;
        Ok(value.is_some_and(|flag| is_truthy(&flag)))
    }

    /// Drop the entire namespace, releasing every key's lock at once.
    ///
    /// Returns how many namespaces were removed (0 or 1).
    pub async fn clear_all(&self) -> Result<u64, StoreError> {
        self.backend
            .del(&self.namespace)
            .await
            .map_err(|err| StoreError::backend(Operation::Del, self.namespace.as_str(), err))
    }
}

fn is_truthy(flag: &str) -> bool {
    let flag = flag.trim();
    !flag.is_empty() && flag != "0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryBackend;

    fn manager() -> (Arc<MemoryBackend>, LockManager) {
        let backend = Arc::new(MemoryBackend::new());
        (backend.clone(), LockManager::new(backend, "hrl"))
    }

    #[tokio::test]
    async fn acquire_is_exclusive_until_release() {
        let (_, locks) = manager();
        let key = CacheKey::for_url("hrm", "/a");

        assert!(locks.acquire(&key).await.unwrap());
        assert!(!locks.acquire(&key).await.unwrap());
        assert!(locks.is_held(&key).await.unwrap());

        assert!(locks.release(&key).await.unwrap());
        assert!(!locks.is_held(&key).await.unwrap());
        assert!(locks.acquire(&key).await.unwrap());
    }

    #[tokio::test]
    async fn release_of_unknown_key_reports_false() {
        let (_, locks) = manager();
        assert!(!locks.release(&CacheKey::for_url("hrm", "/never")).await.unwrap());
    }

    #[tokio::test]
    async fn clear_all_releases_every_key() {
        let (_, locks) = manager();
        let a = CacheKey::for_url("hrm", "/a");
        let b = CacheKey::for_url("hrm", "/b");
        locks.acquire(&a).await.unwrap();
        locks.acquire(&b).await.unwrap();

        assert_eq!(locks.clear_all().await.unwrap(), 1);
        assert!(!locks.is_held(&a).await.unwrap());
        assert!(!locks.is_held(&b).await.unwrap());
        assert_eq!(locks.clear_all().await.unwrap(), 0);
    }

    #[test]
    fn flag_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" 1 "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }

    #[tokio::test]
    async fn backend_failure_surfaces_with_operation() {
        let (backend, locks) = manager();
        backend.fail_operation(Operation::HashSetIfAbsent);

        let err = locks
            .acquire(&CacheKey::for_url("hrm", "/a"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Backend {
                op: Operation::HashSetIfAbsent,
                ..
            }
        ));
    }
}
