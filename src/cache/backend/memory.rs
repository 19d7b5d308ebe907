//! In-process backend for single-node runs and tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;

use super::{BackendError, KeyValueBackend, Operation};
use crate::cache::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "cache::backend::memory";
const LOCK_FLAG: &str = "1";

#[derive(Default)]
struct State {
    scalars: HashMap<String, Vec<u8>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// Key-value backend held entirely in process memory.
///
/// Mirrors the observable semantics of the Redis commands the store relies
/// on, including `DEL` removing hashes and `HDEL` dropping an emptied hash.
/// Individual operations can be made to fail to exercise error paths.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
    failing: Mutex<HashSet<Operation>>,
    scalar_writes: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `op` fail until [`MemoryBackend::recover`].
    pub fn fail_operation(&self, op: Operation) {
        mutex_lock(&self.failing, SOURCE, "fail_operation").insert(op);
    }

    pub fn recover(&self) {
        mutex_lock(&self.failing, SOURCE, "recover").clear();
    }

    /// Scalar keys currently stored under `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let state = rw_read(&self.state, SOURCE, "keys_with_prefix");
        let mut keys: Vec<String> = state
            .scalars
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Number of successful scalar writes since creation.
    pub fn scalar_writes(&self) -> u64 {
        self.scalar_writes.load(Ordering::Relaxed)
    }

    fn check(&self, op: Operation) -> Result<(), BackendError> {
        if mutex_lock(&self.failing, SOURCE, "check").contains(&op) {
            return Err(BackendError::unavailable(op, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.check(Operation::Get)?;
        Ok(rw_read(&self.state, SOURCE, "get")
            .scalars
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        self.check(Operation::Set)?;
        let mut state = rw_write(&self.state, SOURCE, "set");
        state.hashes.remove(key);
        state.scalars.insert(key.to_owned(), value.to_vec());
        self.scalar_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<u64, BackendError> {
        self.check(Operation::Del)?;
        let mut state = rw_write(&self.state, SOURCE, "del");
        let removed = state.scalars.remove(key).is_some() || state.hashes.remove(key).is_some();
        Ok(u64::from(removed))
    }

    async fn hash_set_if_absent(
        &self,
        namespace: &str,
        field: &str,
    ) -> Result<bool, BackendError> {
        self.check(Operation::HashSetIfAbsent)?;
        let mut state = rw_write(&self.state, SOURCE, "hash_set_if_absent");
        let fields = state.hashes.entry(namespace.to_owned()).or_default();
        if fields.contains_key(field) {
            return Ok(false);
        }
        fields.insert(field.to_owned(), LOCK_FLAG.to_owned());
        Ok(true)
    }

    async fn hash_delete(&self, namespace: &str, field: &str) -> Result<u64, BackendError> {
        self.check(Operation::HashDelete)?;
        let mut state = rw_write(&self.state, SOURCE, "hash_delete");
        let Some(fields) = state.hashes.get_mut(namespace) else {
            return Ok(0);
        };
        let removed = fields.remove(field).is_some();
        if fields.is_empty() {
            state.hashes.remove(namespace);
        }
        Ok(u64::from(removed))
    }

    async fn hash_get(&self, namespace: &str, field: &str) -> Result<Option<String>, BackendError> {
        self.check(Operation::HashGet)?;
        Ok(rw_read(&self.state, SOURCE, "hash_get")
            .hashes
            .get(namespace)
            .and_then(|fields| fields.get(field))
            .cloned())
    }
}
