//! Key-value backend contract.
//!
//! The store only needs scalar get/set/delete plus three hash-field
//! operations for locking. Every call is one logical round trip; the
//! implementations never batch or pipeline.

mod memory;
mod redis;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("backend unavailable during {op}: {message}")]
    Unavailable { op: Operation, message: String },
}

impl BackendError {
    pub fn unavailable(op: Operation, message: impl Into<String>) -> Self {
        Self::Unavailable {
            op,
            message: message.into(),
        }
    }
}

/// One backend primitive, used for error context and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Set,
    Del,
    HashSetIfAbsent,
    HashDelete,
    HashGet,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Del => "del",
            Self::HashSetIfAbsent => "hsetnx",
            Self::HashDelete => "hdel",
            Self::HashGet => "hget",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared key-value storage reachable by every node of the fleet.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Scalar read; `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Scalar write without expiry.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), BackendError>;

    /// Delete a key of any type, returning how many keys were removed.
    async fn del(&self, key: &str) -> Result<u64, BackendError>;

    /// Atomically create `field` inside the hash `namespace`.
    ///
    /// Returns `true` only when the field did not exist before.
    async fn hash_set_if_absent(&self, namespace: &str, field: &str)
    -> Result<bool, BackendError>;

    async fn hash_delete(&self, namespace: &str, field: &str) -> Result<u64, BackendError>;

    async fn hash_get(&self, namespace: &str, field: &str) -> Result<Option<String>, BackendError>;
}
