use thiserror::Error;

use super::backend::{BackendError, Operation};

/// Fatal failure of a store operation.
///
/// Misses are never errors; only the backend refusing a read or write, or a
/// metadata list that cannot be encoded, surface here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend {op} failed for `{key}`")]
    Backend {
        op: Operation,
        key: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to encode metadata for `{key}`")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn backend(op: Operation, key: impl Into<String>, source: BackendError) -> Self {
        Self::Backend {
            op,
            key: key.into(),
            source,
        }
    }
}
