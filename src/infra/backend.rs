//! Backend selection from configuration.

use std::sync::Arc;

use tracing::info;

use crate::cache::{KeyValueBackend, MemoryBackend, RedisBackend};
use crate::config::{BackendKind, BackendSettings};

use super::error::InfraError;

/// Build the key-value backend named by `settings`.
///
/// Redis clients are validated here but connect lazily, one connection per
/// operation, so an unreachable server surfaces on first use rather than at
/// startup.
pub fn connect(settings: &BackendSettings) -> Result<Arc<dyn KeyValueBackend>, InfraError> {
    match settings.kind {
        BackendKind::Redis => {
            let backend = RedisBackend::open(&settings.redis_url)?;
            info!(target = "strata::infra::backend", kind = "redis", "cache backend ready");
            Ok(Arc::new(backend))
        }
        BackendKind::Memory => {
            info!(
                target = "strata::infra::backend",
                kind = "memory",
                "cache backend ready; entries are local to this process"
            );
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}
