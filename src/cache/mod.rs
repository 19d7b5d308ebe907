//! Strata shared HTTP response cache.
//!
//! Cached responses live in a key-value backend shared by every node:
//!
//! - **Bodies** are content-addressed (`hrd` + sha1 of the bytes), so equal
//!   bodies are stored once and concurrent writers never conflict.
//! - **Metadata lists** (`hrm` + sha1 of the canonical URI) hold the stored
//!   variants of one URI, newest first; the first vary match wins.
//! - **Locks** are fields of one shared hash (`hrl`) guarding regeneration.
//!
//! [`CacheStore`] composes these behind the operations the kernel in
//! [`middleware`] calls. Namespaces are set in the `[store]` section of
//! `strata.toml`:
//!
//! ```toml
//! [store]
//! digest_prefix = "hrd"
//! metadata_prefix = "hrm"
//! lock_namespace = "hrl"
//! ```

pub mod backend;
mod config;
mod content;
mod entry;
mod error;
pub mod freshness;
mod hooks;
mod keys;
mod lock;
mod locking;
mod metadata;
pub mod middleware;
mod store;

pub use backend::{BackendError, KeyValueBackend, MemoryBackend, Operation, RedisBackend};
pub use config::{HttpCacheConfig, StoreConfig};
pub use content::ContentStore;
pub use entry::{CacheEntry, DIGEST_FIELD, HeaderSnapshot, STATUS_FIELD};
pub use error::StoreError;
pub use hooks::{CacheHook, HookOutcome, PurgeHook};
pub use keys::{CacheKey, ContentDigest, canonical_request_uri, canonical_url, sha1_hex};
pub use locking::LockManager;
pub use metadata::MetadataIndex;
pub use middleware::{HttpCache, http_cache_layer, is_cacheable};
pub use store::CacheStore;
