//! Redis-backed implementation of the key-value contract.

use std::time::Instant;

use ::redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use async_trait::async_trait;
use metrics::histogram;

use super::{BackendError, KeyValueBackend, Operation};

const METRIC_BACKEND_MS: &str = "strata_cache_backend_ms";
const LOCK_FLAG: u8 = 1;

/// Redis client that opens a connection per operation.
///
/// The connection is dropped as soon as the command completes, so no state
/// survives between calls apart from what Redis itself holds.
pub struct RedisBackend {
    client: Client,
}

impl RedisBackend {
    /// Validate `url` and prepare a client. No connection is made yet.
    pub fn open(url: &str) -> Result<Self, BackendError> {
        Ok(Self {
            client: Client::open(url)?,
        })
    }

    async fn connect(&self) -> Result<MultiplexedConnection, BackendError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

fn record(op: Operation, started: Instant) {
    histogram!(METRIC_BACKEND_MS, "op" => op.as_str())
        .record(started.elapsed().as_secs_f64() * 1000.0);
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let started = Instant::now();
        let mut conn = self.connect().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        record(Operation::Get, started);
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        let started = Instant::now();
        let mut conn = self.connect().await?;
        let _: () = conn.set(key, value).await?;
        record(Operation::Set, started);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<u64, BackendError> {
        let started = Instant::now();
        let mut conn = self.connect().await?;
        let removed: u64 = conn.del(key).await?;
        record(Operation::Del, started);
        Ok(removed)
    }

    async fn hash_set_if_absent(
        &self,
        namespace: &str,
        field: &str,
    ) -> Result<bool, BackendError> {
        let started = Instant::now();
        let mut conn = self.connect().await?;
        let created: bool = conn.hset_nx(namespace, field, LOCK_FLAG).await?;
        record(Operation::HashSetIfAbsent, started);
        Ok(created)
    }

    async fn hash_delete(&self, namespace: &str, field: &str) -> Result<u64, BackendError> {
        let started = Instant::now();
        let mut conn = self.connect().await?;
        let removed: u64 = conn.hdel(namespace, field).await?;
        record(Operation::HashDelete, started);
        Ok(removed)
    }

    async fn hash_get(&self, namespace: &str, field: &str) -> Result<Option<String>, BackendError> {
        let started = Instant::now();
        let mut conn = self.connect().await?;
        let value: Option<String> = conn.hget(namespace, field).await?;
        record(Operation::HashGet, started);
        Ok(value)
    }
}
