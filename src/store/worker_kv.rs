//! Workers KV binding for the record store.

use worker::kv::KvStore;

use super::kv::KvCache;
use super::StoreError;

/// KV namespace binding name in wrangler.toml.
pub const KV_BINDING: &str = "PARAKEET_KV";

pub struct WorkerKv {
    kv: KvStore,
}

impl WorkerKv {
    pub fn from_env(env: &worker::Env) -> worker::Result<Self> {
        Ok(Self {
            kv: env.kv(KV_BINDING)?,
        })
    }
}

#[async_trait::async_trait(?Send)]
impl KvCache for WorkerKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.kv
            .get(key)
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn put(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), StoreError> {
        self.kv
            .put(key, value.as_str())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .expiration_ttl(ttl_secs)
            .execute()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}
