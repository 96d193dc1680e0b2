//! Flat key/value blob namespace. Paths use `/` separators; "directories"
//! exist only as shared prefixes.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use sheetscan_utils::SheetscanResult;

use crate::redis::{escape_glob, RedisPool};

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, data: Vec<u8>) -> SheetscanResult<()>;

    async fn get(&self, path: &str) -> SheetscanResult<Option<Vec<u8>>>;

    /// Returns whether something was removed.
    async fn delete(&self, path: &str) -> SheetscanResult<bool>;

    /// All paths starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> SheetscanResult<Vec<String>>;

    async fn exists(&self, path: &str) -> SheetscanResult<bool> {
        Ok(self.get(path).await?.is_some())
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, data: Vec<u8>) -> SheetscanResult<()> {
        self.blobs.write().await.insert(path.to_string(), data);
        Ok(())
    }

    async fn get(&self, path: &str) -> SheetscanResult<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(path).cloned())
    }

    async fn delete(&self, path: &str) -> SheetscanResult<bool> {
        Ok(self.blobs.write().await.remove(path).is_some())
    }

    async fn list(&self, prefix: &str) -> SheetscanResult<Vec<String>> {
        let blobs = self.blobs.read().await;
        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect())
    }
}

/// Blobs stored as plain Redis strings under `{namespace}:{path}`.
pub struct RedisBlobStore {
    connection: RedisPool,
    namespace: String,
}

impl RedisBlobStore {
    pub fn new(connection: RedisPool, namespace: impl Into<String>) -> Self {
        Self {
            connection,
            namespace: namespace.into(),
        }
    }

    fn key(&self, path: &str) -> String {
        format!("{}:{}", self.namespace, path)
    }

    fn path<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.namespace)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(key)
    }
}

#[async_trait]
impl BlobStore for RedisBlobStore {
    async fn put(&self, path: &str, data: Vec<u8>) -> SheetscanResult<()> {
        let mut connection = self.connection.clone();
        let _: () = connection.set(self.key(path), data).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> SheetscanResult<Option<Vec<u8>>> {
        let mut connection = self.connection.clone();
        let data: Option<Vec<u8>> = connection.get(self.key(path)).await?;
        Ok(data)
    }

    async fn delete(&self, path: &str) -> SheetscanResult<bool> {
        let mut connection = self.connection.clone();
        let removed: usize = connection.del(self.key(path)).await?;
        Ok(removed > 0)
    }

    async fn list(&self, prefix: &str) -> SheetscanResult<Vec<String>> {
        let mut connection = self.connection.clone();
        let pattern = format!("{}*", escape_glob(&self.key(prefix)));

        let mut cursor: u64 = 0;
        let mut paths = Vec::new();
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut connection)
                .await?;

            paths.extend(keys.iter().map(|key| self.path(key).to_string()));
            if next == 0 {
                break;
            }
            cursor = next;
        }

        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}
