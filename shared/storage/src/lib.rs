pub mod blob;
pub mod checkpoint;
pub mod graph;
pub mod keywords;
pub mod migrations;
pub mod postgres;
pub mod queue;
pub mod redis;

pub use blob::{BlobStore, MemoryBlobStore, RedisBlobStore};
pub use checkpoint::{decode_doc_key, doc_key, CheckpointStore, PageArtifact};
pub use graph::{GraphSnapshot, GraphStore, GraphTx, MemoryGraphStore, PgGraphStore};
pub use keywords::{GlobalKeywords, KeywordStore};
pub use postgres::{create_postgres_pool, health_check as postgres_health_check, PostgresPool};
pub use queue::{MemoryQueue, QueueMessage, RedisQueue, WorkQueue};
pub use redis::{create_redis_pool, health_check as redis_health_check, RedisPool};
