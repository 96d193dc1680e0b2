//! Work queue with visibility timeouts.
//!
//! A received message is hidden for the visibility period and reappears if
//! it is neither deleted nor extended in time. Every receive or extend hands
//! out a fresh receipt; only the latest receipt may extend or delete.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use sheetscan_utils::{SheetscanError, SheetscanResult};

use crate::redis::RedisPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub receipt: String,
    pub body: String,
    pub dequeue_count: u32,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Returns the new message id.
    async fn enqueue(&self, body: &str) -> SheetscanResult<String>;

    async fn receive(&self, visibility: Duration) -> SheetscanResult<Option<QueueMessage>>;

    /// Hides the message for another `visibility` from now.
    async fn extend(&self, message: &QueueMessage, visibility: Duration) -> SheetscanResult<QueueMessage>;

    async fn delete(&self, message: &QueueMessage) -> SheetscanResult<()>;

    /// Messages in the queue, visible or not.
    async fn len(&self) -> SheetscanResult<usize>;
}

fn stale_receipt(message: &QueueMessage) -> SheetscanError {
    SheetscanError::queue(format!(
        "receipt for message {} is no longer valid",
        message.id
    ))
}

struct MemoryEntry {
    sequence: u64,
    body: String,
    visible_at: Instant,
    receipt: Option<String>,
    dequeue_count: u32,
}

#[derive(Default)]
struct MemoryState {
    next_sequence: u64,
    entries: BTreeMap<String, MemoryEntry>,
}

/// In-process queue. Time comes from `tokio::time`, so tests can pause it.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, body: &str) -> SheetscanResult<String> {
        let mut state = self.state.lock().await;
        let id = Uuid::new_v4().to_string();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.entries.insert(
            id.clone(),
            MemoryEntry {
                sequence,
                body: body.to_string(),
                visible_at: Instant::now(),
                receipt: None,
                dequeue_count: 0,
            },
        );
        Ok(id)
    }

    async fn receive(&self, visibility: Duration) -> SheetscanResult<Option<QueueMessage>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let next = state
            .entries
            .iter_mut()
            .filter(|(_, entry)| entry.visible_at <= now)
            .min_by_key(|(_, entry)| entry.sequence);

        Ok(next.map(|(id, entry)| {
            let receipt = Uuid::new_v4().to_string();
            entry.visible_at = now + visibility;
            entry.receipt = Some(receipt.clone());
            entry.dequeue_count += 1;
            QueueMessage {
                id: id.clone(),
                receipt,
                body: entry.body.clone(),
                dequeue_count: entry.dequeue_count,
            }
        }))
    }

    async fn extend(&self, message: &QueueMessage, visibility: Duration) -> SheetscanResult<QueueMessage> {
        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .get_mut(&message.id)
            .filter(|entry| entry.receipt.as_deref() == Some(message.receipt.as_str()))
            .ok_or_else(|| stale_receipt(message))?;

        let receipt = Uuid::new_v4().to_string();
        entry.visible_at = Instant::now() + visibility;
        entry.receipt = Some(receipt.clone());

        Ok(QueueMessage {
            receipt,
            ..message.clone()
        })
    }

    async fn delete(&self, message: &QueueMessage) -> SheetscanResult<()> {
        let mut state = self.state.lock().await;
        let owned = state
            .entries
            .get(&message.id)
            .map(|entry| entry.receipt.as_deref() == Some(message.receipt.as_str()))
            .unwrap_or(false);
        if !owned {
            return Err(stale_receipt(message));
        }
        state.entries.remove(&message.id);
        Ok(())
    }

    async fn len(&self) -> SheetscanResult<usize> {
        Ok(self.state.lock().await.entries.len())
    }
}

const RECEIVE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
    return false
end
local id = ids[1]
redis.call('ZADD', KEYS[1], tonumber(ARGV[1]) + tonumber(ARGV[2]), id)
redis.call('HSET', KEYS[3], id, ARGV[3])
local count = redis.call('HINCRBY', KEYS[4], id, 1)
local body = redis.call('HGET', KEYS[2], id)
return {id, body, count}
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[3], ARGV[1]) ~= ARGV[2] then
    return 0
end
redis.call('ZADD', KEYS[1], 'XX', tonumber(ARGV[4]) + tonumber(ARGV[5]), ARGV[1])
redis.call('HSET', KEYS[3], ARGV[1], ARGV[3])
return 1
"#;

const DELETE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[3], ARGV[1]) ~= ARGV[2] then
    return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
return 1
"#;

/// Redis-backed queue: a sorted set scored by visible-at epoch millis plus
/// hashes for bodies, receipts and dequeue counts. Claims go through Lua so
/// two workers can never receive the same message at once.
pub struct RedisQueue {
    connection: RedisPool,
    keys: [String; 4],
    receive_script: redis::Script,
    extend_script: redis::Script,
    delete_script: redis::Script,
}

impl RedisQueue {
    pub fn new(connection: RedisPool, name: &str) -> Self {
        Self {
            connection,
            keys: [
                format!("{}:visible", name),
                format!("{}:bodies", name),
                format!("{}:receipts", name),
                format!("{}:counts", name),
            ],
            receive_script: redis::Script::new(RECEIVE_SCRIPT),
            extend_script: redis::Script::new(EXTEND_SCRIPT),
            delete_script: redis::Script::new(DELETE_SCRIPT),
        }
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn enqueue(&self, body: &str) -> SheetscanResult<String> {
        let mut connection = self.connection.clone();
        let id = Uuid::new_v4().to_string();

        let _: () = redis::pipe()
            .atomic()
            .hset(&self.keys[1], &id, body)
            .ignore()
            .zadd(&self.keys[0], &id, Self::now_millis())
            .ignore()
            .query_async(&mut connection)
            .await?;
        Ok(id)
    }

    async fn receive(&self, visibility: Duration) -> SheetscanResult<Option<QueueMessage>> {
        let mut connection = self.connection.clone();
        let receipt = Uuid::new_v4().to_string();

        let claimed: Option<(String, String, u32)> = self
            .receive_script
            .key(&self.keys[0])
            .key(&self.keys[1])
            .key(&self.keys[2])
            .key(&self.keys[3])
            .arg(Self::now_millis())
            .arg(visibility.as_millis() as i64)
            .arg(&receipt)
            .invoke_async(&mut connection)
            .await?;

        Ok(claimed.map(|(id, body, dequeue_count)| QueueMessage {
            id,
            receipt,
            body,
            dequeue_count,
        }))
    }

    async fn extend(&self, message: &QueueMessage, visibility: Duration) -> SheetscanResult<QueueMessage> {
        let mut connection = self.connection.clone();
        let receipt = Uuid::new_v4().to_string();

        let updated: i64 = self
            .extend_script
            .key(&self.keys[0])
            .key(&self.keys[1])
            .key(&self.keys[2])
            .key(&self.keys[3])
            .arg(&message.id)
            .arg(&message.receipt)
            .arg(&receipt)
            .arg(Self::now_millis())
            .arg(visibility.as_millis() as i64)
            .invoke_async(&mut connection)
            .await?;

        if updated == 0 {
            return Err(stale_receipt(message));
        }
        Ok(QueueMessage {
            receipt,
            ..message.clone()
        })
    }

    async fn delete(&self, message: &QueueMessage) -> SheetscanResult<()> {
        let mut connection = self.connection.clone();

        let removed: i64 = self
            .delete_script
            .key(&self.keys[0])
            .key(&self.keys[1])
            .key(&self.keys[2])
            .key(&self.keys[3])
            .arg(&message.id)
            .arg(&message.receipt)
            .invoke_async(&mut connection)
            .await?;

        if removed == 0 {
            return Err(stale_receipt(message));
        }
        Ok(())
    }

    async fn len(&self) -> SheetscanResult<usize> {
        let mut connection = self.connection.clone();
        let count: usize = redis::cmd("ZCARD")
            .arg(&self.keys[0])
            .query_async(&mut connection)
            .await?;
        Ok(count)
    }
}
