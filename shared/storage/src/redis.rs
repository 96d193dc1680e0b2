use anyhow::Result;
use redis::{aio::ConnectionManager, Client};

pub type RedisPool = ConnectionManager;

pub async fn create_redis_pool(redis_url: &str) -> Result<RedisPool> {
    let client = Client::open(redis_url)?;
    let connection_manager = ConnectionManager::new(client).await?;

    tracing::info!("Connected to Redis");
    Ok(connection_manager)
}

pub async fn health_check(pool: &RedisPool) -> Result<()> {
    let mut connection = pool.clone();
    let _: String = redis::cmd("PING")
        .query_async(&mut connection)
        .await
        .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))?;
    Ok(())
}

/// Escapes glob metacharacters so a literal prefix can be used with `SCAN MATCH`.
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("results/documents/aGk=/"), "results/documents/aGk=/");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }
}
