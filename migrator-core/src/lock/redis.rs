//! Redis lock service
//!
//! `acquire` is `SET key owner NX PX ttl`. `release`, `is_held` and `extend`
//! run as server-side scripts so the owner comparison and the delete or
//! expiry reset happen in one step on the server.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::time::Duration;

use super::{LockService, OwnerToken};
use crate::error::{MigratorError, MigratorResult};

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const IS_HELD_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return 1
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Lock service backed by a shared redis instance
#[derive(Clone)]
pub struct RedisLockService {
    conn: MultiplexedConnection,
    release_script: Script,
    is_held_script: Script,
    extend_script: Script,
}

impl RedisLockService {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`)
    pub async fn connect(url: &str) -> MigratorResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| MigratorError::Configuration(format!("invalid redis url: {}", e)))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            release_script: Script::new(RELEASE_SCRIPT),
            is_held_script: Script::new(IS_HELD_SCRIPT),
            extend_script: Script::new(EXTEND_SCRIPT),
        }
    }
}

fn unavailable(e: redis::RedisError) -> MigratorError {
    MigratorError::LockUnavailable(e.to_string())
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LockService for RedisLockService {
    async fn acquire(&self, key: &str, ttl: Duration) -> MigratorResult<Option<OwnerToken>> {
        let owner = OwnerToken::generate();
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(reply.map(|_| owner))
    }

    async fn release(&self, key: &str, owner: &OwnerToken) -> MigratorResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(owner.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(deleted == 1)
    }

    async fn is_held(&self, key: &str, owner: &OwnerToken) -> MigratorResult<bool> {
        let mut conn = self.conn.clone();
        let held: i64 = self
            .is_held_script
            .key(key)
            .arg(owner.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(held == 1)
    }

    async fn extend(&self, key: &str, owner: &OwnerToken, ttl: Duration) -> MigratorResult<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .extend_script
            .key(key)
            .arg(owner.as_str())
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(extended == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::from_secs(120)), 120_000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
    }

    #[tokio::test]
    #[ignore = "requires a redis server at MIGRATOR_TEST_REDIS_URL"]
    async fn test_redis_compare_and_delete() {
        let url = std::env::var("MIGRATOR_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let locks = RedisLockService::connect(&url).await.unwrap();
        let key = format!("test:lock:migration:{}", uuid::Uuid::new_v4());

        let owner = locks
            .acquire(&key, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(locks.acquire(&key, Duration::from_secs(5)).await.unwrap().is_none());
        assert!(!locks.release(&key, &OwnerToken::generate()).await.unwrap());
        assert!(locks.is_held(&key, &owner).await.unwrap());
        assert!(locks.extend(&key, &owner, Duration::from_secs(5)).await.unwrap());
        assert!(!locks
            .extend(&key, &OwnerToken::generate(), Duration::from_secs(5))
            .await
            .unwrap());
        assert!(locks.release(&key, &owner).await.unwrap());
    }
}
