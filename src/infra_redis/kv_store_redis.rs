use crate::domain_port::*;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Value};

/// Redis-backed store. The connection manager reconnects on use, so
/// `ensure_connected` is a PING through it. Batches are pipelined; Redis
/// pipelines are not transactions, and a command-level error fails the
/// whole pipeline query, so such an error is surfaced on every reply and
/// callers abort conservatively.
pub struct RedisKeyValueStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisKeyValueStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        RedisKeyValueStore {
            conn,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    fn map_err(err: RedisError) -> StoreError {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
        {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.key(key)).await.map_err(Self::map_err)?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(self.key(key), value, ttl_secs)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(self.key(key)).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(self.key(key)).await.map_err(Self::map_err)?;
        Ok(found)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(self.key(key)).await.map_err(Self::map_err)?;
        Ok(match ttl {
            -2 => KeyTtl::Absent,
            -1 => KeyTtl::NoExpiry,
            secs => KeyTtl::Seconds(secs.max(0) as u64),
        })
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn
            .incr(self.key(key), 1i64)
            .await
            .map_err(Self::map_err)?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: bool = conn
            .expire(self.key(key), ttl_secs as i64)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn add_to_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .sadd(self.key(key), member)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .srem(self.key(key), member)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .smembers(self.key(key))
            .await
            .map_err(Self::map_err)?;
        Ok(members)
    }

    async fn execute(&self, commands: Vec<BatchCommand>) -> Result<BatchOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for command in &commands {
            match command {
                BatchCommand::SetWithTtl {
                    key,
                    value,
                    ttl_secs,
                } => {
                    pipe.set_ex(self.key(key), value, *ttl_secs);
                }
                BatchCommand::Delete { key } => {
                    pipe.del(self.key(key));
                }
                BatchCommand::Expire { key, ttl_secs } => {
                    pipe.expire(self.key(key), *ttl_secs as i64);
                }
                BatchCommand::AddToSet { key, member } => {
                    pipe.sadd(self.key(key), member);
                }
                BatchCommand::RemoveFromSet { key, member } => {
                    pipe.srem(self.key(key), member);
                }
                BatchCommand::SetMembers { key } => {
                    pipe.smembers(self.key(key));
                }
                BatchCommand::Get { key } => {
                    pipe.get(self.key(key));
                }
            }
        }

        let values: Vec<Value> = match pipe.query_async(&mut conn).await {
            Ok(values) => values,
            Err(err) => {
                let mapped = Self::map_err(err);
                if mapped.is_unavailable() {
                    return Err(mapped);
                }
                // a command-level error aborts the pipeline reply as a whole
                return Ok(BatchOutcome::all_failed(commands.len(), &mapped.to_string()));
            }
        };

        let mut replies = Vec::with_capacity(commands.len());
        for (command, value) in commands.iter().zip(values) {
            let reply = match command {
                BatchCommand::SetMembers { .. } => redis::from_redis_value::<Vec<String>>(&value)
                    .map(BatchReply::Members)
                    .unwrap_or_else(|e| BatchReply::Failed(e.to_string())),
                BatchCommand::Get { .. } => redis::from_redis_value::<Option<String>>(&value)
                    .map(BatchReply::Value)
                    .unwrap_or_else(|e| BatchReply::Failed(e.to_string())),
                _ => BatchReply::Done,
            };
            replies.push(reply);
        }
        if replies.len() < commands.len() {
            let missing = commands.len() - replies.len();
            replies.extend(
                std::iter::repeat_with(|| {
                    BatchReply::Failed("pipeline returned too few replies".to_string())
                })
                .take(missing),
            );
        }
        Ok(BatchOutcome { replies })
    }

    async fn is_available(&self) -> bool {
        self.ensure_connected().await.is_ok()
    }

    async fn ensure_connected(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }
}
