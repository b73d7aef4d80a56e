//! Redis 键值存储
//!
//! 使用 `ConnectionManager` 自动重连，每个操作都有独立的超时，超时或失败直接返回错误，不做重试。
//! 计数器的 INCR 和 PEXPIRE NX 在同一个 MULTI 事务里执行，需要 Redis 7 及以上版本。

use std::future::Future;
use std::time::Duration;

use application::{KeyValueStore, StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};

const SCAN_BATCH: usize = 500;

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    timeout: Duration,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
        }
    }

    pub async fn connect(url: &str, timeout: Duration) -> StoreResult<Self> {
        let client = Client::open(url).map_err(|err| StoreError::backend(err.to_string()))?;
        let connection = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Timeout {
                operation: "CONNECT",
            })?
            .map_err(|err| StoreError::backend(format!("连接 Redis 失败: {err}")))?;

        tracing::info!(url, "Redis 连接已建立");
        Ok(Self::new(connection, timeout))
    }

    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    async fn run<T, F>(&self, operation: &'static str, future: F) -> StoreResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                tracing::error!(operation, error = %err, "Redis 操作失败");
                Err(StoreError::backend(err.to_string()))
            }
            Err(_) => {
                tracing::error!(operation, "Redis 操作超时");
                Err(StoreError::Timeout { operation })
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// 转义 glob 特殊字符，前缀按字面匹配
fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection();
        self.run("GET", async move {
            redis::cmd("GET").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection();
        self.run("MGET", async move {
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.connection();
        self.run("SET", async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(millis(ttl));
            }
            cmd.query_async::<()>(&mut conn).await
        })
        .await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut conn = self.connection();
        let reply: Option<String> = self
            .run("SET NX", async move {
                let mut cmd = redis::cmd("SET");
                cmd.arg(key).arg(value).arg("NX");
                if let Some(ttl) = ttl {
                    cmd.arg("PX").arg(millis(ttl));
                }
                cmd.query_async(&mut conn).await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection();
        self.run("DEL", async move {
            redis::cmd("DEL").arg(keys).query_async(&mut conn).await
        })
        .await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection();
        self.run("EXISTS", async move {
            redis::cmd("EXISTS").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection();
        self.run("PEXPIRE", async move {
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(millis(ttl))
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> StoreResult<i64> {
        let mut conn = self.connection();
        let (count,): (i64,) = self
            .run("INCR", async move {
                redis::pipe()
                    .atomic()
                    .cmd("INCR")
                    .arg(key)
                    .cmd("PEXPIRE")
                    .arg(key)
                    .arg(millis(window))
                    .arg("NX")
                    .ignore()
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(count)
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let pattern = scan_pattern(prefix);
        let mut keys = Vec::new();
        let mut cursor = 0u64;
        loop {
            let mut conn = self.connection();
            let pattern = pattern.as_str();
            let (next, batch): (u64, Vec<String>) = self
                .run("SCAN", async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await
                })
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN 可能重复返回同一个键
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn list_push_capped(&self, key: &str, value: &str, cap: usize) -> StoreResult<()> {
        let mut conn = self.connection();
        let stop = cap.max(1) as i64 - 1;
        self.run("LPUSH", async move {
            redis::pipe()
                .atomic()
                .cmd("LPUSH")
                .arg(key)
                .arg(value)
                .ignore()
                .cmd("LTRIM")
                .arg(key)
                .arg(0)
                .arg(stop)
                .ignore()
                .query_async::<()>(&mut conn)
                .await
        })
        .await
    }

    async fn list_range(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection();
        let stop = limit as i64 - 1;
        self.run("LRANGE", async move {
            redis::cmd("LRANGE")
                .arg(key)
                .arg(0)
                .arg(stop)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn list_remove(&self, key: &str, value: &str) -> StoreResult<u64> {
        let mut conn = self.connection();
        self.run("LREM", async move {
            redis::cmd("LREM")
                .arg(key)
                .arg(0)
                .arg(value)
                .query_async(&mut conn)
                .await
        })
        .await
    }
}
