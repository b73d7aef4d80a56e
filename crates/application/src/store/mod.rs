//! 键值存储端口
//!
//! 所有持久状态都保存在共享的键值存储中，进程内不共享任何可变状态。
//! 并发写入依靠存储自身的原子操作（条件创建、原子自增、TTL 过期）解决。

pub mod keys;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store operation timed out: {operation}")]
    Timeout { operation: &'static str },
    #[error("malformed stored value: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 共享原子键值存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// 批量读取，结果与 `keys` 一一对应
    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// 仅在键不存在时写入（SETNX），返回是否写入成功
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    /// 返回实际删除的键数量
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// 刷新 TTL，键不存在时返回 false 且不创建
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// 原子自增；计数器首次创建时设置窗口过期时间，之后不再延长
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> StoreResult<i64>;

    /// 枚举指定前缀的全部未过期键
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// 头部插入并裁剪到 `cap` 条
    async fn list_push_capped(&self, key: &str, value: &str, cap: usize) -> StoreResult<()>;

    /// 从头部读取最多 `limit` 条
    async fn list_range(&self, key: &str, limit: usize) -> StoreResult<Vec<String>>;

    /// 删除列表中所有等于 `value` 的元素，返回删除数量
    async fn list_remove(&self, key: &str, value: &str) -> StoreResult<u64>;
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> StoreResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw, ttl).await
}

pub async fn create_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StoreResult<bool> {
    let raw = serde_json::to_string(value)?;
    store.set_if_absent(key, &raw, None).await
}
