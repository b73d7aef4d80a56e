//! 内存实现的键值存储（用于测试和单机开发）
//!
//! 过期时间按注入的 [`Clock`] 计算，测试中配合 `ManualClock` 可以确定性地模拟 TTL 到期。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::Timestamp;
use tokio::sync::Mutex;

use super::{KeyValueStore, StoreError, StoreResult};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Timestamp>,
}

pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn deadline(&self, ttl: Duration) -> Timestamp {
        let now = self.clock.now();
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// 清理已过期的键
    fn purge(&self, entries: &mut HashMap<String, Entry>) {
        let now = self.clock.now();
        entries.retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::backend(format!("WRONGTYPE operation against key {key}"))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries);
        match entries.get(key) {
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries);
        Ok(keys
            .iter()
            .map(|key| match entries.get(key) {
                Some(Entry {
                    value: Value::Str(value),
                    ..
                }) => Some(value.clone()),
                _ => None,
            })
            .collect())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        let expires_at = ttl.map(|ttl| self.deadline(ttl));
        entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Str(value.to_owned()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries);
        if entries.contains_key(key) {
            return Ok(false);
        }
        let expires_at = ttl.map(|ttl| self.deadline(ttl));
        entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Str(value.to_owned()),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries);
        let removed = keys
            .iter()
            .filter(|key| entries.remove(key.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries);
        Ok(entries.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries);
        let deadline = self.deadline(ttl);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> StoreResult<i64> {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries);
        let deadline = self.deadline(window);
        let entry = entries.entry(key.to_owned()).or_insert_with(|| Entry {
            value: Value::Str("0".to_owned()),
            expires_at: None,
        });

        let current = match &entry.value {
            Value::Str(raw) => raw
                .parse::<i64>()
                .map_err(|_| StoreError::backend(format!("value at {key} is not an integer")))?,
            Value::List(_) => return Err(wrong_type(key)),
        };
        let next = current + 1;
        entry.value = Value::Str(next.to_string());
        if entry.expires_at.is_none() {
            entry.expires_at = Some(deadline);
        }
        Ok(next)
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries);
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn list_push_capped(&self, key: &str, value: &str, cap: usize) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries);
        let entry = entries.entry(key.to_owned()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::List(list) => {
                list.push_front(value.to_owned());
                list.truncate(cap);
                Ok(())
            }
            Value::Str(_) => Err(wrong_type(key)),
        }
    }

    async fn list_range(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries);
        match entries.get(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.iter().take(limit).cloned().collect()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn list_remove(&self, key: &str, value: &str) -> StoreResult<u64> {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries);
        match entries.get_mut(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let before = list.len();
                list.retain(|item| item != value);
                Ok((before - list.len()) as u64)
            }
            Some(_) => Err(wrong_type(key)),
            None => Ok(0),
        }
    }
}
