use std::sync::Arc;
use std::time::Duration;

use domain::{RoomId, Username};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::store::{keys, KeyValueStore};

/// 在线状态跟踪器
///
/// 每条在线记录是 (房间, 用户) 上带 TTL 的键，键存在即在线。
/// 客户端崩溃无需处理，记录会在 TTL 后自然过期。
/// 房间在线人数只是缓存，由 [`PresenceTracker::recompute_room_count`] 从在线记录重新计算。
pub struct PresenceTracker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// 写入或覆盖在线记录
    pub async fn mark_present(
        &self,
        room_id: &RoomId,
        username: &Username,
    ) -> Result<(), ApplicationError> {
        let key = keys::presence(room_id, username);
        let seen_at = self.clock.now().to_rfc3339();
        self.store.set(&key, &seen_at, Some(self.ttl)).await?;

        tracing::debug!(room_id = %room_id, username = %username, "用户在线");
        Ok(())
    }

    /// 仅延长已有记录的 TTL，不会恢复已过期或已移除的在线状态
    pub async fn refresh(
        &self,
        room_id: &RoomId,
        username: &Username,
    ) -> Result<bool, ApplicationError> {
        let key = keys::presence(room_id, username);
        Ok(self.store.expire(&key, self.ttl).await?)
    }

    /// 枚举房间内未过期的在线用户，按用户名排序
    pub async fn list_active(&self, room_id: &RoomId) -> Result<Vec<Username>, ApplicationError> {
        let prefix = keys::presence_prefix(room_id);
        let keys = self.store.scan_prefix(&prefix).await?;

        let mut users: Vec<Username> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|name| Username::parse(name).ok())
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }

    /// 从在线记录重新计算并写回房间人数缓存
    pub async fn recompute_room_count(&self, room_id: &RoomId) -> Result<u64, ApplicationError> {
        let count = self.list_active(room_id).await?.len() as u64;
        self.store
            .set(&keys::room_count(room_id), &count.to_string(), None)
            .await?;

        tracing::debug!(room_id = %room_id, count, "重新计算房间在线人数");
        Ok(count)
    }

    /// 读取人数缓存，缺失时视为 0
    pub async fn cached_count(&self, room_id: &RoomId) -> Result<u64, ApplicationError> {
        let raw = self.store.get(&keys::room_count(room_id)).await?;
        Ok(raw.and_then(|raw| raw.parse().ok()).unwrap_or(0))
    }

    /// 显式离开：立即删除记录，返回记录是否存在
    pub async fn remove(
        &self,
        room_id: &RoomId,
        username: &Username,
    ) -> Result<bool, ApplicationError> {
        let removed = self
            .store
            .delete(&[keys::presence(room_id, username)])
            .await?;

        if removed > 0 {
            tracing::debug!(room_id = %room_id, username = %username, "用户离开房间");
        }
        Ok(removed > 0)
    }

    /// 清除房间的全部在线记录和人数缓存（房间删除时调用）
    pub async fn clear_room(&self, room_id: &RoomId) -> Result<(), ApplicationError> {
        let mut doomed = self.store.scan_prefix(&keys::presence_prefix(room_id)).await?;
        doomed.push(keys::room_count(room_id));
        self.store.delete(&doomed).await?;
        Ok(())
    }
}
