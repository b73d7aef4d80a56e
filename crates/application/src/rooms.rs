use std::sync::Arc;

use domain::{ChatRoom, DomainError, RoomId, RoomType, Username};

use crate::broadcaster::{FanoutEvent, FanoutQueue};
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::presence::PresenceTracker;
use crate::store::{create_json, get_json, keys, KeyValueStore};
use crate::users::UserDirectory;

/// 离开房间的结果
#[derive(Debug, Clone, PartialEq)]
pub enum LeaveOutcome {
    /// 从未在房间中，什么也没做
    NotPresent,
    Left(ChatRoom),
    /// 私有房间成员不足，已解散
    Dissolved,
}

pub struct RoomDirectoryDependencies {
    pub store: Arc<dyn KeyValueStore>,
    pub presence: Arc<PresenceTracker>,
    pub users: Arc<UserDirectory>,
    pub fanout: FanoutQueue,
    pub clock: Arc<dyn Clock>,
    pub admin: Username,
}

/// 房间目录：创建、可见性过滤、加入/离开以及管理员删除
pub struct RoomDirectory {
    deps: RoomDirectoryDependencies,
}

impl RoomDirectory {
    pub fn new(deps: RoomDirectoryDependencies) -> Self {
        Self { deps }
    }

    pub fn is_admin(&self, username: &Username) -> bool {
        username == &self.deps.admin
    }

    /// 创建房间。公共房间只能由管理员创建；私有房间自动加入创建者。
    pub async fn create(
        &self,
        room_type: RoomType,
        name: Option<&str>,
        members: Vec<Username>,
        requested_by: &Username,
    ) -> Result<ChatRoom, ApplicationError> {
        let now = self.deps.clock.now();
        let room = match room_type {
            RoomType::Public => {
                if !self.is_admin(requested_by) {
                    tracing::info!(username = %requested_by, "非管理员尝试创建公共房间");
                    return Err(DomainError::InsufficientPermissions.into());
                }
                let name = name.ok_or_else(|| DomainError::invalid_argument("name", "is required"))?;
                ChatRoom::new_public(RoomId::generate(), name, now)?
            }
            RoomType::Private => {
                for member in &members {
                    if member != requested_by && !self.deps.users.exists(member).await? {
                        return Err(DomainError::UserNotFound.into());
                    }
                }
                ChatRoom::new_private(RoomId::generate(), requested_by, members, now)?
            }
        };

        // 成员键先于房间记录写入，房间可见时成员已经就位
        for member in room.members() {
            self.deps
                .store
                .set(&keys::room_member(&room.id, member), "1", None)
                .await?;
        }
        let created = create_json(self.deps.store.as_ref(), &keys::room(&room.id), &room).await?;
        if !created {
            return Err(ApplicationError::infrastructure("room id collision"));
        }

        tracing::info!(room_id = %room.id, room_type = ?room.room_type, "房间已创建");
        self.announce(&room);
        Ok(room)
    }

    /// 房间记录，私有房间成员取自成员键，人数为缓存值
    pub async fn find(&self, room_id: &RoomId) -> Result<Option<ChatRoom>, ApplicationError> {
        let room: Option<ChatRoom> = get_json(self.deps.store.as_ref(), &keys::room(room_id)).await?;
        match room {
            Some(mut room) => {
                self.load_members(&mut room).await?;
                room.user_count = self.deps.presence.cached_count(room_id).await?;
                Ok(Some(room))
            }
            None => Ok(None),
        }
    }

    /// 读取房间并从在线记录重新计算人数
    pub async fn get(&self, room_id: &RoomId) -> Result<ChatRoom, ApplicationError> {
        let mut room = self.require(room_id).await?;
        room.user_count = self.deps.presence.recompute_room_count(room_id).await?;
        Ok(room)
    }

    /// 全部房间，按创建时间排序
    pub async fn list_all(&self) -> Result<Vec<ChatRoom>, ApplicationError> {
        let store = self.deps.store.as_ref();
        let room_keys = store.scan_prefix(keys::ROOM_PREFIX).await?;
        let raw_rooms = store.get_many(&room_keys).await?;

        let mut rooms = Vec::with_capacity(raw_rooms.len());
        for (key, raw) in room_keys.iter().zip(raw_rooms) {
            let Some(raw) = raw else { continue };
            match serde_json::from_str::<ChatRoom>(&raw) {
                Ok(room) => rooms.push(room),
                Err(err) => tracing::warn!(key = %key, error = %err, "跳过无法解析的房间记录"),
            }
        }

        for room in rooms.iter_mut() {
            self.load_members(room).await?;
        }

        let count_keys: Vec<String> = rooms.iter().map(|room| keys::room_count(&room.id)).collect();
        let counts = store.get_many(&count_keys).await?;
        for (room, count) in rooms.iter_mut().zip(counts) {
            room.user_count = count.and_then(|raw| raw.parse().ok()).unwrap_or(0);
        }

        rooms.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(rooms)
    }

    /// 匿名访问者只能看到公共房间，私有房间只对成员可见
    pub async fn list_visible(
        &self,
        viewer: Option<&Username>,
    ) -> Result<Vec<ChatRoom>, ApplicationError> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|room| room.is_visible_to(viewer))
            .collect())
    }

    pub async fn join(
        &self,
        room_id: &RoomId,
        username: &Username,
    ) -> Result<ChatRoom, ApplicationError> {
        let mut room = self.require(room_id).await?;
        if !self.deps.users.exists(username).await? {
            return Err(DomainError::UserNotFound.into());
        }
        if room.is_private() && !room.is_member(username) {
            return Err(ApplicationError::authorization(
                "not a member of this private room",
            ));
        }

        self.deps.presence.mark_present(room_id, username).await?;
        self.deps.users.touch(username).await?;
        room.user_count = self.deps.presence.recompute_room_count(room_id).await?;

        tracing::info!(room_id = %room_id, username = %username, count = room.user_count, "用户加入房间");
        self.announce(&room);
        Ok(room)
    }

    /// 离开房间。从未在线的用户离开是无操作的成功。
    ///
    /// 私有房间的成员资格按成员键逐个原子删除，是否解散取决于删除后剩余的成员键，
    /// 并发离开时只有真正删掉房间记录的一方发出解散通知。
    pub async fn leave(
        &self,
        room_id: &RoomId,
        username: &Username,
    ) -> Result<LeaveOutcome, ApplicationError> {
        let mut room = self.require(room_id).await?;
        let was_present = self.deps.presence.remove(room_id, username).await?;
        let was_member = room.is_private()
            && self
                .deps
                .store
                .delete(&[keys::room_member(room_id, username)])
                .await?
                > 0;
        if !was_present && !was_member {
            return Ok(LeaveOutcome::NotPresent);
        }

        room.user_count = self.deps.presence.recompute_room_count(room_id).await?;

        if !room.is_private() {
            tracing::info!(room_id = %room_id, username = %username, "用户离开公共房间");
            self.deps.fanout.emit(FanoutEvent::RoomsChanged);
            return Ok(LeaveOutcome::Left(room));
        }

        let affected = room.members().to_vec();
        room.replace_members(self.current_members(room_id).await?);
        if room.should_dissolve() {
            if self.remove_room_data(room_id).await? {
                tracing::info!(room_id = %room_id, username = %username, "私有房间成员不足，已解散");
                self.deps.fanout.emit(FanoutEvent::RoomDeleted {
                    room_id: room_id.clone(),
                });
                self.deps.fanout.emit(FanoutEvent::RoomsChangedFor(affected));
            }
            return Ok(LeaveOutcome::Dissolved);
        }

        tracing::info!(room_id = %room_id, username = %username, "用户退出私有房间");
        self.deps.fanout.emit(FanoutEvent::RoomsChangedFor(affected));
        Ok(LeaveOutcome::Left(room))
    }

    /// 管理员删除房间及其消息和在线记录
    pub async fn delete(
        &self,
        room_id: &RoomId,
        requested_by: &Username,
    ) -> Result<(), ApplicationError> {
        if !self.is_admin(requested_by) {
            return Err(DomainError::InsufficientPermissions.into());
        }
        let room = self.require(room_id).await?;
        self.remove_room_data(room_id).await?;

        tracing::info!(room_id = %room_id, "管理员删除房间");
        self.deps.fanout.emit(FanoutEvent::RoomDeleted {
            room_id: room_id.clone(),
        });
        self.announce(&room);
        Ok(())
    }

    /// 房间内的在线用户
    pub async fn active_users(&self, room_id: &RoomId) -> Result<Vec<Username>, ApplicationError> {
        self.require(room_id).await?;
        self.deps.presence.list_active(room_id).await
    }

    async fn require(&self, room_id: &RoomId) -> Result<ChatRoom, ApplicationError> {
        self.find(room_id)
            .await?
            .ok_or_else(|| DomainError::RoomNotFound.into())
    }

    /// 删除房间的全部数据，返回房间记录是否由本次调用删除
    async fn remove_room_data(&self, room_id: &RoomId) -> Result<bool, ApplicationError> {
        let store = self.deps.store.as_ref();
        let removed = store.delete(&[keys::room(room_id)]).await? > 0;

        let mut leftovers = store.scan_prefix(&keys::room_member_prefix(room_id)).await?;
        leftovers.push(keys::messages(room_id));
        store.delete(&leftovers).await?;
        self.deps.presence.clear_room(room_id).await?;
        Ok(removed)
    }

    /// 私有房间的成员列表以成员键为准
    async fn load_members(&self, room: &mut ChatRoom) -> Result<(), ApplicationError> {
        if room.is_private() {
            let members = self.current_members(&room.id).await?;
            room.replace_members(members);
        }
        Ok(())
    }

    async fn current_members(&self, room_id: &RoomId) -> Result<Vec<Username>, ApplicationError> {
        let prefix = keys::room_member_prefix(room_id);
        Ok(self
            .deps
            .store
            .scan_prefix(&prefix)
            .await?
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|name| Username::parse(name).ok())
            .collect())
    }

    /// 公共房间变化推送给所有人，私有房间只推送给成员
    fn announce(&self, room: &ChatRoom) {
        let event = if room.is_private() {
            FanoutEvent::RoomsChangedFor(room.members().to_vec())
        } else {
            FanoutEvent::RoomsChanged
        };
        self.deps.fanout.emit(event);
    }
}
