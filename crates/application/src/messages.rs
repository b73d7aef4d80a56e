use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use domain::{
    ChatRoom, DomainError, Message, MessageContent, MessageId, RoomId, Username,
};
use serde::Serialize;

use crate::broadcaster::{FanoutEvent, FanoutQueue};
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::presence::PresenceTracker;
use crate::rate_limiter::RateLimiter;
use crate::rooms::RoomDirectory;
use crate::store::{keys, KeyValueStore};
use crate::users::UserDirectory;

/// 发送中标记的存活时间，进程在写入前崩溃时由过期兜底
const SEND_CLAIM_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct MessagePolicy {
    pub max_length: usize,
    /// 每个房间保留的最新消息条数
    pub retention: usize,
}

/// 批量读取结果，未知或非法的房间ID单独列出
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkMessages {
    pub messages: BTreeMap<String, Vec<Message>>,
    pub not_found: Vec<String>,
}

pub struct MessagePipelineDependencies {
    pub store: Arc<dyn KeyValueStore>,
    pub users: Arc<UserDirectory>,
    pub presence: Arc<PresenceTracker>,
    pub rooms: Arc<RoomDirectory>,
    pub rate_limiter: Arc<RateLimiter>,
    pub fanout: FanoutQueue,
    pub clock: Arc<dyn Clock>,
    pub policy: MessagePolicy,
}

/// 消息管道：校验、限流、清洗、去重、持久化，然后触发扇出
pub struct MessagePipeline {
    deps: MessagePipelineDependencies,
}

impl MessagePipeline {
    pub fn new(deps: MessagePipelineDependencies) -> Self {
        Self { deps }
    }

    pub async fn send(
        &self,
        room_id: &str,
        username: &str,
        raw_content: &str,
    ) -> Result<Message, ApplicationError> {
        let room_id = RoomId::parse(room_id)?;
        let username = Username::parse(username)?;

        // 私有房间不受发言频率限制
        let room = self.deps.rooms.find(&room_id).await?;
        if let Some(room) = room.as_ref().filter(|room| !room.is_private()) {
            self.deps
                .rate_limiter
                .check_chat_burst(&room.id, &username)
                .await?;
        }
        let room = room.ok_or(DomainError::RoomNotFound)?;
        if room.is_private() && !room.is_member(&username) {
            return Err(ApplicationError::authorization(
                "not a member of this private room",
            ));
        }

        self.deps.users.ensure_exists(&username).await?;
        let content = MessageContent::sanitize(raw_content, self.deps.policy.max_length)?;

        // 同一发送者的并发提交先争用发送中标记，相同内容的后来者直接判为重复
        let claim = keys::send_claim(&room_id, &username);
        let claimed = self
            .deps
            .store
            .set_if_absent(&claim, content.as_str(), Some(SEND_CLAIM_TTL))
            .await?;
        if !claimed && self.deps.store.get(&claim).await?.as_deref() == Some(content.as_str()) {
            tracing::info!(room_id = %room_id, username = %username, "拒绝并发的重复消息");
            return Err(DomainError::DuplicateMessage.into());
        }

        let saved = self.persist(&room_id, &username, content).await;
        if claimed {
            if let Err(err) = self.deps.store.delete(&[claim]).await {
                tracing::warn!(room_id = %room_id, username = %username, error = %err, "释放发送中标记失败");
            }
        }
        let message = saved?;

        self.deps.users.touch(&username).await?;
        // 只延长已有的在线记录，离开房间后发言不会重新上线
        self.deps.presence.refresh(&room_id, &username).await?;
        self.deps.presence.recompute_room_count(&room_id).await?;

        tracing::debug!(room_id = %room_id, username = %username, message_id = %message.id, "消息已保存");
        self.deps.fanout.emit(FanoutEvent::MessagePosted {
            message: message.clone(),
            members: private_members(&room),
        });
        Ok(message)
    }

    /// 最新的若干条消息，新消息在前
    pub async fn list(&self, room_id: &RoomId) -> Result<Vec<Message>, ApplicationError> {
        if self.deps.rooms.find(room_id).await?.is_none() {
            return Err(DomainError::RoomNotFound.into());
        }
        Ok(self
            .stored(&keys::messages(room_id))
            .await?
            .into_iter()
            .map(|(_, message)| message)
            .collect())
    }

    pub async fn list_bulk(&self, room_ids: &[String]) -> Result<BulkMessages, ApplicationError> {
        let mut bulk = BulkMessages::default();
        for raw_id in room_ids {
            let raw_id = raw_id.trim();
            if raw_id.is_empty() || bulk.messages.contains_key(raw_id) {
                continue;
            }
            let Ok(room_id) = RoomId::parse(raw_id) else {
                bulk.not_found.push(raw_id.to_owned());
                continue;
            };
            match self.list(&room_id).await {
                Ok(messages) => {
                    bulk.messages.insert(room_id.to_string(), messages);
                }
                Err(ApplicationError::Domain(DomainError::RoomNotFound)) => {
                    bulk.not_found.push(raw_id.to_owned());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(bulk)
    }

    /// 管理员删除单条消息
    pub async fn delete(
        &self,
        room_id: &RoomId,
        message_id: MessageId,
        requested_by: &Username,
    ) -> Result<(), ApplicationError> {
        if !self.deps.rooms.is_admin(requested_by) {
            return Err(DomainError::InsufficientPermissions.into());
        }
        if self.deps.rooms.find(room_id).await?.is_none() {
            return Err(DomainError::RoomNotFound.into());
        }

        let key = keys::messages(room_id);
        let raw = self
            .stored(&key)
            .await?
            .into_iter()
            .find(|(_, message)| message.id == message_id)
            .map(|(raw, _)| raw)
            .ok_or(DomainError::MessageNotFound)?;
        self.deps.store.list_remove(&key, &raw).await?;

        tracing::info!(room_id = %room_id, message_id = %message_id, "管理员删除消息");
        self.deps.fanout.emit(FanoutEvent::MessageDeleted {
            room_id: room_id.clone(),
            message_id,
        });
        Ok(())
    }

    /// 与上一条消息去重后写入房间历史
    async fn persist(
        &self,
        room_id: &RoomId,
        username: &Username,
        content: MessageContent,
    ) -> Result<Message, ApplicationError> {
        let key = keys::messages(room_id);
        if let Some(previous) = self.previous_from(&key, username).await? {
            if previous.is_duplicate_of(username, &content) {
                tracing::info!(room_id = %room_id, username = %username, "拒绝重复消息");
                return Err(DomainError::DuplicateMessage.into());
            }
        }

        let message = Message::new(
            MessageId::generate(),
            room_id.clone(),
            username.clone(),
            content,
            self.deps.clock.now(),
        );
        let raw = serde_json::to_string(&message).map_err(crate::store::StoreError::from)?;
        self.deps
            .store
            .list_push_capped(&key, &raw, self.deps.policy.retention)
            .await?;
        Ok(message)
    }

    /// 同一用户在该房间的上一条消息
    async fn previous_from(
        &self,
        key: &str,
        username: &Username,
    ) -> Result<Option<Message>, ApplicationError> {
        Ok(self
            .stored(key)
            .await?
            .into_iter()
            .map(|(_, message)| message)
            .find(|message| &message.username == username))
    }

    /// 原始记录和解析后的消息，跳过损坏的记录
    async fn stored(&self, key: &str) -> Result<Vec<(String, Message)>, ApplicationError> {
        let raw = self
            .deps
            .store
            .list_range(key, self.deps.policy.retention)
            .await?;
        Ok(raw
            .into_iter()
            .filter_map(|raw| match serde_json::from_str::<Message>(&raw) {
                Ok(message) => Some((raw, message)),
                Err(err) => {
                    tracing::warn!(key, error = %err, "跳过无法解析的消息记录");
                    None
                }
            })
            .collect())
    }
}

fn private_members(room: &ChatRoom) -> Vec<Username> {
    if room.is_private() {
        room.members().to_vec()
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::RateLimitError;
    use crate::testing::Harness;
    use config::AppConfig;
    use domain::RoomType;

    fn relaxed_interval() -> AppConfig {
        let mut config = AppConfig::default();
        config.rate_limit.chat_min_interval_ms = 0;
        config
    }

    #[tokio::test]
    async fn burst_in_public_room_is_limited() {
        let harness = Harness::with_config(relaxed_interval());
        let room = harness.public_room("Lobby").await;
        let limit = harness.config.rate_limit.chat_short_limit;

        for i in 0..limit {
            harness
                .messages
                .send(room.id.as_str(), "alice", &format!("message {i}"))
                .await
                .unwrap();
        }
        let result = harness
            .messages
            .send(room.id.as_str(), "alice", "one too many")
            .await;
        assert!(matches!(
            result,
            Err(ApplicationError::RateLimited(RateLimitError::ShortBurst { .. }))
        ));
    }

    #[tokio::test]
    async fn private_rooms_are_exempt_from_bursts() {
        let harness = Harness::new();
        let alice = harness.user("alice").await;
        let bob = harness.user("bob").await;
        let room = harness
            .rooms
            .create(RoomType::Private, None, vec![bob], &alice)
            .await
            .unwrap();

        for i in 0..=harness.config.rate_limit.chat_short_limit {
            harness
                .messages
                .send(room.id.as_str(), "alice", &format!("message {i}"))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn immediate_duplicate_conflicts() {
        let harness = Harness::with_config(relaxed_interval());
        let room = harness.public_room("Lobby").await;

        harness
            .messages
            .send(room.id.as_str(), "alice", "hello")
            .await
            .unwrap();
        assert!(matches!(
            harness.messages.send(room.id.as_str(), "alice", "hello").await,
            Err(ApplicationError::Domain(DomainError::DuplicateMessage))
        ));
        harness
            .messages
            .send(room.id.as_str(), "alice", "hello again")
            .await
            .unwrap();
        // 其他用户发送相同内容不算重复
        harness
            .messages
            .send(room.id.as_str(), "bob", "hello again")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn content_is_escaped_and_urls_survive() {
        let harness = Harness::new();
        let room = harness.public_room("Lobby").await;

        let message = harness
            .messages
            .send(
                room.id.as_str(),
                "alice",
                "<script>alert(1)</script> see http://x.test",
            )
            .await
            .unwrap();

        assert_eq!(
            message.content,
            "&lt;script&gt;alert(1)&lt;/script&gt; see http://x.test"
        );
        let stored = harness.messages.list(&room.id).await.unwrap();
        assert_eq!(stored[0].content, message.content);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let harness = Harness::with_config(relaxed_interval());
        let room = harness.public_room("Lobby").await;
        let too_long = "x".repeat(harness.config.messages.max_length + 1);

        for (room_id, username, content) in [
            ("../bad", "alice", "hi"),
            (room.id.as_str(), "a", "hi"),
            (room.id.as_str(), "alice", "   "),
            (room.id.as_str(), "alice", too_long.as_str()),
        ] {
            assert!(matches!(
                harness.messages.send(room_id, username, content).await,
                Err(ApplicationError::Domain(DomainError::InvalidArgument { .. }))
            ));
        }

        assert!(matches!(
            harness.messages.send("missing", "alice", "hi").await,
            Err(ApplicationError::Domain(DomainError::RoomNotFound))
        ));
    }

    #[tokio::test]
    async fn first_message_creates_user_but_not_presence() {
        let harness = Harness::new();
        let room = harness.public_room("Lobby").await;

        harness
            .messages
            .send(room.id.as_str(), "Newcomer", "hi")
            .await
            .unwrap();

        let newcomer = Username::parse("newcomer").unwrap();
        assert!(harness.users.exists(&newcomer).await.unwrap());
        assert_eq!(harness.rooms.get(&room.id).await.unwrap().user_count, 0);
    }

    #[tokio::test]
    async fn sending_after_leave_does_not_rejoin() {
        let harness = Harness::new();
        let alice = harness.user("alice").await;
        let room = harness.public_room("Lobby").await;

        harness.rooms.join(&room.id, &alice).await.unwrap();
        harness.rooms.leave(&room.id, &alice).await.unwrap();
        harness
            .messages
            .send(room.id.as_str(), "alice", "still here?")
            .await
            .unwrap();

        assert!(harness.rooms.active_users(&room.id).await.unwrap().is_empty());
        assert_eq!(harness.rooms.get(&room.id).await.unwrap().user_count, 0);
    }

    #[tokio::test]
    async fn sending_keeps_joined_members_present() {
        let harness = Harness::new();
        let alice = harness.user("alice").await;
        let room = harness.public_room("Lobby").await;
        harness.rooms.join(&room.id, &alice).await.unwrap();

        harness.clock.advance(harness.config.presence.ttl() / 2);
        harness
            .messages
            .send(room.id.as_str(), "alice", "ping")
            .await
            .unwrap();
        harness.clock.advance(harness.config.presence.ttl() / 2);

        assert_eq!(
            harness.rooms.active_users(&room.id).await.unwrap(),
            vec![alice]
        );
    }

    #[tokio::test]
    async fn in_flight_claim_rejects_identical_content() {
        let harness = Harness::new();
        let alice = harness.user("alice").await;
        let bob = harness.user("bob").await;
        let room = harness
            .rooms
            .create(RoomType::Private, None, vec![bob], &alice)
            .await
            .unwrap();
        let claim = keys::send_claim(&room.id, &alice);

        // 另一个请求正在写入同样的内容
        harness.store.set(&claim, "hello", None).await.unwrap();
        assert!(matches!(
            harness.messages.send(room.id.as_str(), "alice", "hello").await,
            Err(ApplicationError::Domain(DomainError::DuplicateMessage))
        ));
        // 内容不同的提交照常写入，且不会删除别人的标记
        harness
            .messages
            .send(room.id.as_str(), "alice", "something else")
            .await
            .unwrap();
        assert!(harness.store.exists(&claim).await.unwrap());

        harness.store.delete(&[claim.clone()]).await.unwrap();
        harness
            .messages
            .send(room.id.as_str(), "alice", "hello")
            .await
            .unwrap();
        assert!(!harness.store.exists(&claim).await.unwrap());
    }

    #[tokio::test]
    async fn retention_keeps_newest_messages() {
        let mut config = relaxed_interval();
        config.messages.retention = 3;
        config.rate_limit.chat_short_limit = 100;
        let harness = Harness::with_config(config);
        let room = harness.public_room("Lobby").await;

        for i in 0..5 {
            harness
                .messages
                .send(room.id.as_str(), "alice", &format!("message {i}"))
                .await
                .unwrap();
        }

        let contents: Vec<String> = harness
            .messages
            .list(&room.id)
            .await
            .unwrap()
            .into_iter()
            .map(|message| message.content)
            .collect();
        assert_eq!(contents, vec!["message 4", "message 3", "message 2"]);
    }

    #[tokio::test]
    async fn bulk_reports_unknown_rooms_separately() {
        let harness = Harness::new();
        let room = harness.public_room("Lobby").await;
        harness
            .messages
            .send(room.id.as_str(), "alice", "hi")
            .await
            .unwrap();

        let bulk = harness
            .messages
            .list_bulk(&[room.id.to_string(), "missing".into(), "../bad".into()])
            .await
            .unwrap();

        assert_eq!(bulk.messages[room.id.as_str()].len(), 1);
        assert_eq!(bulk.not_found, vec!["missing", "../bad"]);
    }

    #[tokio::test]
    async fn private_messages_fan_out_to_members() {
        let harness = Harness::new();
        let alice = harness.user("alice").await;
        let bob = harness.user("bob").await;
        let room = harness
            .rooms
            .create(RoomType::Private, None, vec![bob.clone()], &alice)
            .await
            .unwrap();
        harness.drain_events();

        let message = harness
            .messages
            .send(room.id.as_str(), "bob", "psst")
            .await
            .unwrap();
        assert_eq!(
            harness.drain_events(),
            vec![FanoutEvent::MessagePosted {
                message,
                members: vec![alice, bob],
            }]
        );
    }

    #[tokio::test]
    async fn admin_deletes_messages() {
        let harness = Harness::new();
        let alice = harness.user("alice").await;
        let room = harness.public_room("Lobby").await;
        let message = harness
            .messages
            .send(room.id.as_str(), "alice", "oops")
            .await
            .unwrap();

        assert!(matches!(
            harness.messages.delete(&room.id, message.id, &alice).await,
            Err(ApplicationError::Domain(DomainError::InsufficientPermissions))
        ));

        harness.drain_events();
        harness
            .messages
            .delete(&room.id, message.id, &harness.admin)
            .await
            .unwrap();
        assert!(harness.messages.list(&room.id).await.unwrap().is_empty());
        assert_eq!(
            harness.drain_events(),
            vec![FanoutEvent::MessageDeleted {
                room_id: room.id.clone(),
                message_id: message.id,
            }]
        );
        assert!(matches!(
            harness
                .messages
                .delete(&room.id, message.id, &harness.admin)
                .await,
            Err(ApplicationError::Domain(DomainError::MessageNotFound))
        ));
    }
}
