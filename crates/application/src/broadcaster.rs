//! 推送扇出
//!
//! 请求处理器只把 [`FanoutEvent`] 放进有界队列，由 [`FanoutWorker`] 在后台取出，
//! 交给 [`BroadcastCoordinator`] 计算目标频道并调用 [`PushPublisher`]。
//! 推送是尽力而为的：队列满时丢弃事件，推送失败只记录日志，不会影响原请求。

use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain::{ChatRoom, Message, MessageId, RoomId, Username};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::rooms::RoomDirectory;
use crate::users::UserDirectory;

/// 推送频道命名
pub mod channels {
    use domain::{RoomId, Username};

    /// 匿名访问者订阅的公共房间列表
    pub const PUBLIC_ROOMS: &str = "public-rooms";

    pub fn user(username: &Username) -> String {
        format!("user-{username}")
    }

    pub fn room(room_id: &RoomId) -> String {
        format!("room-{room_id}")
    }
}

/// 推送事件名
pub mod events {
    pub const ROOMS_UPDATED: &str = "rooms-updated";
    pub const NEW_MESSAGE: &str = "new-message";
    pub const MESSAGE_DELETED: &str = "message-deleted";
    pub const ROOM_DELETED: &str = "room-deleted";
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push failed: {0}")]
    Failed(String),
    #[error("push timed out")]
    Timeout,
}

impl PushError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 托管推送服务端口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushPublisher: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<(), PushError>;
}

/// 状态变更后需要推送的领域事件
#[derive(Debug, Clone, PartialEq)]
pub enum FanoutEvent {
    /// 房间集合变化，向公共频道和所有已知用户推送可见房间列表
    RoomsChanged,
    /// 只影响少数用户的变化（例如私有房间解散）
    RoomsChangedFor(Vec<Username>),
    /// 新消息；私有房间额外推送到每个成员的个人频道
    MessagePosted {
        message: Message,
        members: Vec<Username>,
    },
    MessageDeleted {
        room_id: RoomId,
        message_id: MessageId,
    },
    RoomDeleted {
        room_id: RoomId,
    },
}

/// 扇出队列的发送端，可以随意克隆
#[derive(Clone)]
pub struct FanoutQueue {
    sender: mpsc::Sender<FanoutEvent>,
}

impl FanoutQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FanoutEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// 非阻塞入队，失败只记录日志
    pub fn emit(&self, event: FanoutEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(?event, "扇出队列已满，丢弃事件");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::warn!(?event, "扇出队列已关闭，丢弃事件");
            }
        }
    }
}

/// 决定每次变更推送到哪些频道
pub struct BroadcastCoordinator {
    rooms: Arc<RoomDirectory>,
    users: Arc<UserDirectory>,
    publisher: Arc<dyn PushPublisher>,
}

impl BroadcastCoordinator {
    pub fn new(
        rooms: Arc<RoomDirectory>,
        users: Arc<UserDirectory>,
        publisher: Arc<dyn PushPublisher>,
    ) -> Self {
        Self {
            rooms,
            users,
            publisher,
        }
    }

    pub async fn handle(&self, event: FanoutEvent) {
        match event {
            FanoutEvent::RoomsChanged => self.push_rooms_to_everyone().await,
            FanoutEvent::RoomsChangedFor(users) => self.push_rooms_to(&users).await,
            FanoutEvent::MessagePosted { message, members } => {
                let payload = json!({ "roomId": message.room_id, "message": message });
                self.publish(&channels::room(&message.room_id), events::NEW_MESSAGE, &payload)
                    .await;
                for member in &members {
                    self.publish(&channels::user(member), events::NEW_MESSAGE, &payload)
                        .await;
                }
            }
            FanoutEvent::MessageDeleted {
                room_id,
                message_id,
            } => {
                let payload = json!({ "roomId": room_id, "messageId": message_id });
                self.publish(&channels::room(&room_id), events::MESSAGE_DELETED, &payload)
                    .await;
            }
            FanoutEvent::RoomDeleted { room_id } => {
                let payload = json!({ "roomId": room_id });
                self.publish(&channels::room(&room_id), events::ROOM_DELETED, &payload)
                    .await;
            }
        }
    }

    async fn push_rooms_to_everyone(&self) {
        let Some(rooms) = self.load_rooms().await else {
            return;
        };

        let public: Vec<&ChatRoom> = rooms.iter().filter(|room| !room.is_private()).collect();
        self.publish(
            channels::PUBLIC_ROOMS,
            events::ROOMS_UPDATED,
            &json!({ "rooms": public }),
        )
        .await;

        let usernames = match self.users.known_usernames().await {
            Ok(usernames) => usernames,
            Err(err) => {
                tracing::warn!(error = %err, "读取用户列表失败，跳过个人频道推送");
                return;
            }
        };
        for username in &usernames {
            self.push_visible(&rooms, username).await;
        }
        tracing::debug!(users = usernames.len(), "房间列表已推送");
    }

    async fn push_rooms_to(&self, users: &[Username]) {
        let Some(rooms) = self.load_rooms().await else {
            return;
        };
        for username in users {
            self.push_visible(&rooms, username).await;
        }
    }

    async fn push_visible(&self, rooms: &[ChatRoom], username: &Username) {
        let visible: Vec<&ChatRoom> = rooms
            .iter()
            .filter(|room| room.is_visible_to(Some(username)))
            .collect();
        self.publish(
            &channels::user(username),
            events::ROOMS_UPDATED,
            &json!({ "rooms": visible }),
        )
        .await;
    }

    async fn load_rooms(&self) -> Option<Vec<ChatRoom>> {
        match self.rooms.list_all().await {
            Ok(rooms) => Some(rooms),
            Err(err) => {
                tracing::warn!(error = %err, "读取房间列表失败，跳过推送");
                None
            }
        }
    }

    async fn publish(&self, channel: &str, event: &str, payload: &Value) {
        if let Err(err) = self.publisher.publish(channel, event, payload).await {
            tracing::warn!(channel, event, error = %err, "推送失败");
        }
    }
}

/// 后台扇出任务
pub struct FanoutWorker {
    receiver: mpsc::Receiver<FanoutEvent>,
    coordinator: Arc<BroadcastCoordinator>,
}

impl FanoutWorker {
    pub fn new(receiver: mpsc::Receiver<FanoutEvent>, coordinator: Arc<BroadcastCoordinator>) -> Self {
        Self {
            receiver,
            coordinator,
        }
    }

    /// 持续处理事件直到收到关闭信号，然后关闭队列并处理完剩余事件
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                event = self.receiver.recv() => match event {
                    Some(event) => self.coordinator.handle(event).await,
                    None => break,
                },
                _ = &mut shutdown => {
                    self.receiver.close();
                    break;
                }
            }
        }

        let mut drained = 0usize;
        while let Some(event) = self.receiver.recv().await {
            self.coordinator.handle(event).await;
            drained += 1;
        }
        tracing::info!(drained, "扇出任务已停止");
    }

    /// 取出已入队但尚未处理的事件
    #[cfg(test)]
    pub(crate) fn take_pending(&mut self) -> Vec<FanoutEvent> {
        let mut pending = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            pending.push(event);
        }
        pending
    }
}

/// 一次推送记录
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub channel: String,
    pub event: String,
    pub payload: Value,
}

/// 把推送记录在内存中的发布器（测试用）
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<PublishedEvent>>,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<PublishedEvent> {
        self.published
            .lock()
            .map(|published| published.clone())
            .unwrap_or_default()
    }

    pub fn on_channel(&self, channel: &str) -> Vec<PublishedEvent> {
        self.published()
            .into_iter()
            .filter(|published| published.channel == channel)
            .collect()
    }
}

#[async_trait]
impl PushPublisher for RecordingPublisher {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<(), PushError> {
        let mut published = self
            .published
            .lock()
            .map_err(|_| PushError::failed("recording publisher poisoned"))?;
        published.push(PublishedEvent {
            channel: channel.to_owned(),
            event: event.to_owned(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use domain::RoomType;

    fn user(name: &str) -> Username {
        Username::parse(name).unwrap()
    }

    #[tokio::test]
    async fn rooms_changed_filters_each_viewer() {
        let harness = Harness::new();
        let alice = harness.user("alice").await;
        let bob = harness.user("bob").await;
        let carol = harness.user("carol").await;
        harness
            .rooms
            .create(RoomType::Public, Some("Lobby"), Vec::new(), &harness.admin)
            .await
            .unwrap();
        let private = harness
            .rooms
            .create(RoomType::Private, None, vec![bob.clone()], &alice)
            .await
            .unwrap();

        harness.coordinator.handle(FanoutEvent::RoomsChanged).await;

        let rooms_in = |channel: &str| -> Vec<String> {
            let last = harness.publisher.on_channel(channel).pop().unwrap();
            assert_eq!(last.event, events::ROOMS_UPDATED);
            last.payload["rooms"]
                .as_array()
                .unwrap()
                .iter()
                .map(|room| room["id"].as_str().unwrap().to_owned())
                .collect()
        };

        let public = rooms_in(channels::PUBLIC_ROOMS);
        assert_eq!(public.len(), 1);
        assert!(!public.contains(&private.id.to_string()));
        assert!(rooms_in(&channels::user(&alice)).contains(&private.id.to_string()));
        assert!(rooms_in(&channels::user(&bob)).contains(&private.id.to_string()));
        assert!(!rooms_in(&channels::user(&carol)).contains(&private.id.to_string()));
    }

    #[tokio::test]
    async fn narrow_change_only_reaches_listed_users() {
        let harness = Harness::new();
        let alice = harness.user("alice").await;
        harness.user("bob").await;

        harness
            .coordinator
            .handle(FanoutEvent::RoomsChangedFor(vec![alice.clone()]))
            .await;

        let published = harness.publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].channel, channels::user(&alice));
    }

    #[tokio::test]
    async fn private_message_reaches_member_channels() {
        let harness = Harness::new();
        let alice = harness.user("alice").await;
        let bob = harness.user("bob").await;
        let room = harness
            .rooms
            .create(RoomType::Private, None, vec![bob.clone()], &alice)
            .await
            .unwrap();
        let message = harness
            .messages
            .send(room.id.as_str(), alice.as_str(), "hi bob")
            .await
            .unwrap();

        harness
            .coordinator
            .handle(FanoutEvent::MessagePosted {
                message: message.clone(),
                members: room.members().to_vec(),
            })
            .await;

        let channels: Vec<String> = harness
            .publisher
            .published()
            .into_iter()
            .filter(|published| published.event == events::NEW_MESSAGE)
            .map(|published| published.channel)
            .collect();
        assert_eq!(
            channels,
            vec![
                channels::room(&room.id),
                channels::user(&alice),
                channels::user(&bob),
            ]
        );
    }

    #[tokio::test]
    async fn publisher_failures_are_swallowed() {
        let mut publisher = MockPushPublisher::new();
        publisher
            .expect_publish()
            .times(2)
            .returning(|_, _, _| Err(PushError::Timeout));
        let harness = Harness::with_publisher(Arc::new(publisher));
        harness.user("alice").await;

        // 公共频道 + alice 的个人频道，两次失败都不会向上传播
        harness.coordinator.handle(FanoutEvent::RoomsChanged).await;
    }

    #[tokio::test]
    async fn full_queue_drops_events() {
        let (queue, mut receiver) = FanoutQueue::channel(1);
        queue.emit(FanoutEvent::RoomsChanged);
        queue.emit(FanoutEvent::RoomsChangedFor(vec![user("alice")]));

        assert_eq!(receiver.recv().await, Some(FanoutEvent::RoomsChanged));
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn worker_drains_queue_on_shutdown() {
        let harness = Harness::new();
        let room_id = RoomId::parse("lobby").unwrap();
        let (queue, receiver) = FanoutQueue::channel(8);
        for _ in 0..3 {
            queue.emit(FanoutEvent::RoomDeleted {
                room_id: room_id.clone(),
            });
        }

        let worker = FanoutWorker::new(receiver, harness.coordinator.clone());
        worker.run(std::future::ready(())).await;

        assert_eq!(
            harness.publisher.on_channel(&channels::room(&room_id)).len(),
            3
        );
    }
}
