//! 单元测试共用的内存环境

use std::sync::{Arc, Mutex};

use config::AppConfig;
use domain::{ChatRoom, RoomType, Username};

use crate::broadcaster::{
    BroadcastCoordinator, FanoutEvent, FanoutWorker, PushPublisher, RecordingPublisher,
};
use crate::clock::ManualClock;
use crate::container::{ChatServices, ServiceAdapters};
use crate::messages::MessagePipeline;
use crate::password::PlaintextPasswordHasher;
use crate::rooms::RoomDirectory;
use crate::store::{KeyValueStore, MemoryStore};
use crate::users::UserDirectory;

pub(crate) struct Harness {
    pub config: AppConfig,
    pub clock: Arc<ManualClock>,
    pub store: Arc<dyn KeyValueStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub users: Arc<UserDirectory>,
    pub rooms: Arc<RoomDirectory>,
    pub messages: Arc<MessagePipeline>,
    pub coordinator: Arc<BroadcastCoordinator>,
    pub admin: Username,
    worker: Mutex<FanoutWorker>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let publisher = Arc::new(RecordingPublisher::default());
        Self::build(config, publisher.clone(), publisher)
    }

    pub fn with_publisher(publisher: Arc<dyn PushPublisher>) -> Self {
        Self::build(
            AppConfig::default(),
            publisher,
            Arc::new(RecordingPublisher::default()),
        )
    }

    fn build(
        config: AppConfig,
        publisher: Arc<dyn PushPublisher>,
        recording: Arc<RecordingPublisher>,
    ) -> Self {
        let clock = Arc::new(ManualClock::default());
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(clock.clone()));
        let (services, worker) = ChatServices::build(
            &config,
            ServiceAdapters {
                store: store.clone(),
                publisher,
                password_hasher: Arc::new(PlaintextPasswordHasher),
                clock: clock.clone(),
            },
        )
        .unwrap();

        Self {
            config,
            clock,
            store,
            publisher: recording,
            users: services.users,
            rooms: services.rooms,
            messages: services.messages,
            coordinator: services.coordinator,
            admin: services.admin,
            worker: Mutex::new(worker),
        }
    }

    pub async fn user(&self, name: &str) -> Username {
        let username = Username::parse(name).unwrap();
        self.users.create(&username, None).await.unwrap();
        username
    }

    pub async fn public_room(&self, name: &str) -> ChatRoom {
        self.rooms
            .create(RoomType::Public, Some(name), Vec::new(), &self.admin)
            .await
            .unwrap()
    }

    /// 取出目前为止入队的扇出事件
    pub fn drain_events(&self) -> Vec<FanoutEvent> {
        self.worker.lock().unwrap().take_pending()
    }
}
