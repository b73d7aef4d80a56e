//! 端到端用例：服务 + 后台扇出任务 + 记录推送

use std::sync::Arc;

use application::{
    channels, events, ChatServices, FanoutWorker, KeyValueStore, ManualClock, MemoryStore,
    PlaintextPasswordHasher, RecordingPublisher, ServiceAdapters,
};
use config::AppConfig;
use domain::{RoomType, TokenStatus, Username};
use tokio::sync::oneshot;

fn build() -> (ChatServices, FanoutWorker, Arc<RecordingPublisher>) {
    let clock = Arc::new(ManualClock::default());
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(clock.clone()));
    let publisher = Arc::new(RecordingPublisher::default());
    let (services, worker) = ChatServices::build(
        &AppConfig::default(),
        ServiceAdapters {
            store,
            publisher: publisher.clone(),
            password_hasher: Arc::new(PlaintextPasswordHasher),
            clock,
        },
    )
    .expect("services");
    (services, worker, publisher)
}

#[tokio::test]
async fn test_private_conversation_flow() {
    let (services, worker, publisher) = build();
    let (stop, stopped) = oneshot::channel::<()>();
    let worker = tokio::spawn(worker.run(async {
        let _ = stopped.await;
    }));

    let alice = Username::parse("alice").unwrap();
    let bob = Username::parse("bob").unwrap();
    services.users.create(&alice, Some("secret")).await.unwrap();
    services.users.create(&bob, None).await.unwrap();

    let token = services.tokens.issue(&alice).await.unwrap();
    assert_eq!(
        services.tokens.validate(&alice, &token, false).await.unwrap(),
        TokenStatus::Valid
    );

    let room = services
        .rooms
        .create(RoomType::Private, None, vec![bob.clone()], &alice)
        .await
        .unwrap();
    let message = services
        .messages
        .send(room.id.as_str(), "alice", "hi bob")
        .await
        .unwrap();
    services.rooms.leave(&room.id, &bob).await.unwrap();

    // 关闭信号发出后，worker 处理完队列中剩余的事件才退出
    stop.send(()).unwrap();
    worker.await.unwrap();

    let bob_events: Vec<String> = publisher
        .on_channel(&channels::user(&bob))
        .into_iter()
        .map(|published| published.event)
        .collect();
    assert!(bob_events.contains(&events::ROOMS_UPDATED.to_owned()));
    assert!(bob_events.contains(&events::NEW_MESSAGE.to_owned()));

    let room_events = publisher.on_channel(&channels::room(&room.id));
    assert_eq!(room_events[0].event, events::NEW_MESSAGE);
    assert_eq!(room_events[0].payload["message"]["id"], message.id.to_string());
    assert_eq!(room_events.last().unwrap().event, events::ROOM_DELETED);

    // 匿名频道从未看到私有房间
    for published in publisher.on_channel(channels::PUBLIC_ROOMS) {
        let rooms = published.payload["rooms"].as_array().unwrap().clone();
        assert!(rooms.iter().all(|r| r["type"] == "public"));
    }
}
