#![allow(dead_code)]

use std::sync::Arc;

use application::{
    ChatServices, KeyValueStore, ManualClock, MemoryStore, PlaintextPasswordHasher,
    RecordingPublisher, ServiceAdapters,
};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use config::AppConfig;
use serde_json::Value;
use tokio::{sync::oneshot, task::JoinHandle};
use tower::ServiceExt;
use web_api::{router, AppState};

pub struct TestApp {
    pub router: Router,
    pub services: ChatServices,
    pub clock: Arc<ManualClock>,
    pub publisher: Arc<RecordingPublisher>,
    stop: oneshot::Sender<()>,
    worker: JoinHandle<()>,
}

pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let clock = Arc::new(ManualClock::default());
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(clock.clone()));
        let publisher = Arc::new(RecordingPublisher::default());
        let (services, worker) = ChatServices::build(
            &config,
            ServiceAdapters {
                store,
                publisher: publisher.clone(),
                password_hasher: Arc::new(PlaintextPasswordHasher),
                clock: clock.clone(),
            },
        )
        .expect("services");

        let (stop, stopped) = oneshot::channel::<()>();
        let worker = tokio::spawn(worker.run(async {
            let _ = stopped.await;
        }));

        Self {
            router: router(AppState::new(services.clone(), &config.server)),
            services,
            clock,
            publisher,
            stop,
            worker,
        }
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        auth: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((username, token)) = auth {
            builder = builder
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header("x-username", username);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        Reply { status, body }
    }

    pub async fn get(&self, uri: &str) -> Reply {
        self.call(Method::GET, uri, None, None).await
    }

    pub async fn post(&self, action: &str, auth: Option<(&str, &str)>, body: Value) -> Reply {
        self.call(
            Method::POST,
            &format!("/api?action={action}"),
            auth,
            Some(body),
        )
        .await
    }

    /// 注册用户并返回令牌
    pub async fn register(&self, username: &str) -> String {
        let reply = self
            .post(
                "createUser",
                None,
                serde_json::json!({ "username": username, "password": "secret" }),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{:?}", reply.body);
        reply.body["token"].as_str().expect("token").to_owned()
    }

    /// 停止扇出任务，等待队列处理完毕
    pub async fn finish(self) -> Arc<RecordingPublisher> {
        let _ = self.stop.send(());
        self.worker.await.expect("worker");
        self.publisher
    }
}
