use std::sync::Arc;

use application::{
    Clock, KeyValueStore, MemoryStore, PasswordHasher, PushError, PushPublisher,
    ServiceAdapters, StoreError, SystemClock,
};
use config::{AppConfig, PushBackend, StoreBackend};
use thiserror::Error;

use crate::password::BcryptPasswordHasher;
use crate::push::{HttpPushPublisher, LoggingPushPublisher, RedisPushPublisher};
use crate::redis_store::RedisStore;

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("push error: {0}")]
    Push(#[from] PushError),
    #[error("configuration error: {0}")]
    Config(String),
}

/// 外部适配器集合
#[derive(Clone)]
pub struct Infrastructure {
    pub store: Arc<dyn KeyValueStore>,
    pub publisher: Arc<dyn PushPublisher>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
}

impl Infrastructure {
    /// 按 `store` 配置选择存储后端
    pub async fn from_config(config: &AppConfig) -> Result<Self, InfrastructureError> {
        match config.store {
            StoreBackend::Redis => Self::connect(config).await,
            StoreBackend::Memory => {
                tracing::warn!("使用进程内存储，多实例部署之间不共享状态");
                Ok(Self::in_memory(config))
            }
        }
    }

    /// 连接 Redis 并按配置选择推送后端
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let timeout = config.redis.operation_timeout();
        let store = RedisStore::connect(&config.redis.url, timeout).await?;

        let publisher: Arc<dyn PushPublisher> = match config.push.backend {
            PushBackend::Log => Arc::new(LoggingPushPublisher),
            PushBackend::Redis => Arc::new(RedisPushPublisher::new(
                store.connection(),
                config.push.timeout(),
            )),
            PushBackend::Http => {
                let endpoint = config.push.endpoint.clone().ok_or_else(|| {
                    InfrastructureError::Config("push.endpoint is required".into())
                })?;
                Arc::new(HttpPushPublisher::new(
                    endpoint,
                    config.push.api_key.clone(),
                    config.push.api_secret.as_deref(),
                    config.push.timeout(),
                )?)
            }
        };

        tracing::info!(backend = ?config.push.backend, "基础设施初始化完成");
        Ok(Self {
            store: Arc::new(store),
            publisher,
            password_hasher: Arc::new(BcryptPasswordHasher::new(config.auth.bcrypt_cost)),
            clock: Arc::new(SystemClock),
        })
    }

    /// 单进程内存实现，推送只写日志
    pub fn in_memory(config: &AppConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            store: Arc::new(MemoryStore::new(clock.clone())),
            publisher: Arc::new(LoggingPushPublisher),
            password_hasher: Arc::new(BcryptPasswordHasher::new(config.auth.bcrypt_cost)),
            clock,
        }
    }

    pub fn adapters(&self) -> ServiceAdapters {
        ServiceAdapters {
            store: self.store.clone(),
            publisher: self.publisher.clone(),
            password_hasher: self.password_hasher.clone(),
            clock: self.clock.clone(),
        }
    }
}
