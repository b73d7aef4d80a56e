//! 服务容器
//!
//! 根据配置和外部适配器（存储、推送、密码哈希、时钟）组装全部应用服务。

use std::sync::Arc;

use config::AppConfig;
use domain::Username;

use crate::broadcaster::{BroadcastCoordinator, FanoutQueue, FanoutWorker, PushPublisher};
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::messages::{MessagePipeline, MessagePipelineDependencies, MessagePolicy};
use crate::password::PasswordHasher;
use crate::presence::PresenceTracker;
use crate::rate_limiter::RateLimiter;
use crate::rooms::{RoomDirectory, RoomDirectoryDependencies};
use crate::store::KeyValueStore;
use crate::tokens::{TokenAuthority, TokenPolicy};
use crate::users::{UserDirectory, UserDirectoryDependencies, UserSearchPolicy};

/// 外部适配器
pub struct ServiceAdapters {
    pub store: Arc<dyn KeyValueStore>,
    pub publisher: Arc<dyn PushPublisher>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct ChatServices {
    pub users: Arc<UserDirectory>,
    pub tokens: Arc<TokenAuthority>,
    pub presence: Arc<PresenceTracker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rooms: Arc<RoomDirectory>,
    pub messages: Arc<MessagePipeline>,
    pub coordinator: Arc<BroadcastCoordinator>,
    pub admin: Username,
}

impl ChatServices {
    /// 组装服务，同时返回需要由调用方 spawn 的扇出任务
    pub fn build(
        config: &AppConfig,
        adapters: ServiceAdapters,
    ) -> Result<(Self, FanoutWorker), ApplicationError> {
        let admin = Username::parse(config.auth.admin_username.as_str())?;
        let ServiceAdapters {
            store,
            publisher,
            password_hasher,
            clock,
        } = adapters;

        let (fanout, receiver) = FanoutQueue::channel(config.push.queue_capacity);

        let users = Arc::new(UserDirectory::new(UserDirectoryDependencies {
            store: store.clone(),
            password_hasher,
            clock: clock.clone(),
            search: UserSearchPolicy {
                min_query_len: config.users.min_search_len,
                limit: config.users.search_limit,
            },
        }));
        let tokens = Arc::new(TokenAuthority::new(
            store.clone(),
            users.clone(),
            TokenPolicy {
                access_ttl: config.auth.access_ttl(),
                grace_ttl: config.auth.grace_ttl(),
            },
        ));
        let presence = Arc::new(PresenceTracker::new(
            store.clone(),
            clock.clone(),
            config.presence.ttl(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(store.clone(), config.rate_limit.clone()));
        let rooms = Arc::new(RoomDirectory::new(RoomDirectoryDependencies {
            store: store.clone(),
            presence: presence.clone(),
            users: users.clone(),
            fanout: fanout.clone(),
            clock: clock.clone(),
            admin: admin.clone(),
        }));
        let messages = Arc::new(MessagePipeline::new(MessagePipelineDependencies {
            store,
            users: users.clone(),
            presence: presence.clone(),
            rooms: rooms.clone(),
            rate_limiter: rate_limiter.clone(),
            fanout,
            clock,
            policy: MessagePolicy {
                max_length: config.messages.max_length,
                retention: config.messages.retention,
            },
        }));
        let coordinator = Arc::new(BroadcastCoordinator::new(
            rooms.clone(),
            users.clone(),
            publisher,
        ));
        let worker = FanoutWorker::new(receiver, coordinator.clone());

        tracing::debug!(admin = %admin, "应用服务已组装");
        Ok((
            Self {
                users,
                tokens,
                presence,
                rate_limiter,
                rooms,
                messages,
                coordinator,
                admin,
            },
            worker,
        ))
    }
}
