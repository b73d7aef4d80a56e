//! 基础设施层：Redis 键值存储、推送发布器和密码哈希的具体实现。

pub mod builder;
pub mod password;
pub mod push;
pub mod redis_store;

pub use builder::{Infrastructure, InfrastructureError};
pub use password::BcryptPasswordHasher;
pub use push::{HttpPushPublisher, LoggingPushPublisher, PushEnvelope, RedisPushPublisher};
pub use redis_store::RedisStore;
