//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：令牌、在线状态、限流、房间、消息和推送扇出，
//! 以及对外部适配器（键值存储、推送服务、密码哈希）的抽象。

pub mod broadcaster;
pub mod clock;
pub mod container;
pub mod error;
pub mod messages;
pub mod password;
pub mod presence;
pub mod rate_limiter;
pub mod rooms;
pub mod store;
pub mod tokens;
pub mod users;

#[cfg(test)]
mod testing;

pub use broadcaster::{
    channels, events, BroadcastCoordinator, FanoutEvent, FanoutQueue, FanoutWorker,
    PublishedEvent, PushError, PushPublisher, RecordingPublisher,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use container::{ChatServices, ServiceAdapters};
pub use error::ApplicationError;
pub use messages::{BulkMessages, MessagePipeline, MessagePolicy};
pub use password::{PasswordHasher, PasswordHasherError, PlaintextPasswordHasher};
pub use presence::PresenceTracker;
pub use rate_limiter::{rate_limit_identifier, RateLimitError, RateLimiter};
pub use rooms::{LeaveOutcome, RoomDirectory};
pub use store::{KeyValueStore, MemoryStore, StoreError, StoreResult};
pub use tokens::{TokenAuthority, TokenPolicy};
pub use users::{UserDirectory, UserDto};
