//! 聊天室系统核心领域模型
//!
//! 包含用户、聊天室、消息、访问令牌等核心实体，以及内容过滤等业务规则。

pub mod chat_room;
pub mod content;
pub mod errors;
pub mod message;
pub mod token;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use chat_room::{ChatRoom, RoomType};
pub use content::{contains_profanity, escape_html, filter_profanity, MessageContent};
pub use errors::{DomainError, DomainResult};
pub use message::Message;
pub use token::TokenStatus;
pub use user::User;
pub use value_objects::{AccessToken, MessageId, RoomId, Timestamp, Username};
