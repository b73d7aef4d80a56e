//! 推送发布器
//!
//! - [`RedisPushPublisher`]: 通过 Redis PUBLISH 推送，由网关进程转发给在线客户端
//! - [`HttpPushPublisher`]: 调用托管推送服务的 REST 接口
//! - [`LoggingPushPublisher`]: 只写日志，用于本地开发

mod http;
mod logging;
mod redis_channel;

use serde::Serialize;
use serde_json::Value;

pub use http::HttpPushPublisher;
pub use logging::LoggingPushPublisher;
pub use redis_channel::RedisPushPublisher;

/// 推送到频道上的统一消息格式
#[derive(Debug, Serialize)]
pub struct PushEnvelope<'a> {
    pub channel: &'a str,
    pub event: &'a str,
    pub data: &'a Value,
}
