//! 限流器
//!
//! 两种机制都基于存储的原子自增 + 过期，多个请求处理器并发调用时依然正确：
//! 1. 敏感操作限流：按 (操作, 标识) 的固定窗口计数
//! 2. 公共房间发言限流：短窗口、长窗口、最小间隔三条规则同时生效
//!
//! 存储故障时放行请求（可用性优先于精确限流）。

use std::sync::Arc;
use std::time::Duration;

use config::RateLimitConfig;
use domain::{RoomId, Username};

use crate::store::{keys, KeyValueStore};

/// 限流错误类型，每条规则对应不同的提示
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("Too many messages in a short time. Please wait a few seconds ({limit} per {window_secs}s).")]
    ShortBurst { limit: u32, window_secs: u64 },

    #[error("Message limit reached ({limit} per {window_secs}s). Please slow down.")]
    LongBurst { limit: u32, window_secs: u64 },

    #[error("You are sending messages too quickly. Please wait {interval_ms}ms between messages.")]
    MinInterval { interval_ms: u64 },

    #[error("Too many {action} attempts. Please try again later.")]
    ActionLimited {
        action: String,
        limit: u32,
        window_secs: u64,
    },
}

/// 限流主体：已认证用户按用户名，否则按请求来源
pub fn rate_limit_identifier(username: Option<&Username>, origin: &str) -> String {
    match username {
        Some(username) => format!("user:{username}"),
        None => format!("origin:{origin}"),
    }
}

pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// 敏感操作限流：窗口由第一次请求开启，超过次数即拒绝
    pub async fn check_action(&self, action: &str, identifier: &str) -> Result<(), RateLimitError> {
        let key = keys::sensitive_action(action, identifier);
        let window = Duration::from_secs(self.config.sensitive_window_secs);
        let limit = self.config.sensitive_max_attempts;

        match self.count(&key, window).await {
            Some(count) if count > i64::from(limit) => {
                tracing::info!(action, identifier, count, "敏感操作触发限流");
                Err(RateLimitError::ActionLimited {
                    action: action.to_owned(),
                    limit,
                    window_secs: self.config.sensitive_window_secs,
                })
            }
            _ => Ok(()),
        }
    }

    /// 公共房间发言限流，私有房间由调用方跳过
    pub async fn check_chat_burst(
        &self,
        room_id: &RoomId,
        username: &Username,
    ) -> Result<(), RateLimitError> {
        let config = &self.config;

        let short_key = keys::chat_window("short", room_id, username);
        let short_window = Duration::from_secs(config.chat_short_window_secs);
        if let Some(count) = self.count(&short_key, short_window).await {
            if count > i64::from(config.chat_short_limit) {
                tracing::info!(room_id = %room_id, username = %username, count, "短窗口发言限流");
                return Err(RateLimitError::ShortBurst {
                    limit: config.chat_short_limit,
                    window_secs: config.chat_short_window_secs,
                });
            }
        }

        let long_key = keys::chat_window("long", room_id, username);
        let long_window = Duration::from_secs(config.chat_long_window_secs);
        if let Some(count) = self.count(&long_key, long_window).await {
            if count > i64::from(config.chat_long_limit) {
                tracing::info!(room_id = %room_id, username = %username, count, "长窗口发言限流");
                return Err(RateLimitError::LongBurst {
                    limit: config.chat_long_limit,
                    window_secs: config.chat_long_window_secs,
                });
            }
        }

        if config.chat_min_interval_ms > 0 {
            let key = keys::chat_interval(room_id, username);
            let interval = Duration::from_millis(config.chat_min_interval_ms);
            match self.store.set_if_absent(&key, "1", Some(interval)).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(RateLimitError::MinInterval {
                        interval_ms: config.chat_min_interval_ms,
                    })
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "限流存储失败，放行请求");
                }
            }
        }

        Ok(())
    }

    async fn count(&self, key: &str, window: Duration) -> Option<i64> {
        match self.store.incr_with_expiry(key, window).await {
            Ok(count) => Some(count),
            Err(err) => {
                tracing::warn!(key, error = %err, "限流存储失败，放行请求");
                None
            }
        }
    }
}
