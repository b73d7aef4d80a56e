//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - Redis 键值存储
//! - 推送服务
//! - 令牌、在线状态、限流、消息等策略参数
//!
//! 加载顺序：内置默认值 -> `CHAT_CONFIG_FILE` 指定的文件 -> `CHAT_` 前缀环境变量。

use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    /// 共享存储后端，`memory` 只适合单进程开发调试
    pub store: StoreBackend,
    #[validate(nested)]
    pub redis: RedisConfig,
    #[validate(nested)]
    pub push: PushConfig,
    #[validate(nested)]
    pub auth: AuthConfig,
    #[validate(nested)]
    pub presence: PresenceConfig,
    #[validate(nested)]
    pub rate_limit: RateLimitConfig,
    #[validate(nested)]
    pub messages: MessageConfig,
    #[validate(nested)]
    pub users: UserSearchConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            cors_origins: vec!["*".into()],
        }
    }
}

/// 存储后端类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RedisConfig {
    #[validate(length(min = 1))]
    pub url: String,
    /// 单次存储操作超时，超时即失败，不自动重试
    #[validate(range(min = 1))]
    pub operation_timeout_ms: u64,
}

impl RedisConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
            operation_timeout_ms: 3000,
        }
    }
}

/// 推送后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushBackend {
    /// 只记录日志，不实际推送
    Log,
    /// 通过 Redis PUBLISH 推送
    Redis,
    /// 通过托管推送服务的 HTTP 接口推送
    Http,
}

/// 推送服务配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_push_endpoint"))]
pub struct PushConfig {
    pub backend: PushBackend,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// 请求签名密钥（HMAC-SHA256）
    pub api_secret: Option<String>,
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
    /// 待推送事件队列容量，满时丢弃新事件
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
}

impl PushConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            backend: PushBackend::Log,
            endpoint: None,
            api_key: None,
            api_secret: None,
            timeout_ms: 3000,
            queue_capacity: 1024,
        }
    }
}

fn validate_push_endpoint(config: &PushConfig) -> Result<(), ValidationError> {
    let has_endpoint = config
        .endpoint
        .as_deref()
        .is_some_and(|endpoint| !endpoint.trim().is_empty());
    if config.backend == PushBackend::Http && !has_endpoint {
        return Err(ValidationError::new("http_push_requires_endpoint"));
    }
    Ok(())
}

/// 认证配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuthConfig {
    /// 唯一的管理员身份
    #[validate(length(min = 1))]
    pub admin_username: String,
    #[validate(range(min = 1))]
    pub access_ttl_secs: u64,
    /// 已换发令牌的宽限期
    #[validate(range(min = 1))]
    pub grace_ttl_secs: u64,
    #[validate(range(min = 10, max = 14))]
    pub bcrypt_cost: Option<u32>,
}

impl AuthConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_secs)
    }

    pub fn grace_ttl(&self) -> Duration {
        Duration::from_secs(self.grace_ttl_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_username: "admin".into(),
            access_ttl_secs: 90 * 24 * 3600,
            grace_ttl_secs: 365 * 24 * 3600,
            bcrypt_cost: None,
        }
    }
}

/// 在线状态配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PresenceConfig {
    #[validate(range(min = 1))]
    pub ttl_secs: u64,
}

impl PresenceConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self { ttl_secs: 86400 }
    }
}

/// 限流配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RateLimitConfig {
    /// 敏感操作：每个窗口允许的次数
    #[validate(range(min = 1))]
    pub sensitive_max_attempts: u32,
    #[validate(range(min = 1))]
    pub sensitive_window_secs: u64,
    /// 公共房间短窗口突发限制
    #[validate(range(min = 1))]
    pub chat_short_limit: u32,
    #[validate(range(min = 1))]
    pub chat_short_window_secs: u64,
    /// 公共房间长窗口限制
    #[validate(range(min = 1))]
    pub chat_long_limit: u32,
    #[validate(range(min = 1))]
    pub chat_long_window_secs: u64,
    /// 两条消息之间的最小间隔，0 表示不限制
    pub chat_min_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sensitive_max_attempts: 10,
            sensitive_window_secs: 60,
            chat_short_limit: 3,
            chat_short_window_secs: 10,
            chat_long_limit: 20,
            chat_long_window_secs: 60,
            chat_min_interval_ms: 2000,
        }
    }
}

/// 消息配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MessageConfig {
    #[validate(range(min = 1))]
    pub max_length: usize,
    /// 每个房间保留的最近消息数
    #[validate(range(min = 1))]
    pub retention: usize,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            max_length: 500,
            retention: 100,
        }
    }
}

/// 用户搜索配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct UserSearchConfig {
    #[validate(range(min = 1))]
    pub min_search_len: usize,
    #[validate(range(min = 1))]
    pub search_limit: usize,
}

impl Default for UserSearchConfig {
    fn default() -> Self {
        Self {
            min_search_len: 2,
            search_limit: 20,
        }
    }
}

impl AppConfig {
    /// 按默认值 -> 配置文件 -> 环境变量的顺序加载并校验
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("CHAT_CONFIG_FILE") {
            figment = if path.ends_with(".yml") || path.ends_with(".yaml") {
                figment.merge(Yaml::file(path))
            } else if path.ends_with(".json") {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }
        Self::from_figment(figment.merge(Env::prefixed("CHAT_").split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.auth.admin_username, "admin");
        assert_eq!(config.auth.access_ttl(), Duration::from_secs(90 * 24 * 3600));
        assert_eq!(config.rate_limit.chat_short_limit, 3);
        assert_eq!(config.messages.retention, 100);
        assert_eq!(config.store, StoreBackend::Redis);
    }

    #[test]
    fn env_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("CHAT_AUTH__ADMIN_USERNAME", "root");
            jail.set_env("CHAT_RATE_LIMIT__CHAT_SHORT_LIMIT", "5");
            jail.set_env("CHAT_SERVER__PORT", "9090");
            jail.set_env("CHAT_STORE", "memory");

            let config = AppConfig::load().expect("config loads");
            assert_eq!(config.auth.admin_username, "root");
            assert_eq!(config.rate_limit.chat_short_limit, 5);
            assert_eq!(config.server.port, 9090);
            assert_eq!(config.store, StoreBackend::Memory);
            Ok(())
        });
    }

    #[test]
    fn file_is_merged_before_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "chat.toml",
                r#"
                [messages]
                max_length = 200

                [presence]
                ttl_secs = 60
                "#,
            )?;
            jail.set_env("CHAT_CONFIG_FILE", "chat.toml");
            jail.set_env("CHAT_PRESENCE__TTL_SECS", "120");

            let config = AppConfig::load().expect("config loads");
            assert_eq!(config.messages.max_length, 200);
            assert_eq!(config.presence.ttl_secs, 120);
            Ok(())
        });
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = AppConfig::default();
        config.auth.admin_username = String::new();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.messages.retention = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.auth.bcrypt_cost = Some(4);
        assert!(config.validate().is_err());
    }

    #[test]
    fn http_push_requires_endpoint() {
        let mut config = AppConfig::default();
        config.push.backend = PushBackend::Http;
        assert!(config.validate().is_err());

        config.push.endpoint = Some("https://push.example.test/events".into());
        assert!(config.validate().is_ok());
    }
}
