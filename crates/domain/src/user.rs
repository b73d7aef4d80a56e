use serde::{Deserialize, Serialize};

use crate::value_objects::{Timestamp, Username};

/// 用户实体。首次发言或加入房间时创建，永不过期。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: Username,
    pub created_at: Timestamp,
    pub last_active: Timestamp,
    /// 可选密码（bcrypt 哈希），匿名创建的用户为空
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

impl User {
    pub fn new(username: Username, now: Timestamp) -> Self {
        Self {
            username,
            created_at: now,
            last_active: now,
            password_hash: None,
        }
    }

    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    pub fn touch(&mut self, now: Timestamp) {
        if now > self.last_active {
            self.last_active = now;
        }
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}
