use std::sync::Arc;

use domain::{DomainError, User, Username};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::password::PasswordHasher;
use crate::store::{create_json, get_json, keys, set_json, KeyValueStore};

/// 对外暴露的用户信息（不含密码哈希）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub username: Username,
    pub created_at: domain::Timestamp,
    pub last_active: domain::Timestamp,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            created_at: user.created_at,
            last_active: user.last_active,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserSearchPolicy {
    pub min_query_len: usize,
    pub limit: usize,
}

pub struct UserDirectoryDependencies {
    pub store: Arc<dyn KeyValueStore>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
    pub search: UserSearchPolicy,
}

/// 用户目录：账户创建、首次接触时的自动建档、活跃时间和搜索
pub struct UserDirectory {
    deps: UserDirectoryDependencies,
}

impl UserDirectory {
    pub fn new(deps: UserDirectoryDependencies) -> Self {
        Self { deps }
    }

    pub async fn find(&self, username: &Username) -> Result<Option<User>, ApplicationError> {
        Ok(get_json(self.deps.store.as_ref(), &keys::user(username)).await?)
    }

    pub async fn get(&self, username: &Username) -> Result<User, ApplicationError> {
        self.find(username)
            .await?
            .ok_or_else(|| DomainError::UserNotFound.into())
    }

    pub async fn exists(&self, username: &Username) -> Result<bool, ApplicationError> {
        Ok(self.deps.store.exists(&keys::user(username)).await?)
    }

    /// 显式注册账户，用户名已被占用时返回冲突
    pub async fn create(
        &self,
        username: &Username,
        password: Option<&str>,
    ) -> Result<User, ApplicationError> {
        let mut user = User::new(username.clone(), self.deps.clock.now());
        if let Some(password) = password.filter(|password| !password.is_empty()) {
            let hash = self.deps.password_hasher.hash(password).await?;
            user = user.with_password_hash(hash);
        }

        let created = create_json(self.deps.store.as_ref(), &keys::user(username), &user).await?;
        if !created {
            return Err(DomainError::UserAlreadyExists.into());
        }

        tracing::info!(username = %username, "用户注册成功");
        Ok(user)
    }

    /// 首次接触时建档。并发创建时原子写入失败的一方重新读取已有记录。
    pub async fn ensure_exists(&self, username: &Username) -> Result<User, ApplicationError> {
        if let Some(user) = self.find(username).await? {
            return Ok(user);
        }

        let user = User::new(username.clone(), self.deps.clock.now());
        if create_json(self.deps.store.as_ref(), &keys::user(username), &user).await? {
            tracing::info!(username = %username, "首次接触，自动创建用户");
            return Ok(user);
        }

        self.get(username).await
    }

    /// 刷新最后活跃时间
    pub async fn touch(&self, username: &Username) -> Result<(), ApplicationError> {
        let mut user = self.get(username).await?;
        user.touch(self.deps.clock.now());
        set_json(self.deps.store.as_ref(), &keys::user(username), &user, None).await?;
        Ok(())
    }

    /// 校验密码，成功返回用户。没有设置密码的账户不能用密码登录。
    pub async fn verify_password(
        &self,
        username: &Username,
        password: &str,
    ) -> Result<User, ApplicationError> {
        let user = self
            .find(username)
            .await?
            .ok_or_else(|| ApplicationError::authentication("invalid username or password"))?;

        let Some(hash) = user.password_hash.as_deref() else {
            return Err(ApplicationError::authentication(
                "account has no password set",
            ));
        };

        if !self.deps.password_hasher.verify(password, hash).await? {
            tracing::info!(username = %username, "密码校验失败");
            return Err(ApplicationError::authentication(
                "invalid username or password",
            ));
        }
        Ok(user)
    }

    /// 全部已知用户名
    pub async fn known_usernames(&self) -> Result<Vec<Username>, ApplicationError> {
        let keys = self.deps.store.scan_prefix(keys::USER_PREFIX).await?;
        let mut usernames: Vec<Username> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(keys::USER_PREFIX))
            .filter_map(|name| Username::parse(name).ok())
            .collect();
        usernames.sort();
        Ok(usernames)
    }

    /// 用户名子串搜索，前缀匹配排在前面
    pub async fn search(&self, query: &str) -> Result<Vec<Username>, ApplicationError> {
        let query = query.trim().to_lowercase();
        let policy = &self.deps.search;
        if query.chars().count() < policy.min_query_len {
            return Err(DomainError::invalid_argument(
                "search",
                format!("must be at least {} characters", policy.min_query_len),
            )
            .into());
        }

        let (mut prefixed, mut contained): (Vec<Username>, Vec<Username>) = self
            .known_usernames()
            .await?
            .into_iter()
            .filter(|name| name.as_str().contains(&query))
            .partition(|name| name.as_str().starts_with(&query));
        prefixed.sort();
        contained.sort();
        prefixed.extend(contained);
        prefixed.truncate(policy.limit);
        Ok(prefixed)
    }
}
