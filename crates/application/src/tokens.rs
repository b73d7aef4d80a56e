//! 访问令牌管理
//!
//! 存储布局：
//! - `token:{token}` -> 用户名，TTL 为访问有效期，每次校验成功后滑动续期
//! - `user_token:{user}:{token}` 用户名下的令牌索引，用于枚举和全部注销
//! - `last_token:{user}` 最近一次被换发的旧令牌，TTL 为宽限期，截止时间从第一次换发起算
//!
//! 同一用户可以同时持有多个令牌（多设备），设备之间互不影响。

use std::sync::Arc;
use std::time::Duration;

use domain::{AccessToken, DomainError, TokenStatus, Username};

use crate::error::ApplicationError;
use crate::store::{keys, KeyValueStore};
use crate::users::UserDirectory;

#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    pub access_ttl: Duration,
    pub grace_ttl: Duration,
}

pub struct TokenAuthority {
    store: Arc<dyn KeyValueStore>,
    users: Arc<UserDirectory>,
    policy: TokenPolicy,
}

impl TokenAuthority {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        users: Arc<UserDirectory>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            store,
            users,
            policy,
        }
    }

    /// 为已存在的用户签发新令牌，不影响该用户的其他令牌
    ///
    /// 每次调用都生成全新的令牌，从不复用已有令牌，因此不需要"强制重新签发"的选项。
    pub async fn issue(&self, username: &Username) -> Result<AccessToken, ApplicationError> {
        if !self.users.exists(username).await? {
            return Err(DomainError::UserNotFound.into());
        }

        let token = AccessToken::generate();
        let ttl = Some(self.policy.access_ttl);
        self.store
            .set(&keys::token(&token), username.as_str(), ttl)
            .await?;
        self.store
            .set(&keys::user_token(username, &token), "1", ttl)
            .await?;

        tracing::info!(username = %username, "签发访问令牌");
        Ok(token)
    }

    /// 校验令牌。`allow_expired` 时接受宽限期内已换发的旧令牌。
    pub async fn validate(
        &self,
        username: &Username,
        token: &AccessToken,
        allow_expired: bool,
    ) -> Result<TokenStatus, ApplicationError> {
        let token_key = keys::token(token);
        if let Some(owner) = self.store.get(&token_key).await? {
            if owner == username.as_str() {
                // 滑动过期
                let ttl = self.policy.access_ttl;
                self.store.expire(&token_key, ttl).await?;
                self.store
                    .expire(&keys::user_token(username, token), ttl)
                    .await?;
                return Ok(TokenStatus::Valid);
            }
            tracing::warn!(username = %username, "令牌与用户名不匹配");
            return Ok(TokenStatus::Invalid);
        }

        if allow_expired {
            let last = self.store.get(&keys::last_token(username)).await?;
            if last.as_deref() == Some(token.as_str()) {
                return Ok(TokenStatus::ValidExpired);
            }
        }

        Ok(TokenStatus::Invalid)
    }

    /// 用旧令牌（可以是宽限期内的过期令牌）换取新令牌
    pub async fn refresh(
        &self,
        username: &Username,
        old_token: &AccessToken,
    ) -> Result<AccessToken, ApplicationError> {
        let status = self.validate(username, old_token, true).await?;
        if !status.is_valid() {
            tracing::info!(username = %username, "令牌换发被拒绝");
            return Err(ApplicationError::authentication(
                "token cannot be refreshed",
            ));
        }

        let new_token = self.issue(username).await?;
        // 用宽限期令牌再次换发时保留原来的截止时间
        if !status.is_expired() {
            self.store
                .set(
                    &keys::last_token(username),
                    old_token.as_str(),
                    Some(self.policy.grace_ttl),
                )
                .await?;
            self.delete_token(username, old_token).await?;
        }

        tracing::info!(username = %username, expired = status.is_expired(), "令牌已换发");
        Ok(new_token)
    }

    /// 注销单个令牌（当前设备登出），返回令牌是否存在
    pub async fn revoke(&self, token: &AccessToken) -> Result<bool, ApplicationError> {
        let token_key = keys::token(token);
        let Some(owner) = self.store.get(&token_key).await? else {
            return Ok(false);
        };

        match Username::parse(owner) {
            Ok(username) => self.delete_token(&username, token).await?,
            Err(_) => {
                self.store.delete(&[token_key]).await?;
            }
        }
        Ok(true)
    }

    /// 注销用户的全部令牌，包括宽限期记录，返回注销的令牌数量
    pub async fn revoke_all(&self, username: &Username) -> Result<u64, ApplicationError> {
        let prefix = keys::user_token_prefix(username);
        let index_keys = self.store.scan_prefix(&prefix).await?;

        let mut doomed = Vec::with_capacity(index_keys.len() * 2 + 1);
        for index_key in &index_keys {
            if let Some(raw) = index_key.strip_prefix(&prefix) {
                doomed.push(keys::token(&AccessToken::from_raw(raw)));
            }
        }
        let revoked = index_keys.len() as u64;
        doomed.extend(index_keys);
        doomed.push(keys::last_token(username));
        self.store.delete(&doomed).await?;

        tracing::info!(username = %username, revoked, "注销用户全部令牌");
        Ok(revoked)
    }

    async fn delete_token(
        &self,
        username: &Username,
        token: &AccessToken,
    ) -> Result<(), ApplicationError> {
        self.store
            .delete(&[keys::token(token), keys::user_token(username, token)])
            .await?;
        Ok(())
    }
}
