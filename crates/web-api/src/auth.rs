//! 请求认证
//!
//! 受保护的操作需要同时携带 `Authorization: Bearer <token>` 和 `X-Username` 头，
//! 只有处于有效期内的令牌才能通过，宽限期内的旧令牌只能用于换发。

use axum::http::{header, HeaderMap};
use domain::{AccessToken, TokenStatus, Username};

use crate::error::ApiError;
use crate::state::AppState;

pub const USERNAME_HEADER: &str = "x-username";

/// 通过认证的调用方
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: Username,
    pub token: AccessToken,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthenticatedUser, ApiError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::unauthorized("missing or malformed authorization header"))?;
    let username = headers
        .get(USERNAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing X-Username header"))?;
    let username =
        Username::parse(username).map_err(|_| ApiError::unauthorized("invalid username"))?;
    let token = AccessToken::from_raw(token);

    match state
        .services
        .tokens
        .validate(&username, &token, false)
        .await?
    {
        TokenStatus::Valid => Ok(AuthenticatedUser { username, token }),
        status => {
            tracing::info!(username = %username, ?status, "令牌校验未通过");
            Err(ApiError::unauthorized("invalid or expired token"))
        }
    }
}

/// 请求来源，用作未认证请求的限流标识
pub fn client_origin(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or("unknown")
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn origin_prefers_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_origin(&headers), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_origin(&headers), "10.0.0.9");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_origin(&headers), "203.0.113.7");
    }

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
