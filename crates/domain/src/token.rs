use serde::{Deserialize, Serialize};

/// 令牌校验结果。
///
/// 令牌生命周期：有效 -> 过期但仍在宽限期内（只能用于换发新令牌）-> 失效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Valid,
    ValidExpired,
    Invalid,
}

impl TokenStatus {
    /// 是否可以作为凭证使用（宽限期内的令牌也算）
    pub fn is_valid(self) -> bool {
        matches!(self, Self::Valid | Self::ValidExpired)
    }

    pub fn is_expired(self) -> bool {
        matches!(self, Self::ValidExpired)
    }
}
