//! 存储键布局
//!
//! 用户名和房间ID都经过格式校验，不含 `:` 和通配符，可以安全地拼接进键和 SCAN 模式。

use domain::{AccessToken, RoomId, Username};

pub const USER_PREFIX: &str = "user:";
pub const ROOM_PREFIX: &str = "room:";

pub fn user(username: &Username) -> String {
    format!("{USER_PREFIX}{username}")
}

/// 令牌 -> 用户名
pub fn token(token: &AccessToken) -> String {
    format!("token:{}", token.as_str())
}

/// 用户名下的令牌索引，每个令牌一个键，随令牌一起过期
pub fn user_token(username: &Username, token: &AccessToken) -> String {
    format!("user_token:{username}:{}", token.as_str())
}

pub fn user_token_prefix(username: &Username) -> String {
    format!("user_token:{username}:")
}

/// 最近一次换发前的令牌，用于宽限期内换发
pub fn last_token(username: &Username) -> String {
    format!("last_token:{username}")
}

pub fn room(room_id: &RoomId) -> String {
    format!("{ROOM_PREFIX}{room_id}")
}

/// 私有房间成员，每个成员一个键，离开时逐个原子删除
pub fn room_member(room_id: &RoomId, username: &Username) -> String {
    format!("room_member:{room_id}:{username}")
}

pub fn room_member_prefix(room_id: &RoomId) -> String {
    format!("room_member:{room_id}:")
}

/// 房间在线人数缓存
pub fn room_count(room_id: &RoomId) -> String {
    format!("room_count:{room_id}")
}

pub fn messages(room_id: &RoomId) -> String {
    format!("messages:{room_id}")
}

/// 发送中标记，值为正在写入的消息内容
pub fn send_claim(room_id: &RoomId, username: &Username) -> String {
    format!("send_claim:{room_id}:{username}")
}

pub fn presence(room_id: &RoomId, username: &Username) -> String {
    format!("presence:{room_id}:{username}")
}

pub fn presence_prefix(room_id: &RoomId) -> String {
    format!("presence:{room_id}:")
}

pub fn sensitive_action(action: &str, identifier: &str) -> String {
    format!("rate:{action}:{identifier}")
}

pub fn chat_window(window: &str, room_id: &RoomId, username: &Username) -> String {
    format!("chat_rate:{window}:{room_id}:{username}")
}

pub fn chat_interval(room_id: &RoomId, username: &Username) -> String {
    format!("chat_interval:{room_id}:{username}")
}
