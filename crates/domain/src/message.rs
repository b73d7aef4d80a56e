use serde::{Deserialize, Serialize};

use crate::content::MessageContent;
use crate::value_objects::{MessageId, RoomId, Timestamp, Username};

/// 聊天消息。`content` 始终是清洗后的文本。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub username: Username,
    pub content: String,
    pub timestamp: Timestamp,
}

impl Message {
    pub fn new(
        id: MessageId,
        room_id: RoomId,
        username: Username,
        content: MessageContent,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            room_id,
            username,
            content: content.into_inner(),
            timestamp,
        }
    }

    /// 是否与另一条消息构成重复提交（同一发送者、同一内容）
    pub fn is_duplicate_of(&self, username: &Username, content: &MessageContent) -> bool {
        &self.username == username && self.content == content.as_str()
    }
}
