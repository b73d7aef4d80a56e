use serde::{Deserialize, Serialize};

use crate::content::contains_profanity;
use crate::errors::DomainError;
use crate::value_objects::{RoomId, Timestamp, Username};

const MAX_ROOM_NAME_LENGTH: usize = 50;

/// 私有房间至少需要的成员数，少于此数即解散
pub const MIN_PRIVATE_MEMBERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Public,
    Private,
}

/// 聊天室实体。
///
/// `user_count` 是在线记录的缓存，读取时由在线状态重新计算。
/// `members` 只在私有房间中存在，按用户名排序且始终包含创建者。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: String,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub created_at: Timestamp,
    #[serde(default)]
    pub user_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<Username>>,
}

impl ChatRoom {
    pub fn new_public(id: RoomId, name: &str, now: Timestamp) -> Result<Self, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::invalid_argument("name", "cannot be empty"));
        }
        if name.chars().count() > MAX_ROOM_NAME_LENGTH {
            return Err(DomainError::invalid_argument("name", "too long"));
        }
        if contains_profanity(name) {
            return Err(DomainError::invalid_argument(
                "name",
                "contains inappropriate language",
            ));
        }

        Ok(Self {
            id,
            name: name.to_owned(),
            room_type: RoomType::Public,
            created_at: now,
            user_count: 0,
            members: None,
        })
    }

    /// 创建私有房间：自动加入创建者，去重排序，并由成员列表生成房间名。
    pub fn new_private(
        id: RoomId,
        creator: &Username,
        members: Vec<Username>,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if members.is_empty() {
            return Err(DomainError::invalid_argument("members", "cannot be empty"));
        }

        let mut members = members;
        members.push(creator.clone());
        members.sort();
        members.dedup();

        if members.len() < MIN_PRIVATE_MEMBERS {
            return Err(DomainError::invalid_argument(
                "members",
                "a private room needs at least one other member",
            ));
        }

        Ok(Self {
            id,
            name: Self::private_display_name(&members),
            room_type: RoomType::Private,
            created_at: now,
            user_count: 0,
            members: Some(members),
        })
    }

    fn private_display_name(members: &[Username]) -> String {
        members
            .iter()
            .map(|member| format!("@{member}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_private(&self) -> bool {
        self.room_type == RoomType::Private
    }

    pub fn is_member(&self, username: &Username) -> bool {
        self.members
            .as_ref()
            .is_some_and(|members| members.contains(username))
    }

    pub fn members(&self) -> &[Username] {
        self.members.as_deref().unwrap_or_default()
    }

    /// 公共房间对所有人可见；私有房间只对成员可见，匿名访问者看不到。
    pub fn is_visible_to(&self, viewer: Option<&Username>) -> bool {
        match self.room_type {
            RoomType::Public => true,
            RoomType::Private => viewer.is_some_and(|viewer| self.is_member(viewer)),
        }
    }

    /// 用当前成员替换私有房间的成员列表，公共房间不受影响
    pub fn replace_members(&mut self, mut members: Vec<Username>) {
        if self.is_private() {
            members.sort();
            members.dedup();
            self.members = Some(members);
        }
    }

    /// 私有房间成员不足时应当解散
    pub fn should_dissolve(&self) -> bool {
        self.is_private() && self.members().len() < MIN_PRIVATE_MEMBERS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(name: &str) -> Username {
        Username::parse(name).unwrap()
    }

    #[test]
    fn public_room_requires_clean_non_empty_name() {
        let now = Utc::now();
        assert!(ChatRoom::new_public(RoomId::generate(), "  ", now).is_err());
        assert!(ChatRoom::new_public(RoomId::generate(), "shit talk", now).is_err());
        let room = ChatRoom::new_public(RoomId::generate(), " Lobby ", now).unwrap();
        assert_eq!(room.name, "Lobby");
        assert!(room.members.is_none());
    }

    #[test]
    fn private_room_includes_creator_and_sorted_name() {
        let room = ChatRoom::new_private(
            RoomId::generate(),
            &user("zoe"),
            vec![user("carol"), user("bob"), user("carol")],
            Utc::now(),
        )
        .unwrap();

        assert_eq!(room.members(), &[user("bob"), user("carol"), user("zoe")]);
        assert_eq!(room.name, "@bob, @carol, @zoe");
        assert!(room.is_private());
    }

    #[test]
    fn private_room_needs_another_member() {
        let creator = user("alice");
        assert!(ChatRoom::new_private(RoomId::generate(), &creator, vec![], Utc::now()).is_err());
        assert!(
            ChatRoom::new_private(RoomId::generate(), &creator, vec![creator.clone()], Utc::now())
                .is_err()
        );
    }

    #[test]
    fn visibility_rules() {
        let now = Utc::now();
        let public = ChatRoom::new_public(RoomId::generate(), "lobby", now).unwrap();
        let private =
            ChatRoom::new_private(RoomId::generate(), &user("alice"), vec![user("bob")], now)
                .unwrap();

        assert!(public.is_visible_to(None));
        assert!(public.is_visible_to(Some(&user("mallory"))));
        assert!(!private.is_visible_to(None));
        assert!(private.is_visible_to(Some(&user("bob"))));
        assert!(!private.is_visible_to(Some(&user("mallory"))));
    }

    #[test]
    fn two_party_room_dissolves_after_leave() {
        let mut room = ChatRoom::new_private(
            RoomId::generate(),
            &user("alice"),
            vec![user("bob")],
            Utc::now(),
        )
        .unwrap();
        assert!(!room.should_dissolve());
        room.replace_members(vec![user("alice"), user("alice")]);
        assert_eq!(room.members(), &[user("alice")]);
        assert!(room.should_dissolve());

        let mut public = ChatRoom::new_public(RoomId::generate(), "lobby", Utc::now()).unwrap();
        public.replace_members(vec![user("alice")]);
        assert!(public.members.is_none());
        assert!(!public.should_dissolve());
    }

    #[test]
    fn serializes_type_field() {
        let room = ChatRoom::new_public(RoomId::parse("general").unwrap(), "General", Utc::now())
            .unwrap();
        let json = serde_json::to_value(&room).unwrap();
        assert_eq!(json["type"], "public");
        assert_eq!(json["userCount"], 0);
        assert!(json.get("members").is_none());
    }
}
