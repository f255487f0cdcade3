use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{MessageContent, MessageId, Timestamp, UserId};

/// 消息接收方类型：个人或群组。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverKind {
    User,
    Group,
}

impl std::fmt::Display for ReceiverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiverKind::User => write!(f, "user"),
            ReceiverKind::Group => write!(f, "group"),
        }
    }
}

impl std::str::FromStr for ReceiverKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ReceiverKind::User),
            "group" => Ok(ReceiverKind::Group),
            _ => Err(DomainError::UnknownReceiverKind(s.to_string())),
        }
    }
}

/// 一条聊天消息。
///
/// 标识在构造时分配一次，之后不再变化；内容和收发双方构造后不可变。
/// 生命周期：构造 → 实时广播（尽力而为）→ 入队 → 待持久化 → 已持久化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub content: MessageContent,
    pub sender: UserId,
    /// 用户标识或群组标识，由 `receiver_kind` 区分。
    pub receiver: String,
    #[serde(rename = "receiverType")]
    pub receiver_kind: ReceiverKind,
    pub created_at: Timestamp,
}

impl Message {
    pub fn new(
        sender: UserId,
        content: MessageContent,
        receiver: impl Into<String>,
        receiver_kind: ReceiverKind,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let receiver = receiver.into();
        if receiver.trim().is_empty() {
            return Err(DomainError::MissingReceiver);
        }
        Ok(Self {
            id: MessageId::generate(),
            content,
            sender,
            receiver,
            receiver_kind,
            created_at,
        })
    }

    /// 判断这条消息是否属于指定会话。
    ///
    /// 私聊会话按收发双方对称匹配；群组会话按群组标识精确匹配。
    pub fn belongs_to_conversation(
        &self,
        user: &UserId,
        counterparty: &str,
        kind: ReceiverKind,
    ) -> bool {
        if self.receiver_kind != kind {
            return false;
        }
        match kind {
            ReceiverKind::Group => self.receiver == counterparty,
            ReceiverKind::User => {
                (self.sender == *user && self.receiver == counterparty)
                    || (self.sender.as_str() == counterparty && self.receiver == user.as_str())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(sender: &str, receiver: &str, kind: ReceiverKind) -> Message {
        Message::new(
            UserId::from(sender),
            MessageContent::new("hello").unwrap(),
            receiver,
            kind,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_blank_receiver() {
        let result = Message::new(
            UserId::from("alice"),
            MessageContent::new("hello").unwrap(),
            "  ",
            ReceiverKind::User,
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::MissingReceiver)));
    }

    #[test]
    fn test_direct_conversation_matches_both_directions() {
        let alice = UserId::from("alice");
        let sent = message("alice", "bob", ReceiverKind::User);
        let received = message("bob", "alice", ReceiverKind::User);
        assert!(sent.belongs_to_conversation(&alice, "bob", ReceiverKind::User));
        assert!(received.belongs_to_conversation(&alice, "bob", ReceiverKind::User));
    }

    #[test]
    fn test_direct_conversation_excludes_other_parties() {
        let alice = UserId::from("alice");
        let other = message("bob", "carol", ReceiverKind::User);
        assert!(!other.belongs_to_conversation(&alice, "bob", ReceiverKind::User));
    }

    #[test]
    fn test_group_conversation_matches_exact_group() {
        let alice = UserId::from("alice");
        let msg = message("bob", "team-42", ReceiverKind::Group);
        assert!(msg.belongs_to_conversation(&alice, "team-42", ReceiverKind::Group));
        assert!(!msg.belongs_to_conversation(&alice, "team-43", ReceiverKind::Group));
        // 类型不同的会话互不可见
        assert!(!msg.belongs_to_conversation(&alice, "team-42", ReceiverKind::User));
    }

    #[test]
    fn test_wire_format_uses_receiver_type_field() {
        let msg = message("alice", "bob", ReceiverKind::User);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["receiverType"], "user");
        assert_eq!(json["sender"], "alice");
        assert!(json["createdAt"].is_string());

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
