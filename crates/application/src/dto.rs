//! 对外接口的数据传输对象

use domain::{Message, MessageId, ReceiverKind, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// 发送消息请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    pub receiver: String,
    #[serde(rename = "receiverType", default = "default_receiver_kind")]
    pub receiver_kind: ReceiverKind,
}

fn default_receiver_kind() -> ReceiverKind {
    ReceiverKind::User
}

/// 发送确认。
///
/// 注意：这个确认先于实际落库返回——消息此刻只是进入了持久化队列。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub id: MessageId,
    pub content: String,
    pub sender: UserId,
    pub sender_display_name: Option<String>,
    pub receiver: String,
    #[serde(rename = "receiverType")]
    pub receiver_kind: ReceiverKind,
    pub created_at: Timestamp,
}

impl SentMessage {
    pub fn new(message: Message, sender_display_name: Option<String>) -> Self {
        Self {
            id: message.id,
            content: message.content.as_str().to_string(),
            sender: message.sender,
            sender_display_name,
            receiver: message.receiver,
            receiver_kind: message.receiver_kind,
            created_at: message.created_at,
        }
    }
}

/// 会话历史中的一个条目：已落库或仍在持久化队列中
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
    /// 已入队但尚未落库的消息标记为 true
    #[serde(default, skip_serializing_if = "is_false")]
    pub pending: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_to_user_kind() {
        let request: SendMessageRequest =
            serde_json::from_str(r#"{"content":"hi","receiver":"bob"}"#).unwrap();
        assert_eq!(request.receiver_kind, ReceiverKind::User);
    }

    #[test]
    fn test_pending_flag_omitted_when_persisted() {
        let message = Message::new(
            UserId::from("alice"),
            domain::MessageContent::new("hi").unwrap(),
            "bob",
            ReceiverKind::User,
            chrono::Utc::now(),
        )
        .unwrap();

        let persisted = HistoryEntry {
            message: message.clone(),
            sender_display_name: None,
            pending: false,
        };
        let json = serde_json::to_value(&persisted).unwrap();
        assert!(json.get("pending").is_none());

        let pending = HistoryEntry {
            message,
            sender_display_name: None,
            pending: true,
        };
        let json = serde_json::to_value(&pending).unwrap();
        assert_eq!(json["pending"], true);
    }
}
