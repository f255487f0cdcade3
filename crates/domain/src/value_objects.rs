use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

/// 消息内容允许的最大长度（字符数）。
pub const MAX_CONTENT_LENGTH: usize = 4096;

/// 用户唯一标识。
///
/// 身份由外部认证协作方解析，这里只保存其返回的稳定字符串标识，
/// 不假设任何内部结构（可能是 UUID，也可能是第三方 uid）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// 消息唯一标识。
///
/// 在消息构造时分配，且在整个生命周期内保持稳定：
/// 队列快照路径与存储路径看到的是同一个值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// 生成一个新的消息标识。
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<MessageId> for Uuid {
    fn from(value: MessageId) -> Self {
        value.0
    }
}

/// 消息内容，构造时校验非空和长度上限。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(String);

impl MessageContent {
    pub fn new(content: impl Into<String>) -> Result<Self, DomainError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(DomainError::EmptyContent);
        }
        let length = content.chars().count();
        if length > MAX_CONTENT_LENGTH {
            return Err(DomainError::ContentTooLong {
                actual: length,
                max: MAX_CONTENT_LENGTH,
            });
        }
        Ok(Self(content))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_rejects_empty() {
        assert!(matches!(
            MessageContent::new(""),
            Err(DomainError::EmptyContent)
        ));
        assert!(matches!(
            MessageContent::new("   "),
            Err(DomainError::EmptyContent)
        ));
    }

    #[test]
    fn test_content_rejects_overlong() {
        let long = "x".repeat(MAX_CONTENT_LENGTH + 1);
        assert!(matches!(
            MessageContent::new(long),
            Err(DomainError::ContentTooLong { .. })
        ));
    }

    #[test]
    fn test_content_serializes_transparently() {
        let content = MessageContent::new("hi").unwrap();
        let json = serde_json::to_string(&content).unwrap();
        assert_eq!(json, "\"hi\"");
    }

    #[test]
    fn test_message_id_is_unique() {
        assert_ne!(MessageId::generate(), MessageId::generate());
    }
}
