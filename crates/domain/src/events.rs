//! 实时分发事件定义
//!
//! 实时通道向客户端投递的事件，也用于多实例之间的 Redis 发布订阅。

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::value_objects::{Timestamp, UserId};

/// 用户在线状态。
///
/// 状态只由连接计数推导：计数大于零为在线，归零为离线，没有其他状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresenceStatus::Online => write!(f, "online"),
            PresenceStatus::Offline => write!(f, "offline"),
        }
    }
}

/// 实时分发事件枚举
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FanoutEvent {
    /// 消息已投递到房间
    MessageDelivered { message: Message },

    /// 用户在线状态变更
    UserStatusChanged {
        user_id: UserId,
        status: PresenceStatus,
        timestamp: Timestamp,
    },
}

impl FanoutEvent {
    /// 获取事件类型名称（用于日志）
    pub fn event_type(&self) -> &'static str {
        match self {
            FanoutEvent::MessageDelivered { .. } => "message_delivered",
            FanoutEvent::UserStatusChanged { .. } => "user_status_changed",
        }
    }
}
