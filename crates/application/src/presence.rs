//! 在线状态存储抽象
//!
//! 每个用户保存一个连接计数而不是布尔标志，以容忍同一用户的多个
//! 并发连接（多标签页/多设备）。计数大于零即在线；只有计数归零时
//! 才清除在线标记。计数只由该用户自身连接的生命周期事件修改。

use async_trait::async_trait;
use domain::UserId;
use thiserror::Error;

/// 在线状态存储错误
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("presence backend error: {0}")]
    Backend(String),
}

impl PresenceError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// 在线状态存储
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// 记录一个新连接，返回递增后的连接计数（首个连接返回 1）
    async fn connection_opened(&self, user_id: &UserId) -> Result<u64, PresenceError>;

    /// 记录一个连接断开，返回递减后的连接计数。
    ///
    /// 计数归零时实现方必须清除该用户的在线记录。
    async fn connection_closed(&self, user_id: &UserId) -> Result<u64, PresenceError>;

    /// 查询用户是否在线
    async fn is_online(&self, user_id: &UserId) -> Result<bool, PresenceError>;

    /// 当前在线用户集合
    async fn online_users(&self) -> Result<Vec<UserId>, PresenceError>;
}

/// 内存实现的在线状态存储（用于测试）
pub mod memory {
    use std::collections::HashMap;

    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryPresenceStore {
        counts: Mutex<HashMap<UserId, u64>>,
    }

    impl MemoryPresenceStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl PresenceStore for MemoryPresenceStore {
        async fn connection_opened(&self, user_id: &UserId) -> Result<u64, PresenceError> {
            let mut counts = self.counts.lock().await;
            let count = counts.entry(user_id.clone()).or_insert(0);
            *count += 1;
            Ok(*count)
        }

        async fn connection_closed(&self, user_id: &UserId) -> Result<u64, PresenceError> {
            let mut counts = self.counts.lock().await;
            match counts.get_mut(user_id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    Ok(*count)
                }
                Some(_) => {
                    counts.remove(user_id);
                    Ok(0)
                }
                None => Ok(0),
            }
        }

        async fn is_online(&self, user_id: &UserId) -> Result<bool, PresenceError> {
            let counts = self.counts.lock().await;
            Ok(counts.get(user_id).copied().unwrap_or(0) > 0)
        }

        async fn online_users(&self) -> Result<Vec<UserId>, PresenceError> {
            let counts = self.counts.lock().await;
            Ok(counts.keys().cloned().collect())
        }
    }
}
