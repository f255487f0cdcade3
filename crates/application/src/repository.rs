//! 存储侧抽象
//!
//! 存储引擎被视为一个不透明的按时间追加的消息库，外加一个按发送者
//! 关联展示名的二级查询。查询和聚合的具体机制属于基础设施层。

use async_trait::async_trait;
use domain::{Message, ReceiverKind, RepositoryError, UserId};

/// 已落库的消息及关联出的发送者展示名
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub message: Message,
    pub sender_display_name: Option<String>,
}

/// 消息仓储
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 写入一条消息
    async fn insert(&self, message: &Message) -> Result<(), RepositoryError>;

    /// 查询一个会话的全部已持久化消息，按创建时间升序返回。
    ///
    /// 私聊会话双向匹配；群组会话按接收方精确匹配。每行附带发送者
    /// 展示名（目录中不存在时为 None）。
    async fn find_conversation(
        &self,
        user_id: &UserId,
        counterparty: &str,
        kind: ReceiverKind,
    ) -> Result<Vec<StoredMessage>, RepositoryError>;
}

/// 用户目录：按用户标识查询展示名
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn display_name(&self, user_id: &UserId) -> Result<Option<String>, RepositoryError>;
}

/// 内存实现（用于测试）
pub mod memory {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::Mutex;

    use super::*;

    /// 内存消息仓储，支持注入写失败以测试持久化中断语义
    #[derive(Default)]
    pub struct MemoryMessageRepository {
        messages: Mutex<Vec<Message>>,
        directory: Mutex<HashMap<UserId, String>>,
        fail_writes: AtomicBool,
    }

    impl MemoryMessageRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// 让后续写入全部失败（模拟存储故障）
        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::Relaxed);
        }

        pub async fn register_display_name(&self, user_id: UserId, name: impl Into<String>) {
            let mut directory = self.directory.lock().await;
            directory.insert(user_id, name.into());
        }

        pub async fn stored_count(&self) -> usize {
            self.messages.lock().await.len()
        }
    }

    #[async_trait]
    impl MessageRepository for MemoryMessageRepository {
        async fn insert(&self, message: &Message) -> Result<(), RepositoryError> {
            if self.fail_writes.load(Ordering::Relaxed) {
                return Err(RepositoryError::storage("write failure injected"));
            }
            let mut messages = self.messages.lock().await;
            messages.push(message.clone());
            Ok(())
        }

        async fn find_conversation(
            &self,
            user_id: &UserId,
            counterparty: &str,
            kind: ReceiverKind,
        ) -> Result<Vec<StoredMessage>, RepositoryError> {
            let messages = self.messages.lock().await;
            let directory = self.directory.lock().await;
            let mut matched: Vec<StoredMessage> = messages
                .iter()
                .filter(|m| m.belongs_to_conversation(user_id, counterparty, kind))
                .map(|m| StoredMessage {
                    message: m.clone(),
                    sender_display_name: directory.get(&m.sender).cloned(),
                })
                .collect();
            matched.sort_by_key(|entry| entry.message.created_at);
            Ok(matched)
        }
    }

    #[async_trait]
    impl UserDirectory for MemoryMessageRepository {
        async fn display_name(
            &self,
            user_id: &UserId,
        ) -> Result<Option<String>, RepositoryError> {
            let directory = self.directory.lock().await;
            Ok(directory.get(user_id).cloned())
        }
    }
}
