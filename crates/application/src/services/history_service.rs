//! 历史合并服务
//!
//! 回答"这个会话有哪些消息"：把已落库的记录与持久化队列的
//! 非破坏性快照合并，按创建时间升序返回。两个来源互不重叠——
//! 代理对每个条目的单消费者投递保证同一条目不会同时被快照和
//! 持久化器各自"拿到"；但本服务不按标识去重，持久化恰好发生在
//! 存储查询和队列快照之间时，同一条消息可能在相邻两次读取中
//! 出现两次，这是可接受的读后写松弛。

use std::sync::Arc;

use domain::{ReceiverKind, UserId};

use crate::dto::HistoryEntry;
use crate::error::ApplicationError;
use crate::gateway::{BrokerGateway, PERSIST_QUEUE};
use crate::repository::MessageRepository;

pub struct HistoryServiceDependencies {
    pub gateway: Arc<dyn BrokerGateway>,
    pub repository: Arc<dyn MessageRepository>,
}

/// 历史合并服务
pub struct HistoryService {
    gateway: Arc<dyn BrokerGateway>,
    repository: Arc<dyn MessageRepository>,
}

impl HistoryService {
    pub fn new(deps: HistoryServiceDependencies) -> Self {
        Self {
            gateway: deps.gateway,
            repository: deps.repository,
        }
    }

    /// 获取一个会话的消息：已落库的记录加上仍在队列中的待持久化
    /// 消息（标记 `pending`），整体按创建时间升序。
    ///
    /// 代理不可用时降级为只返回存储结果：队列快照是补充视图，
    /// 不应让整个读路径失败。
    pub async fn get_history(
        &self,
        user_id: &UserId,
        counterparty: &str,
        kind: ReceiverKind,
    ) -> Result<Vec<HistoryEntry>, ApplicationError> {
        let stored = self
            .repository
            .find_conversation(user_id, counterparty, kind)
            .await?;

        let mut entries: Vec<HistoryEntry> = stored
            .into_iter()
            .map(|record| HistoryEntry {
                message: record.message,
                sender_display_name: record.sender_display_name,
                pending: false,
            })
            .collect();

        match self.gateway.peek_all(PERSIST_QUEUE).await {
            Ok(snapshot) => {
                entries.extend(
                    snapshot
                        .into_iter()
                        .filter(|m| m.belongs_to_conversation(user_id, counterparty, kind))
                        .map(|message| HistoryEntry {
                            message,
                            sender_display_name: None,
                            pending: true,
                        }),
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, "队列快照不可用，历史降级为仅存储结果");
            }
        }

        entries.sort_by_key(|entry| entry.message.created_at);
        Ok(entries)
    }
}
