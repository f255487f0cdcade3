//! 领域层错误定义。

use thiserror::Error;

/// 领域错误类型
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// 消息内容为空
    #[error("message content is empty")]
    EmptyContent,

    /// 消息内容过长
    #[error("message content too long: {actual} > {max}")]
    ContentTooLong { actual: usize, max: usize },

    /// 缺少接收方标识
    #[error("receiver identifier is missing")]
    MissingReceiver,

    /// 未知的接收方类型
    #[error("unknown receiver kind: {0}")]
    UnknownReceiverKind(String),
}

/// 存储仓储错误类型
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// 记录不存在
    #[error("record not found")]
    NotFound,

    /// 底层存储故障
    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}
