//! 应用层错误定义
//!
//! 请求期错误（校验、认证、通道不可用）直接返回给调用方；
//! 异步持久化错误在本地通过重新入队恢复，只会以消息持续处于
//! 待持久化状态的形式间接可见。

use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::gateway::BrokerError;
use crate::presence::PresenceError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 请求缺少必填字段或字段非法，调用方可修正后重试
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// 身份协作方拒绝了凭证，不重试
    #[error("authentication failed")]
    Unauthorized,

    /// 消息代理错误；连接缺失时发送必须显式失败，而不是静默丢弃持久化
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// 存储仓储错误
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// 在线状态存储错误
    #[error("presence error: {0}")]
    Presence(#[from] PresenceError),
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        // 领域校验失败对调用方而言都是可修正的请求错误
        ApplicationError::InvalidRequest(value.to_string())
    }
}

impl ApplicationError {
    /// 判断是否为代理通道不可用错误
    pub fn is_channel_unavailable(&self) -> bool {
        matches!(
            self,
            ApplicationError::Broker(BrokerError::ChannelUnavailable)
        )
    }
}
