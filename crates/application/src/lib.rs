//! 应用层实现。
//!
//! 这里提供消息分发的用例服务（发送、批量持久化、历史合并），
//! 以及对外部协作方（消息代理、在线状态存储、消息仓储、用户目录、
//! 身份校验、时钟）的抽象接口。

pub mod clock;
pub mod dto;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod identity;
pub mod presence;
pub mod repository;
pub mod services;

pub use clock::{Clock, SystemClock};
pub use dto::{HistoryEntry, SendMessageRequest, SentMessage};
pub use error::ApplicationError;
pub use fanout::{
    BackplaneError, ConnectionHandle, ConnectionId, EventBackplane, EventFrame, FanoutHub,
};
pub use gateway::{
    BrokerError, BrokerGateway, DrainHandler, DEAD_QUEUE, EXCHANGE, NOTIFY_QUEUE, NOTIFY_ROUTE,
    PEEK_CAP, PERSIST_QUEUE, PERSIST_ROUTE, YIELD_INTERVAL,
};
pub use identity::IdentityVerifier;
pub use presence::{PresenceError, PresenceStore};
pub use repository::{MessageRepository, StoredMessage, UserDirectory};
pub use services::{
    BatchPersister, BatchPersisterDependencies, DispatchService, DispatchServiceDependencies,
    HistoryService, HistoryServiceDependencies,
};
