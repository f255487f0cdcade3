//! 基础设施层
//!
//! 提供应用层抽象的生产实现：
//! - AMQP 消息代理网关（发布/快照/排空）
//! - Redis 在线状态存储与跨实例分发背板
//! - PostgreSQL 消息仓储与用户目录

pub mod amqp;
pub mod broadcast;
pub mod builder;
pub mod migrations;
pub mod presence;
pub mod repository;

pub use amqp::AmqpBrokerGateway;
pub use broadcast::{spawn_backplane_subscriber, RedisEventBus};
pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use presence::RedisPresenceStore;
pub use repository::{create_pg_pool, PgMessageRepository, PgUserDirectory};
