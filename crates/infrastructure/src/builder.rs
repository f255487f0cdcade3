//! 基础设施装配
//!
//! 按配置连接各外部依赖并组装成一组可注入应用层的实现。
//! 数据库和 Redis 不可用视为致命错误；消息代理不可用进入降级
//! 模式，由网关自行按需重连。

use std::sync::Arc;

use thiserror::Error;

use application::{BrokerGateway, PresenceStore};
use config::AppConfig;

use crate::amqp::AmqpBrokerGateway;
use crate::broadcast::RedisEventBus;
use crate::migrations::MIGRATOR;
use crate::presence::RedisPresenceStore;
use crate::repository::{create_pg_pool, PgMessageRepository, PgUserDirectory};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// 已连接的基础设施集合
pub struct Infrastructure {
    pub gateway: Arc<AmqpBrokerGateway>,
    pub presence: Arc<RedisPresenceStore>,
    pub messages: Arc<PgMessageRepository>,
    pub directory: Arc<PgUserDirectory>,
    pub event_bus: Arc<RedisEventBus>,
    /// 原始客户端供订阅任务建立独立的 PubSub 连接
    pub redis_client: Arc<redis::Client>,
}

impl Infrastructure {
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!("数据库连接与迁移完成");

        let redis_client = Arc::new(redis::Client::open(config.redis.url.as_str())?);
        let redis_conn = redis_client.get_connection_manager().await?;
        tracing::info!("Redis 连接建立");

        let gateway = Arc::new(AmqpBrokerGateway::connect(&config.broker).await);

        Ok(Self {
            gateway,
            presence: Arc::new(RedisPresenceStore::new(redis_conn.clone())),
            messages: Arc::new(PgMessageRepository::new(pool.clone())),
            directory: Arc::new(PgUserDirectory::new(pool)),
            event_bus: Arc::new(RedisEventBus::new(
                redis_conn,
                config.redis.fanout_channel.clone(),
            )),
            redis_client,
        })
    }

    /// 检查存储连通性；代理的可用性由网关自身的降级逻辑处理
    pub async fn health_check(&self) -> Result<(), domain::RepositoryError> {
        self.messages.health_check().await
    }

    pub fn gateway_trait(&self) -> Arc<dyn BrokerGateway> {
        self.gateway.clone()
    }

    pub fn presence_trait(&self) -> Arc<dyn PresenceStore> {
        self.presence.clone()
    }
}
