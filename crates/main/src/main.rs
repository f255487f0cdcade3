//! 主应用程序入口
//!
//! 装配消息分发核心：连接基础设施，启动批量持久化调度与
//! 背板订阅任务，等待退出信号。对外接入层（WebSocket/HTTP）
//! 由宿主服务提供，这里只运行后台角色。

use std::sync::Arc;
use std::time::Duration;

use application::{BatchPersister, BatchPersisterDependencies, FanoutHub, SystemClock};
use config::AppConfig;
use infrastructure::{spawn_backplane_subscriber, Infrastructure};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 读取环境变量配置
    let config = AppConfig::from_env_with_defaults();
    config.validate()?;

    tracing::info!(
        database = config.database.url.split('@').last().unwrap_or("unknown"),
        broker = %config.broker.url,
        "启动消息分发服务"
    );

    let infra = Infrastructure::connect(&config).await?;
    infra.health_check().await?;

    // 分发中心挂接 Redis 背板，使多实例路由到相同的逻辑房间
    let fanout = Arc::new(
        FanoutHub::new(infra.presence_trait(), Arc::new(SystemClock))
            .with_backplane(infra.event_bus.clone()),
    );
    let subscriber = spawn_backplane_subscriber(
        infra.redis_client.clone(),
        config.redis.fanout_channel.clone(),
        fanout.clone(),
        Duration::from_secs(1),
    );

    // 批量持久化调度
    let persister = Arc::new(BatchPersister::new(BatchPersisterDependencies {
        gateway: infra.gateway_trait(),
        repository: infra.messages.clone(),
        batch_size: config.persister.batch_size,
        interval: Duration::from_secs(config.persister.interval_secs),
    }));
    let persister_task = persister.clone().spawn();

    tracing::info!(
        instance_id = %fanout.instance_id(),
        interval_secs = config.persister.interval_secs,
        batch_size = config.persister.batch_size,
        "消息分发服务已就绪"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("收到退出信号，正在关闭");

    // 关闭前把队列里已有的消息再落一轮
    persister_task.abort();
    persister.run_once().await;
    subscriber.abort();

    Ok(())
}
