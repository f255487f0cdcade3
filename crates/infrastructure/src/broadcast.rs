//! Redis 分发背板
//!
//! 把本实例产生的分发事件帧发布到共享频道，并订阅其他实例的帧，
//! 使多个分发实例路由到相同的逻辑房间。订阅循环断线后自动重连。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::time::{sleep, Duration};

use application::fanout::{BackplaneError, EventBackplane, EventFrame, FanoutHub};

/// Redis 发布订阅背板
#[derive(Clone)]
pub struct RedisEventBus {
    conn: ConnectionManager,
    channel: String,
}

impl RedisEventBus {
    pub fn new(conn: ConnectionManager, channel: impl Into<String>) -> Self {
        Self {
            conn,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl EventBackplane for RedisEventBus {
    async fn publish(&self, frame: &EventFrame) -> Result<(), BackplaneError> {
        let payload = serde_json::to_string(frame)
            .map_err(|err| BackplaneError::publish(err.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .publish(&self.channel, payload)
            .await
            .map_err(|err| BackplaneError::publish(err.to_string()))?;
        Ok(())
    }
}

/// 启动背板订阅任务：接收远端事件帧并交给分发中心应用。
///
/// 连接断开或订阅失败后按固定间隔重连，任务随宿主进程退出。
pub fn spawn_backplane_subscriber(
    client: Arc<redis::Client>,
    channel: String,
    hub: Arc<FanoutHub>,
    reconnect_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match client.get_async_pubsub().await {
                Ok(mut pubsub) => {
                    if let Err(err) = pubsub.subscribe(&channel).await {
                        tracing::error!(channel, error = %err, "订阅背板频道失败");
                    } else {
                        tracing::info!(channel, "背板订阅已建立");
                        let mut stream = pubsub.on_message();
                        while let Some(msg) = stream.next().await {
                            let payload: String = match msg.get_payload() {
                                Ok(payload) => payload,
                                Err(err) => {
                                    tracing::warn!(error = %err, "读取背板负载失败");
                                    continue;
                                }
                            };
                            match serde_json::from_str::<EventFrame>(&payload) {
                                Ok(frame) => hub.apply_remote(frame).await,
                                Err(err) => {
                                    tracing::warn!(error = %err, "背板帧无法反序列化，丢弃");
                                }
                            }
                        }
                        tracing::warn!(channel, "背板订阅流中断，准备重连");
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "获取背板订阅连接失败");
                }
            }
            sleep(reconnect_interval).await;
        }
    })
}
