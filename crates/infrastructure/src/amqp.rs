//! AMQP 消息代理网关
//!
//! 直连交换机 + 两条工作队列（持久化/通知）+ 一条死信队列的拓扑，
//! 声明是幂等的，进程重启或代理重建后重新声明即可恢复。
//!
//! 连接失败不会让进程崩溃：网关进入降级模式，之后每次操作按需
//! 尝试重连。调用方通过 [`BrokerGateway::is_available`] 探测当前
//! 连接状态。

use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::RwLock;
use tokio::task::yield_now;
use tokio::time::{sleep, Duration};

use application::gateway::{
    BrokerError, BrokerGateway, BrokerResult, DrainHandler, DEAD_QUEUE, EXCHANGE, NOTIFY_QUEUE,
    NOTIFY_ROUTE, PEEK_CAP, PERSIST_QUEUE, PERSIST_ROUTE, YIELD_INTERVAL,
};
use config::BrokerConfig;
use domain::Message;

/// AMQP 标准的持久化投递标记
const PERSISTENT_DELIVERY: u8 = 2;

struct AmqpHandle {
    // 连接句柄必须持有，否则底层 IO 循环随连接一起结束
    _connection: Connection,
    channel: Channel,
}

/// AMQP 消息代理网关
pub struct AmqpBrokerGateway {
    url: String,
    state: RwLock<Option<AmqpHandle>>,
}

impl AmqpBrokerGateway {
    /// 建立到消息代理的连接，按指数退避重试。
    ///
    /// 重试耗尽后返回降级模式的网关而不是错误，后续操作会按需重连。
    pub async fn connect(config: &BrokerConfig) -> Self {
        let gateway = Self {
            url: config.url.clone(),
            state: RwLock::new(None),
        };

        let mut backoff = Duration::from_millis(config.retry_backoff_ms);
        for attempt in 0..=config.connect_retries {
            match Self::dial(&gateway.url).await {
                Ok(handle) => {
                    tracing::info!(attempt, "消息代理连接成功");
                    *gateway.state.write().await = Some(handle);
                    return gateway;
                }
                Err(err) if attempt < config.connect_retries => {
                    tracing::warn!(
                        attempt,
                        delay_ms = backoff.as_millis() as u64,
                        error = %err,
                        "消息代理连接失败，稍后重试"
                    );
                    sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => {
                    tracing::error!(error = %err, "消息代理不可用，进入降级模式");
                }
            }
        }
        gateway
    }

    async fn dial(url: &str) -> lapin::Result<AmqpHandle> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        Self::declare_topology(&channel).await?;
        Ok(AmqpHandle {
            _connection: connection,
            channel,
        })
    }

    /// 声明交换机、队列和绑定。全部声明幂等，可以重复执行。
    async fn declare_topology(channel: &Channel) -> lapin::Result<()> {
        channel
            .exchange_declare(
                EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for (queue, route) in [(PERSIST_QUEUE, PERSIST_ROUTE), (NOTIFY_QUEUE, NOTIFY_ROUTE)] {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            channel
                .queue_bind(
                    queue,
                    EXCHANGE,
                    route,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        // 死信队列不走交换机，按队列名直接投递
        channel
            .queue_declare(
                DEAD_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    /// 取出当前可用通道，连接中断时尝试重连一次。
    async fn ensure_channel(&self) -> BrokerResult<Channel> {
        {
            let state = self.state.read().await;
            if let Some(handle) = state.as_ref() {
                if handle.channel.status().connected() {
                    return Ok(handle.channel.clone());
                }
            }
        }

        let mut state = self.state.write().await;
        // 等写锁期间可能已有别的调用完成了重连
        if let Some(handle) = state.as_ref() {
            if handle.channel.status().connected() {
                return Ok(handle.channel.clone());
            }
        }
        match Self::dial(&self.url).await {
            Ok(handle) => {
                let channel = handle.channel.clone();
                *state = Some(handle);
                tracing::info!("消息代理重连成功");
                Ok(channel)
            }
            Err(err) => {
                *state = None;
                tracing::warn!(error = %err, "消息代理重连失败");
                Err(BrokerError::ChannelUnavailable)
            }
        }
    }

    async fn publish_raw(channel: &Channel, route: &str, payload: &[u8]) -> BrokerResult<()> {
        channel
            .basic_publish(
                EXCHANGE,
                route,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT_DELIVERY),
            )
            .await
            .map_err(publish_err)?
            .await
            .map_err(publish_err)?;
        Ok(())
    }

    /// 把无法反序列化的原始负载移入死信队列并确认原条目
    async fn dead_letter(channel: &Channel, delivery: &lapin::message::Delivery) -> BrokerResult<()> {
        channel
            .basic_publish(
                "",
                DEAD_QUEUE,
                BasicPublishOptions::default(),
                &delivery.data,
                BasicProperties::default().with_delivery_mode(PERSISTENT_DELIVERY),
            )
            .await
            .map_err(publish_err)?
            .await
            .map_err(publish_err)?;
        delivery
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(consume_err)?;
        Ok(())
    }
}

fn publish_err(err: lapin::Error) -> BrokerError {
    BrokerError::Publish(err.to_string())
}

fn consume_err(err: lapin::Error) -> BrokerError {
    BrokerError::Consume(err.to_string())
}

#[async_trait]
impl BrokerGateway for AmqpBrokerGateway {
    async fn publish(&self, route: &str, message: &Message) -> BrokerResult<()> {
        let channel = self.ensure_channel().await?;
        let payload =
            serde_json::to_vec(message).map_err(|err| BrokerError::Publish(err.to_string()))?;
        Self::publish_raw(&channel, route, &payload).await?;
        tracing::debug!(route, message_id = %message.id, "消息已发布");
        Ok(())
    }

    async fn peek_all(&self, queue: &str) -> BrokerResult<Vec<Message>> {
        let channel = self.ensure_channel().await?;
        let mut deliveries = Vec::new();
        let mut snapshot = Vec::new();

        let outcome = loop {
            if deliveries.len() >= PEEK_CAP {
                break Ok(());
            }
            match channel
                .basic_get(queue, BasicGetOptions { no_ack: false })
                .await
            {
                Ok(Some(fetched)) => {
                    let delivery = fetched.delivery;
                    match serde_json::from_slice::<Message>(&delivery.data) {
                        Ok(message) => snapshot.push(message),
                        Err(err) => {
                            // 快照不处理坏条目，原样放回，交给排空路径处置
                            tracing::warn!(queue, error = %err, "快照遇到无法反序列化的条目");
                        }
                    }
                    deliveries.push(delivery);
                    if deliveries.len() % YIELD_INTERVAL == 0 {
                        yield_now().await;
                    }
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(consume_err(err)),
            }
        };

        // 无论成败，取出的条目全部 requeue 放回队列
        for delivery in &deliveries {
            delivery
                .acker
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: true,
                })
                .await
                .map_err(consume_err)?;
        }

        outcome.map(|_| snapshot)
    }

    async fn drain(
        &self,
        queue: &str,
        max_count: usize,
        handler: &dyn DrainHandler,
    ) -> BrokerResult<usize> {
        let channel = self.ensure_channel().await?;
        let mut processed = 0;
        let mut fetched = 0;

        while fetched < max_count {
            let Some(entry) = channel
                .basic_get(queue, BasicGetOptions { no_ack: false })
                .await
                .map_err(consume_err)?
            else {
                break;
            };
            fetched += 1;
            let delivery = entry.delivery;

            let message = match serde_json::from_slice::<Message>(&delivery.data) {
                Ok(message) => message,
                Err(err) => {
                    // 坏条目重新入队只会无限循环，移入死信队列
                    tracing::warn!(queue, error = %err, "条目无法反序列化，移入死信队列");
                    Self::dead_letter(&channel, &delivery).await?;
                    continue;
                }
            };

            match handler.handle(message).await {
                Ok(()) => {
                    delivery
                        .acker
                        .ack(BasicAckOptions::default())
                        .await
                        .map_err(consume_err)?;
                    processed += 1;
                    if fetched % YIELD_INTERVAL == 0 {
                        yield_now().await;
                    }
                }
                Err(err) => {
                    tracing::warn!(queue, error = %err, "条目处理失败，重新入队并停止本批次");
                    delivery
                        .acker
                        .nack(BasicNackOptions {
                            multiple: false,
                            requeue: true,
                        })
                        .await
                        .map_err(consume_err)?;
                    break;
                }
            }
        }

        Ok(processed)
    }

    fn is_available(&self) -> bool {
        match self.state.try_read() {
            Ok(state) => state
                .as_ref()
                .map(|handle| handle.channel.status().connected())
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}
