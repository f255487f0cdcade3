//! 消息代理网关抽象
//!
//! 定义持久化队列的发布/快照/排空契约。代理对每个队列条目保证
//! 单消费者投递：同一条目在被确认或否定确认之前，不会同时交给
//! 快照操作和持久化消费者。这是持久化队列唯一的并发控制手段，
//! 应用层不再引入额外锁。

use async_trait::async_trait;
use domain::Message;
use thiserror::Error;

/// 直连交换机名称
pub const EXCHANGE: &str = "chat_exchange";

/// 持久化队列及其路由键
pub const PERSIST_QUEUE: &str = "chat.persist";
pub const PERSIST_ROUTE: &str = "persist";

/// 通知队列及其路由键
pub const NOTIFY_QUEUE: &str = "chat.notify";
pub const NOTIFY_ROUTE: &str = "notify";

/// 死信队列：反复处理失败（无法反序列化）的条目归宿
pub const DEAD_QUEUE: &str = "chat.dead";

/// 单次快照/排空的条目数硬上限
pub const PEEK_CAP: usize = 500;

/// 长循环中每处理多少条让出一次调度器
pub const YIELD_INTERVAL: usize = 50;

/// 消息代理错误类型
#[derive(Debug, Error)]
pub enum BrokerError {
    /// 代理连接缺失，调用方应降级而不是崩溃
    #[error("broker channel unavailable")]
    ChannelUnavailable,

    /// 发布失败
    #[error("publish failed: {0}")]
    Publish(String),

    /// 消费失败
    #[error("consume failed: {0}")]
    Consume(String),

    /// 队列负载无法反序列化
    #[error("malformed queue entry: {0}")]
    Malformed(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// 排空处理器
///
/// `drain` 对每个反序列化后的条目调用一次；返回错误表示该条目
/// 处理失败，网关会将其重新入队并立即停止当前批次。
#[async_trait]
pub trait DrainHandler: Send + Sync {
    async fn handle(
        &self,
        message: Message,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// 消息代理网关
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// 按路由键发布一条消息
    async fn publish(&self, route: &str, message: &Message) -> BrokerResult<()>;

    /// 非破坏性地获取队列当前全部内容（至多 [`PEEK_CAP`] 条）。
    ///
    /// 实现方式是手动确认模式下逐条取出，取完后对每条做 requeue
    /// 否定确认放回。无竞争时队列长度在调用前后不变；重新入队后
    /// 不保证严格保持原有 FIFO 顺序，调用方不得依赖。
    async fn peek_all(&self, queue: &str) -> BrokerResult<Vec<Message>>;

    /// 消费至多 `max_count` 条，每条交给 `handler` 处理。
    ///
    /// 处理成功则确认；首个失败条目被 requeue 否定确认，同时立即
    /// 停止本批次剩余条目。返回成功处理的条数。
    async fn drain(
        &self,
        queue: &str,
        max_count: usize,
        handler: &dyn DrainHandler,
    ) -> BrokerResult<usize>;

    /// 代理连接当前是否可用。
    ///
    /// 分发服务在实时广播之前先探测可用性，避免在持久化注定失败时
    /// 把消息广播出去。
    fn is_available(&self) -> bool;
}

/// 内存实现的消息代理（用于测试和单机开发）
pub mod memory {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::Mutex;
    use tokio::task::yield_now;

    use super::*;

    /// 内存队列代理。
    ///
    /// 路由绑定与真实拓扑一致：`persist` → `chat.persist`，
    /// `notify` → `chat.notify`；未绑定的路由键按直连交换机语义丢弃。
    pub struct MemoryBrokerGateway {
        queues: Mutex<HashMap<String, VecDeque<Message>>>,
        available: AtomicBool,
    }

    impl MemoryBrokerGateway {
        pub fn new() -> Self {
            let mut queues = HashMap::new();
            queues.insert(PERSIST_QUEUE.to_string(), VecDeque::new());
            queues.insert(NOTIFY_QUEUE.to_string(), VecDeque::new());
            queues.insert(DEAD_QUEUE.to_string(), VecDeque::new());
            Self {
                queues: Mutex::new(queues),
                available: AtomicBool::new(true),
            }
        }

        /// 模拟代理连接断开/恢复
        pub fn set_available(&self, available: bool) {
            self.available.store(available, Ordering::Relaxed);
        }

        /// 当前队列长度（测试辅助）
        pub async fn queue_len(&self, queue: &str) -> usize {
            let queues = self.queues.lock().await;
            queues.get(queue).map(VecDeque::len).unwrap_or(0)
        }

        fn route_to_queue(route: &str) -> Option<&'static str> {
            match route {
                PERSIST_ROUTE => Some(PERSIST_QUEUE),
                NOTIFY_ROUTE => Some(NOTIFY_QUEUE),
                _ => None,
            }
        }

        fn ensure_available(&self) -> BrokerResult<()> {
            if self.available.load(Ordering::Relaxed) {
                Ok(())
            } else {
                Err(BrokerError::ChannelUnavailable)
            }
        }
    }

    impl Default for MemoryBrokerGateway {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl BrokerGateway for MemoryBrokerGateway {
        async fn publish(&self, route: &str, message: &Message) -> BrokerResult<()> {
            self.ensure_available()?;
            if let Some(queue) = Self::route_to_queue(route) {
                let mut queues = self.queues.lock().await;
                queues
                    .entry(queue.to_string())
                    .or_default()
                    .push_back(message.clone());
            }
            Ok(())
        }

        async fn peek_all(&self, queue: &str) -> BrokerResult<Vec<Message>> {
            self.ensure_available()?;
            // 取出快照后整体放回，不破坏队列内容
            let snapshot: Vec<Message> = {
                let queues = self.queues.lock().await;
                queues
                    .get(queue)
                    .map(|entries| entries.iter().take(PEEK_CAP).cloned().collect())
                    .unwrap_or_default()
            };
            for (index, _) in snapshot.iter().enumerate() {
                if (index + 1) % YIELD_INTERVAL == 0 {
                    yield_now().await;
                }
            }
            Ok(snapshot)
        }

        async fn drain(
            &self,
            queue: &str,
            max_count: usize,
            handler: &dyn DrainHandler,
        ) -> BrokerResult<usize> {
            self.ensure_available()?;
            let mut processed = 0;
            while processed < max_count {
                let entry = {
                    let mut queues = self.queues.lock().await;
                    queues.get_mut(queue).and_then(VecDeque::pop_front)
                };
                let Some(message) = entry else {
                    break;
                };
                match handler.handle(message.clone()).await {
                    Ok(()) => {
                        processed += 1;
                        if processed % YIELD_INTERVAL == 0 {
                            yield_now().await;
                        }
                    }
                    Err(err) => {
                        // requeue 放回队首，剩余条目留给下一轮
                        tracing::warn!(queue, error = %err, "条目处理失败，重新入队并停止本批次");
                        let mut queues = self.queues.lock().await;
                        queues
                            .entry(queue.to_string())
                            .or_default()
                            .push_front(message);
                        break;
                    }
                }
            }
            Ok(processed)
        }

        fn is_available(&self) -> bool {
            self.available.load(Ordering::Relaxed)
        }
    }
}
