//! 批量持久化器
//!
//! 周期性地从持久化队列排空一个有界批次，逐条写入存储并确认。
//! 首个写失败即停止本批次：系统性的存储故障每轮只产生一次失败写，
//! 而不是对着故障存储重试几百次；代价是可能卡在单条毒消息后面。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::Message;

use crate::gateway::{BrokerGateway, DrainHandler, PERSIST_QUEUE};
use crate::repository::MessageRepository;

pub struct BatchPersisterDependencies {
    pub gateway: Arc<dyn BrokerGateway>,
    pub repository: Arc<dyn MessageRepository>,
    /// 单轮处理的条目数上限
    pub batch_size: usize,
    /// 两轮之间的间隔
    pub interval: Duration,
}

/// 批量持久化器
pub struct BatchPersister {
    gateway: Arc<dyn BrokerGateway>,
    repository: Arc<dyn MessageRepository>,
    batch_size: usize,
    interval: Duration,
}

struct PersistHandler {
    repository: Arc<dyn MessageRepository>,
}

#[async_trait]
impl DrainHandler for PersistHandler {
    async fn handle(
        &self,
        message: Message,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.repository.insert(&message).await?;
        tracing::debug!(message_id = %message.id, "消息已落库");
        Ok(())
    }
}

impl BatchPersister {
    pub fn new(deps: BatchPersisterDependencies) -> Self {
        Self {
            gateway: deps.gateway,
            repository: deps.repository,
            batch_size: deps.batch_size,
            interval: deps.interval,
        }
    }

    /// 执行一轮持久化，返回成功落库的条数。
    ///
    /// 整轮失败（例如代理连接缺失）只记录日志，不会让宿主进程崩溃。
    pub async fn run_once(&self) -> usize {
        let handler = PersistHandler {
            repository: self.repository.clone(),
        };
        match self
            .gateway
            .drain(PERSIST_QUEUE, self.batch_size, &handler)
            .await
        {
            Ok(persisted) => {
                if persisted > 0 {
                    tracing::info!(persisted, "本轮持久化完成");
                } else {
                    tracing::debug!("本轮没有待持久化的消息");
                }
                persisted
            }
            Err(err) => {
                tracing::error!(error = %err, "持久化轮次失败");
                0
            }
        }
    }

    /// 按固定间隔驱动 [`run_once`](Self::run_once) 的后台任务
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // 第一个 tick 立即返回，跳过以免启动时抢跑
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
