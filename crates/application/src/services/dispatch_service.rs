//! 消息分发服务
//!
//! 请求侧入口：构造带标识的消息记录，同步触发实时分发，然后发布到
//! 持久化队列。至少一次投递语义从这里产生：调用方拿到的发送确认
//! 先于实际落库。

use std::sync::Arc;

use domain::{Message, MessageContent, UserId};

use crate::clock::Clock;
use crate::dto::{SendMessageRequest, SentMessage};
use crate::error::ApplicationError;
use crate::fanout::{ConnectionId, FanoutHub};
use crate::gateway::{BrokerError, BrokerGateway, NOTIFY_ROUTE, PERSIST_ROUTE};
use crate::repository::UserDirectory;

pub struct DispatchServiceDependencies {
    pub gateway: Arc<dyn BrokerGateway>,
    pub fanout: Arc<FanoutHub>,
    pub directory: Arc<dyn UserDirectory>,
    pub clock: Arc<dyn Clock>,
}

/// 消息分发服务
pub struct DispatchService {
    gateway: Arc<dyn BrokerGateway>,
    fanout: Arc<FanoutHub>,
    directory: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
}

impl DispatchService {
    pub fn new(deps: DispatchServiceDependencies) -> Self {
        Self {
            gateway: deps.gateway,
            fanout: deps.fanout,
            directory: deps.directory,
            clock: deps.clock,
        }
    }

    /// 发送一条消息。
    ///
    /// 1. 校验内容和接收方；
    /// 2. 构造消息（此刻分配标识和时间戳）；
    /// 3. 同步实时分发（尽力而为，失败只记录日志）；
    /// 4. 发布到持久化和通知两个路由，代理不可用时整个操作显式失败；
    /// 5. 返回构造的消息作为发送确认。
    ///
    /// 代理不可用时在实时分发之前就失败，保证失败的发送既不会被
    /// 广播也不会出现在待持久化快照中。
    pub async fn send_message(
        &self,
        sender: UserId,
        request: SendMessageRequest,
        origin: Option<ConnectionId>,
    ) -> Result<SentMessage, ApplicationError> {
        if request.receiver.trim().is_empty() {
            return Err(ApplicationError::InvalidRequest(
                "receiver is required".to_string(),
            ));
        }
        let content = MessageContent::new(request.content)?;

        if !self.gateway.is_available() {
            tracing::warn!(sender = %sender, "消息代理不可用，拒绝发送");
            return Err(ApplicationError::Broker(BrokerError::ChannelUnavailable));
        }

        let message = Message::new(
            sender,
            content,
            request.receiver,
            request.receiver_kind,
            self.clock.now(),
        )?;

        // 实时分发先于持久化发布；在线接收方立即看到消息
        self.fanout.deliver(&message, origin).await;

        // 持久化路由失败必须显式告知调用方，而不是返回虚假成功
        self.gateway.publish(PERSIST_ROUTE, &message).await?;
        self.gateway.publish(NOTIFY_ROUTE, &message).await?;

        tracing::info!(
            message_id = %message.id,
            receiver = %message.receiver,
            kind = %message.receiver_kind,
            "消息已入队待持久化"
        );

        // 展示名关联是尽力而为的：消息已经入队，目录故障不应让发送失败
        let display_name = match self.directory.display_name(&message.sender).await {
            Ok(name) => name,
            Err(err) => {
                tracing::warn!(sender = %message.sender, error = %err, "展示名查询失败");
                None
            }
        };

        Ok(SentMessage::new(message, display_name))
    }
}
