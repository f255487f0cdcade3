//! 实时分发中心
//!
//! 维护按用户和按群组的投递房间，把消息路由到正确的连接集合，
//! 并在连接计数跨越 0/1 边界时广播在线状态变更。每个实例通过共享
//! 的发布订阅背板转发本地产生的事件，使多个分发实例路由到相同的
//! 逻辑房间，实现水平扩展。
//!
//! 投递是尽力而为的：实时路径没有持久性，错误只记录日志。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{FanoutEvent, Message, PresenceStatus, ReceiverKind, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::clock::Clock;
use crate::presence::{PresenceError, PresenceStore};

/// 连接唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 注册返回的连接句柄：连接标识加事件接收端
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub events: mpsc::UnboundedReceiver<FanoutEvent>,
}

/// 背板错误
#[derive(Debug, Error)]
pub enum BackplaneError {
    #[error("backplane publish failed: {0}")]
    Publish(String),
}

impl BackplaneError {
    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish(message.into())
    }
}

/// 跨实例转发的事件帧，带来源实例标识以便过滤回声
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub instance_id: Uuid,
    pub event: FanoutEvent,
}

/// 分发背板：把本实例的事件发布给其他实例
#[async_trait]
pub trait EventBackplane: Send + Sync {
    async fn publish(&self, frame: &EventFrame) -> Result<(), BackplaneError>;
}

struct ConnectionEntry {
    user_id: UserId,
    sender: mpsc::UnboundedSender<FanoutEvent>,
}

#[derive(Default)]
struct RoomState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

fn user_room(user_id: &UserId) -> String {
    format!("user:{user_id}")
}

fn group_room(group_id: &str) -> String {
    format!("group:{group_id}")
}

/// 实时分发中心
pub struct FanoutHub {
    instance_id: Uuid,
    state: RwLock<RoomState>,
    presence: Arc<dyn PresenceStore>,
    backplane: Option<Arc<dyn EventBackplane>>,
    clock: Arc<dyn Clock>,
}

impl FanoutHub {
    pub fn new(presence: Arc<dyn PresenceStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            state: RwLock::new(RoomState::default()),
            presence,
            backplane: None,
            clock,
        }
    }

    /// 接入共享背板，使多个实例路由到相同的逻辑房间
    pub fn with_backplane(mut self, backplane: Arc<dyn EventBackplane>) -> Self {
        self.backplane = Some(backplane);
        self
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// 注册一个连接：加入用户个人房间并递增连接计数。
    ///
    /// 计数 0→1 时向所有连接广播一次上线事件。
    pub async fn register(&self, user_id: UserId) -> Result<ConnectionHandle, PresenceError> {
        let (sender, events) = mpsc::unbounded_channel();
        let id = ConnectionId::generate();

        {
            let mut state = self.state.write().await;
            state.connections.insert(
                id,
                ConnectionEntry {
                    user_id: user_id.clone(),
                    sender,
                },
            );
            state
                .rooms
                .entry(user_room(&user_id))
                .or_default()
                .insert(id);
        }

        let count = match self.presence.connection_opened(&user_id).await {
            Ok(count) => count,
            Err(err) => {
                // 计数失败时回滚注册，否则这个连接再也无法被 disconnect 回收
                let mut state = self.state.write().await;
                state.connections.remove(&id);
                if let Some(members) = state.rooms.get_mut(&user_room(&user_id)) {
                    members.remove(&id);
                }
                state.rooms.retain(|_, members| !members.is_empty());
                return Err(err);
            }
        };
        tracing::info!(user_id = %user_id, connection = %id, count, "连接注册");
        if count == 1 {
            self.broadcast_status(user_id, PresenceStatus::Online).await;
        }

        Ok(ConnectionHandle { id, events })
    }

    /// 加入群组房间（纯路由，不涉及持久化）
    pub async fn join_group(&self, connection: ConnectionId, group_id: &str) {
        let mut state = self.state.write().await;
        if state.connections.contains_key(&connection) {
            state
                .rooms
                .entry(group_room(group_id))
                .or_default()
                .insert(connection);
            tracing::debug!(connection = %connection, group_id, "加入群组房间");
        }
    }

    /// 把消息投递到接收方房间，并转发到背板。
    ///
    /// 群组消息投递给群组房间中除来源连接之外的所有连接；
    /// 私聊消息投递给接收方个人房间的全部连接。
    pub async fn deliver(&self, message: &Message, origin: Option<ConnectionId>) {
        self.deliver_local(message, origin).await;
        self.forward(FanoutEvent::MessageDelivered {
            message: message.clone(),
        })
        .await;
    }

    /// 断开一个连接：离开所有房间并递减连接计数。
    ///
    /// 计数归零时清除在线标记并恰好广播一次下线事件。
    pub async fn disconnect(&self, connection: ConnectionId) -> Result<(), PresenceError> {
        let entry = {
            let mut state = self.state.write().await;
            let entry = state.connections.remove(&connection);
            if entry.is_some() {
                for members in state.rooms.values_mut() {
                    members.remove(&connection);
                }
                state.rooms.retain(|_, members| !members.is_empty());
            }
            entry
        };

        let Some(entry) = entry else {
            // 重复断开同一连接是无害的
            return Ok(());
        };

        let count = self.presence.connection_closed(&entry.user_id).await?;
        tracing::info!(user_id = %entry.user_id, connection = %connection, count, "连接断开");
        if count == 0 {
            self.broadcast_status(entry.user_id, PresenceStatus::Offline)
                .await;
        }
        Ok(())
    }

    /// 应用来自背板的远端事件帧，跳过自身实例的回声
    pub async fn apply_remote(&self, frame: EventFrame) {
        if frame.instance_id == self.instance_id {
            return;
        }
        match frame.event {
            FanoutEvent::MessageDelivered { message } => {
                self.deliver_local(&message, None).await;
            }
            event @ FanoutEvent::UserStatusChanged { .. } => {
                self.broadcast_all(event).await;
            }
        }
    }

    async fn deliver_local(&self, message: &Message, origin: Option<ConnectionId>) {
        let room = match message.receiver_kind {
            ReceiverKind::Group => group_room(&message.receiver),
            ReceiverKind::User => user_room(&UserId::new(message.receiver.clone())),
        };
        let state = self.state.read().await;
        let Some(members) = state.rooms.get(&room) else {
            tracing::debug!(room, message_id = %message.id, "房间没有在线连接");
            return;
        };
        for member in members {
            if message.receiver_kind == ReceiverKind::Group && origin == Some(*member) {
                continue;
            }
            if let Some(entry) = state.connections.get(member) {
                // 接收端已关闭的连接由 disconnect 负责清理
                let _ = entry.sender.send(FanoutEvent::MessageDelivered {
                    message: message.clone(),
                });
            }
        }
    }

    async fn broadcast_status(&self, user_id: UserId, status: PresenceStatus) {
        let event = FanoutEvent::UserStatusChanged {
            user_id: user_id.clone(),
            status,
            timestamp: self.clock.now(),
        };
        tracing::info!(user_id = %user_id, %status, "在线状态变更");
        self.broadcast_all(event.clone()).await;
        self.forward(event).await;
    }

    /// 向本实例全部连接广播（状态变更事件对所有客户端可见）
    async fn broadcast_all(&self, event: FanoutEvent) {
        let state = self.state.read().await;
        for entry in state.connections.values() {
            let _ = entry.sender.send(event.clone());
        }
    }

    async fn forward(&self, event: FanoutEvent) {
        let Some(backplane) = &self.backplane else {
            return;
        };
        let frame = EventFrame {
            instance_id: self.instance_id,
            event,
        };
        if let Err(err) = backplane.publish(&frame).await {
            tracing::warn!(event = frame.event.event_type(), error = %err, "背板转发失败");
        }
    }
}

/// 内存背板（用于测试多实例路由）
pub mod memory {
    use tokio::sync::broadcast;

    use super::*;

    #[derive(Clone)]
    pub struct BroadcastBackplane {
        sender: broadcast::Sender<EventFrame>,
    }

    impl BroadcastBackplane {
        pub fn new(capacity: usize) -> Self {
            let (sender, _) = broadcast::channel(capacity);
            Self { sender }
        }

        pub fn subscribe(&self) -> broadcast::Receiver<EventFrame> {
            self.sender.subscribe()
        }
    }

    #[async_trait]
    impl EventBackplane for BroadcastBackplane {
        async fn publish(&self, frame: &EventFrame) -> Result<(), BackplaneError> {
            if self.sender.receiver_count() == 0 {
                return Ok(());
            }
            self.sender
                .send(frame.clone())
                .map_err(|err| BackplaneError::publish(err.to_string()))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::presence::memory::MemoryPresenceStore;
    use chrono::Utc;
    use domain::MessageContent;

    fn hub() -> FanoutHub {
        FanoutHub::new(
            Arc::new(MemoryPresenceStore::new()),
            Arc::new(SystemClock),
        )
    }

    fn message(sender: &str, receiver: &str, kind: ReceiverKind) -> Message {
        Message::new(
            UserId::from(sender),
            MessageContent::new("hello").unwrap(),
            receiver,
            kind,
            Utc::now(),
        )
        .unwrap()
    }

    fn drain_events(handle: &mut ConnectionHandle) -> Vec<FanoutEvent> {
        let mut events = Vec::new();
        while let Ok(event) = handle.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn offline_count(events: &[FanoutEvent], user: &UserId) -> usize {
        events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    FanoutEvent::UserStatusChanged { user_id, status: PresenceStatus::Offline, .. }
                    if user_id == user
                )
            })
            .count()
    }

    #[tokio::test]
    async fn test_user_delivery_reaches_all_recipient_connections() {
        let hub = hub();
        let mut bob_a = hub.register(UserId::from("bob")).await.unwrap();
        let mut bob_b = hub.register(UserId::from("bob")).await.unwrap();
        drain_events(&mut bob_a);
        drain_events(&mut bob_b);

        hub.deliver(&message("alice", "bob", ReceiverKind::User), None)
            .await;

        for handle in [&mut bob_a, &mut bob_b] {
            let events = drain_events(handle);
            assert_eq!(events.len(), 1);
            assert!(matches!(events[0], FanoutEvent::MessageDelivered { .. }));
        }
    }

    #[tokio::test]
    async fn test_group_delivery_excludes_origin_connection() {
        let hub = hub();
        let mut alice = hub.register(UserId::from("alice")).await.unwrap();
        let mut bob = hub.register(UserId::from("bob")).await.unwrap();
        hub.join_group(alice.id, "team-42").await;
        hub.join_group(bob.id, "team-42").await;
        drain_events(&mut alice);
        drain_events(&mut bob);

        hub.deliver(
            &message("alice", "team-42", ReceiverKind::Group),
            Some(alice.id),
        )
        .await;

        assert!(drain_events(&mut alice).is_empty());
        assert_eq!(drain_events(&mut bob).len(), 1);
    }

    #[tokio::test]
    async fn test_offline_broadcast_fires_exactly_once() {
        let hub = hub();
        let alice = UserId::from("alice");
        let mut observer = hub.register(UserId::from("bob")).await.unwrap();

        let first = hub.register(alice.clone()).await.unwrap();
        let second = hub.register(alice.clone()).await.unwrap();

        // 关掉一个连接：仍在线，不广播下线
        hub.disconnect(first.id).await.unwrap();
        assert_eq!(offline_count(&drain_events(&mut observer), &alice), 0);

        // 关掉最后一个连接：恰好广播一次下线
        hub.disconnect(second.id).await.unwrap();
        assert_eq!(offline_count(&drain_events(&mut observer), &alice), 1);

        // 重复断开无副作用
        hub.disconnect(second.id).await.unwrap();
        assert_eq!(offline_count(&drain_events(&mut observer), &alice), 0);
    }

    #[tokio::test]
    async fn test_online_broadcast_only_on_first_connection() {
        let hub = hub();
        let mut observer = hub.register(UserId::from("bob")).await.unwrap();
        drain_events(&mut observer);

        hub.register(UserId::from("alice")).await.unwrap();
        hub.register(UserId::from("alice")).await.unwrap();

        let online: usize = drain_events(&mut observer)
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    FanoutEvent::UserStatusChanged { status: PresenceStatus::Online, .. }
                )
            })
            .count();
        assert_eq!(online, 1);
    }

    #[tokio::test]
    async fn test_failed_register_leaves_no_connection_behind() {
        struct DownPresenceStore;

        #[async_trait]
        impl PresenceStore for DownPresenceStore {
            async fn connection_opened(&self, _: &UserId) -> Result<u64, PresenceError> {
                Err(PresenceError::backend("presence down"))
            }
            async fn connection_closed(&self, _: &UserId) -> Result<u64, PresenceError> {
                Ok(0)
            }
            async fn is_online(&self, _: &UserId) -> Result<bool, PresenceError> {
                Ok(false)
            }
            async fn online_users(&self) -> Result<Vec<UserId>, PresenceError> {
                Ok(Vec::new())
            }
        }

        let hub = FanoutHub::new(Arc::new(DownPresenceStore), Arc::new(SystemClock));
        assert!(hub.register(UserId::from("alice")).await.is_err());

        // 注册失败后不留下任何连接或房间成员
        let state = hub.state.read().await;
        assert!(state.connections.is_empty());
        assert!(state.rooms.is_empty());
    }

    #[tokio::test]
    async fn test_remote_frames_route_to_local_rooms() {
        let presence = Arc::new(MemoryPresenceStore::new());
        let hub_a = FanoutHub::new(presence.clone(), Arc::new(SystemClock));
        let hub_b = FanoutHub::new(presence, Arc::new(SystemClock));

        let mut bob = hub_b.register(UserId::from("bob")).await.unwrap();
        drain_events(&mut bob);

        // 实例 A 产生的帧被实例 B 应用
        let frame = EventFrame {
            instance_id: hub_a.instance_id(),
            event: FanoutEvent::MessageDelivered {
                message: message("alice", "bob", ReceiverKind::User),
            },
        };
        hub_b.apply_remote(frame.clone()).await;
        assert_eq!(drain_events(&mut bob).len(), 1);

        // 自身实例的回声被跳过
        let echo = EventFrame {
            instance_id: hub_b.instance_id(),
            ..frame
        };
        hub_b.apply_remote(echo).await;
        assert!(drain_events(&mut bob).is_empty());
    }
}
