//! 批量持久化器单元测试

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domain::{Message, MessageContent, ReceiverKind, UserId};

use crate::gateway::memory::MemoryBrokerGateway;
use crate::gateway::{BrokerGateway, PERSIST_QUEUE, PERSIST_ROUTE};
use crate::repository::memory::MemoryMessageRepository;
use crate::services::{BatchPersister, BatchPersisterDependencies};

fn persister(
    gateway: &Arc<MemoryBrokerGateway>,
    repository: &Arc<MemoryMessageRepository>,
    batch_size: usize,
) -> BatchPersister {
    BatchPersister::new(BatchPersisterDependencies {
        gateway: gateway.clone(),
        repository: repository.clone(),
        batch_size,
        interval: Duration::from_secs(180),
    })
}

async fn enqueue(gateway: &MemoryBrokerGateway, count: usize) {
    for i in 0..count {
        let message = Message::new(
            UserId::from("alice"),
            MessageContent::new(format!("msg-{i}")).unwrap(),
            "bob",
            ReceiverKind::User,
            Utc::now(),
        )
        .unwrap();
        gateway.publish(PERSIST_ROUTE, &message).await.unwrap();
    }
}

#[tokio::test]
async fn test_run_persists_and_acks_all_entries() {
    let gateway = Arc::new(MemoryBrokerGateway::new());
    let repository = Arc::new(MemoryMessageRepository::new());
    enqueue(&gateway, 5).await;

    let persisted = persister(&gateway, &repository, 500).run_once().await;

    assert_eq!(persisted, 5);
    assert_eq!(repository.stored_count().await, 5);
    assert_eq!(gateway.queue_len(PERSIST_QUEUE).await, 0);
}

#[tokio::test]
async fn test_run_processes_at_most_batch_size() {
    let gateway = Arc::new(MemoryBrokerGateway::new());
    let repository = Arc::new(MemoryMessageRepository::new());
    enqueue(&gateway, 5).await;

    let persisted = persister(&gateway, &repository, 3).run_once().await;

    assert_eq!(persisted, 3);
    assert_eq!(gateway.queue_len(PERSIST_QUEUE).await, 2);
}

#[tokio::test]
async fn test_write_failure_halts_batch_and_requeues() {
    let gateway = Arc::new(MemoryBrokerGateway::new());
    let repository = Arc::new(MemoryMessageRepository::new());
    enqueue(&gateway, 3).await;
    repository.set_fail_writes(true);

    let persisted = persister(&gateway, &repository, 500).run_once().await;

    // 首个写失败即停止，后续条目原封不动留在队列里
    assert_eq!(persisted, 0);
    assert_eq!(repository.stored_count().await, 0);
    assert_eq!(gateway.queue_len(PERSIST_QUEUE).await, 3);

    // 存储恢复后下一轮把整个积压清空
    repository.set_fail_writes(false);
    let persisted = persister(&gateway, &repository, 500).run_once().await;
    assert_eq!(persisted, 3);
    assert_eq!(gateway.queue_len(PERSIST_QUEUE).await, 0);
}

#[tokio::test]
async fn test_partial_batch_stops_at_first_failure() {
    let gateway = Arc::new(MemoryBrokerGateway::new());
    let repository = Arc::new(MemoryMessageRepository::new());
    enqueue(&gateway, 2).await;

    // 第一轮正常落库两条，再入队三条并注入故障
    let persisted = persister(&gateway, &repository, 500).run_once().await;
    assert_eq!(persisted, 2);

    enqueue(&gateway, 3).await;
    repository.set_fail_writes(true);
    let persisted = persister(&gateway, &repository, 500).run_once().await;

    assert_eq!(persisted, 0);
    assert_eq!(repository.stored_count().await, 2);
    assert_eq!(gateway.queue_len(PERSIST_QUEUE).await, 3);
}

#[tokio::test]
async fn test_gateway_down_run_reports_zero_without_panic() {
    let gateway = Arc::new(MemoryBrokerGateway::new());
    let repository = Arc::new(MemoryMessageRepository::new());
    enqueue(&gateway, 2).await;
    gateway.set_available(false);

    let persisted = persister(&gateway, &repository, 500).run_once().await;

    assert_eq!(persisted, 0);
    assert_eq!(repository.stored_count().await, 0);
}
