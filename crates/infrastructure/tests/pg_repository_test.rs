//! PostgreSQL 仓储集成测试
//!
//! 需要真实数据库，设置 PG_INTEGRATION_TEST 和 DATABASE_URL 后运行。

use chrono::Utc;
use domain::{Message, MessageContent, ReceiverKind, UserId};
use infrastructure::{create_pg_pool, PgMessageRepository, PgUserDirectory, MIGRATOR};
use application::{MessageRepository, UserDirectory};

async fn live_pool() -> Option<sqlx::PgPool> {
    std::env::var("PG_INTEGRATION_TEST").ok()?;
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = create_pg_pool(&url, 2).await.ok()?;
    MIGRATOR.run(&pool).await.ok()?;
    Some(pool)
}

fn message(sender: &str, receiver: &str, kind: ReceiverKind, content: &str) -> Message {
    Message::new(
        UserId::from(sender),
        MessageContent::new(content).unwrap(),
        receiver,
        kind,
        Utc::now(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_insert_is_idempotent_by_id() {
    let Some(pool) = live_pool().await else {
        return;
    };
    let repository = PgMessageRepository::new(pool);
    let sender = format!("it-{}", uuid::Uuid::new_v4());
    let msg = message(&sender, "bob", ReceiverKind::User, "hello");

    repository.insert(&msg).await.unwrap();
    // 重投同一条消息不报错也不产生第二行
    repository.insert(&msg).await.unwrap();

    let stored = repository
        .find_conversation(&UserId::new(sender), "bob", ReceiverKind::User)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].message.id, msg.id);
}

#[tokio::test]
async fn test_conversation_is_symmetric_and_sorted() {
    let Some(pool) = live_pool().await else {
        return;
    };
    let repository = PgMessageRepository::new(pool);
    let alice = format!("it-{}", uuid::Uuid::new_v4());
    let bob = format!("it-{}", uuid::Uuid::new_v4());

    repository
        .insert(&message(&alice, &bob, ReceiverKind::User, "first"))
        .await
        .unwrap();
    repository
        .insert(&message(&bob, &alice, ReceiverKind::User, "second"))
        .await
        .unwrap();

    let stored = repository
        .find_conversation(&UserId::new(alice.clone()), &bob, ReceiverKind::User)
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].message.content.as_str(), "first");
    assert_eq!(stored[1].message.content.as_str(), "second");
    assert!(stored[0].message.created_at <= stored[1].message.created_at);
}

#[tokio::test]
async fn test_display_name_joined_when_registered() {
    let Some(pool) = live_pool().await else {
        return;
    };
    let uid = format!("it-{}", uuid::Uuid::new_v4());
    sqlx::query("INSERT INTO users (uid, display_name) VALUES ($1, $2)")
        .bind(&uid)
        .bind("Alice Wang")
        .execute(&pool)
        .await
        .unwrap();

    let directory = PgUserDirectory::new(pool.clone());
    assert_eq!(
        directory.display_name(&UserId::new(uid.clone())).await.unwrap(),
        Some("Alice Wang".to_string())
    );
    // 未注册的用户返回 None 而不是错误
    assert_eq!(
        directory
            .display_name(&UserId::new(format!("missing-{uid}")))
            .await
            .unwrap(),
        None
    );

    let repository = PgMessageRepository::new(pool);
    repository
        .insert(&message(&uid, "bob", ReceiverKind::User, "hi"))
        .await
        .unwrap();
    let stored = repository
        .find_conversation(&UserId::new(uid), "bob", ReceiverKind::User)
        .await
        .unwrap();
    assert_eq!(
        stored[0].sender_display_name,
        Some("Alice Wang".to_string())
    );
}
