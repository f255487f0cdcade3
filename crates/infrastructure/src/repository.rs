//! PostgreSQL 消息仓储与用户目录

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use application::repository::{MessageRepository, StoredMessage, UserDirectory};
use domain::{
    Message, MessageContent, MessageId, ReceiverKind, RepositoryError, UserId,
};

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

/// 创建 PostgreSQL 连接池
pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

const SELECT_CONVERSATION: &str = "SELECT m.id, m.content, m.sender, m.receiver, \
     m.receiver_kind, m.created_at, u.display_name \
     FROM messages m LEFT JOIN users u ON u.uid = m.sender";

fn row_to_stored(row: &PgRow) -> Result<StoredMessage, RepositoryError> {
    let receiver_kind = ReceiverKind::from_str(&row.get::<String, _>("receiver_kind"))
        .map_err(|err| invalid_data(err.to_string()))?;
    let content = MessageContent::new(row.get::<String, _>("content"))
        .map_err(|err| invalid_data(err.to_string()))?;
    Ok(StoredMessage {
        message: Message {
            id: MessageId(row.get::<Uuid, _>("id")),
            content,
            sender: UserId::new(row.get::<String, _>("sender")),
            receiver: row.get("receiver"),
            receiver_kind,
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
        },
        sender_display_name: row.get("display_name"),
    })
}

/// PostgreSQL 消息仓储
#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 检查数据库连接是否正常
    pub async fn health_check(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert(&self, message: &Message) -> Result<(), RepositoryError> {
        // 至少一次投递下确认可能丢失导致重投，按主键幂等写入
        sqlx::query(
            "INSERT INTO messages (id, content, sender, receiver, receiver_kind, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(message.id.0)
        .bind(message.content.as_str())
        .bind(message.sender.as_str())
        .bind(&message.receiver)
        .bind(message.receiver_kind.to_string())
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_conversation(
        &self,
        user_id: &UserId,
        counterparty: &str,
        kind: ReceiverKind,
    ) -> Result<Vec<StoredMessage>, RepositoryError> {
        let rows = match kind {
            ReceiverKind::User => {
                sqlx::query(&format!(
                    "{SELECT_CONVERSATION} \
                     WHERE m.receiver_kind = 'user' \
                       AND ((m.sender = $1 AND m.receiver = $2) \
                         OR (m.sender = $2 AND m.receiver = $1)) \
                     ORDER BY m.created_at ASC"
                ))
                .bind(user_id.as_str())
                .bind(counterparty)
                .fetch_all(&self.pool)
                .await
            }
            ReceiverKind::Group => {
                sqlx::query(&format!(
                    "{SELECT_CONVERSATION} \
                     WHERE m.receiver_kind = 'group' AND m.receiver = $1 \
                     ORDER BY m.created_at ASC"
                ))
                .bind(counterparty)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(map_sqlx_err)?;

        rows.iter().map(row_to_stored).collect()
    }
}

/// PostgreSQL 用户目录
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn display_name(&self, user_id: &UserId) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT display_name FROM users WHERE uid = $1")
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(row.map(|r| r.get("display_name")))
    }
}
