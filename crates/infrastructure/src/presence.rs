//! Redis 在线状态存储
//!
//! 每个用户一个连接计数键 `presence:{userId}`，外加一个在线用户
//! 集合 `online_users`。计数键带 TTL 兜底：实例异常退出没有来得及
//! 递减时，残留的计数最终会自行过期。

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use application::presence::{PresenceError, PresenceStore};
use domain::UserId;

const ONLINE_USERS_KEY: &str = "online_users";

/// 残留计数的兜底过期时间（秒）
const PRESENCE_TTL_SECS: i64 = 86_400;

fn presence_key(user_id: &UserId) -> String {
    format!("presence:{user_id}")
}

fn map_redis_err(err: redis::RedisError) -> PresenceError {
    PresenceError::backend(err.to_string())
}

/// Redis 在线状态存储
#[derive(Clone)]
pub struct RedisPresenceStore {
    conn: ConnectionManager,
}

impl RedisPresenceStore {
    /// 基于自动重连的连接管理器创建存储
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn connection_opened(&self, user_id: &UserId) -> Result<u64, PresenceError> {
        let key = presence_key(user_id);
        let mut conn = self.conn.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(&key, 1)
            .expire(&key, PRESENCE_TTL_SECS)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        if count == 1 {
            let _: () = redis::pipe()
                .atomic()
                .sadd(ONLINE_USERS_KEY, user_id.as_str())
                .ignore()
                .expire(ONLINE_USERS_KEY, PRESENCE_TTL_SECS)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(map_redis_err)?;
        }
        Ok(count)
    }

    async fn connection_closed(&self, user_id: &UserId) -> Result<u64, PresenceError> {
        let key = presence_key(user_id);
        let mut conn = self.conn.clone();
        let count: i64 = conn.decr(&key, 1).await.map_err(map_redis_err)?;

        // 计数归零（或因重复断开变负）时清除在线记录
        if count <= 0 {
            let _: () = redis::pipe()
                .atomic()
                .del(&key)
                .ignore()
                .srem(ONLINE_USERS_KEY, user_id.as_str())
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(map_redis_err)?;
            return Ok(0);
        }
        Ok(count as u64)
    }

    async fn is_online(&self, user_id: &UserId) -> Result<bool, PresenceError> {
        let mut conn = self.conn.clone();
        let count: Option<i64> = conn
            .get(presence_key(user_id))
            .await
            .map_err(map_redis_err)?;
        Ok(count.unwrap_or(0) > 0)
    }

    async fn online_users(&self) -> Result<Vec<UserId>, PresenceError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .smembers(ONLINE_USERS_KEY)
            .await
            .map_err(map_redis_err)?;
        Ok(members.into_iter().map(UserId::new).collect())
    }
}
