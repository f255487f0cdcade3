//! 数据库迁移

use sqlx::migrate::Migrator;

/// 编译期内嵌 `migrations/` 目录下的迁移脚本
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
