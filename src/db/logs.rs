//! `moderator_logs` queries. Rows are only ever appended.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;
use uuid::Uuid;

use super::pagination::PageRequest;
use crate::models::{ModerationAction, ModeratorLog, TargetKind};

const COLUMNS: &str = "id, moderator_name, target_type, target_id, action, reason, details, \
                       content_report_id, created_at";

#[derive(Debug, Clone)]
pub struct NewLog<'a> {
    pub moderator_name: &'a str,
    pub target_type: TargetKind,
    pub target_id: i64,
    pub action: ModerationAction,
    pub reason: &'a str,
    pub details: &'a str,
    pub content_report_id: Option<Uuid>,
}

pub async fn append(
    db: impl SqliteExecutor<'_>,
    log: &NewLog<'_>,
    created_at: DateTime<Utc>,
) -> sqlx::Result<ModeratorLog> {
    let sql = format!(
        r#"
        INSERT INTO moderator_logs
            (id, moderator_name, target_type, target_id, action, reason, details, content_report_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING {COLUMNS}
        "#
    );
    sqlx::query_as(&sql)
        .bind(Uuid::new_v4())
        .bind(log.moderator_name)
        .bind(log.target_type.label())
        .bind(log.target_id)
        .bind(log.action.label())
        .bind(log.reason)
        .bind(log.details)
        .bind(log.content_report_id)
        .bind(created_at)
        .fetch_one(db)
        .await
}

pub async fn for_target(
    db: impl SqliteExecutor<'_>,
    target_type: TargetKind,
    target_id: i64,
) -> sqlx::Result<Vec<ModeratorLog>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM moderator_logs WHERE target_type = ? AND target_id = ? \
         ORDER BY created_at DESC"
    );
    sqlx::query_as(&sql)
        .bind(target_type.label())
        .bind(target_id)
        .fetch_all(db)
        .await
}

pub async fn count(db: impl SqliteExecutor<'_>) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM moderator_logs")
        .fetch_one(db)
        .await
}

pub async fn page(
    db: impl SqliteExecutor<'_>,
    request: PageRequest,
) -> sqlx::Result<Vec<ModeratorLog>> {
    let sql =
        format!("SELECT {COLUMNS} FROM moderator_logs ORDER BY created_at DESC LIMIT ? OFFSET ?");
    sqlx::query_as(&sql)
        .bind(request.limit())
        .bind(request.offset())
        .fetch_all(db)
        .await
}

pub async fn recent(db: impl SqliteExecutor<'_>, limit: i64) -> sqlx::Result<Vec<ModeratorLog>> {
    let sql = format!("SELECT {COLUMNS} FROM moderator_logs ORDER BY created_at DESC LIMIT ?");
    sqlx::query_as(&sql).bind(limit).fetch_all(db).await
}
