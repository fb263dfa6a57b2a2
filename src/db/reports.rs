//! `content_reports` queries.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteExecutor};
use uuid::Uuid;

use super::pagination::PageRequest;
use crate::models::{ContentReport, ReportTarget};

const COLUMNS: &str =
    "id, email, person_id, message_id, reason, explanation, created_at, resolved_at";

/// Raw row; `person_id`/`message_id` fold into a [`ReportTarget`].
#[derive(FromRow)]
struct ReportRow {
    id: Uuid,
    email: String,
    person_id: Option<i64>,
    message_id: Option<i64>,
    reason: String,
    explanation: Option<String>,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<ReportRow> for ContentReport {
    type Error = sqlx::Error;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        let target = match (row.person_id, row.message_id) {
            (Some(id), None) => ReportTarget::Person(id),
            (None, Some(id)) => ReportTarget::Message(id),
            _ => {
                return Err(sqlx::Error::Decode(
                    format!("report {} must target exactly one entity", row.id).into(),
                ));
            }
        };

        Ok(Self {
            id: row.id,
            email: row.email,
            reason: row.reason,
            explanation: row.explanation,
            target,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}

fn convert(rows: Vec<ReportRow>) -> sqlx::Result<Vec<ContentReport>> {
    rows.into_iter().map(ContentReport::try_from).collect()
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub email: String,
    pub reason: String,
    pub explanation: Option<String>,
    pub target: ReportTarget,
}

pub async fn insert(
    db: impl SqliteExecutor<'_>,
    report: &NewReport,
    created_at: DateTime<Utc>,
) -> sqlx::Result<ContentReport> {
    let sql = format!(
        r#"
        INSERT INTO content_reports (id, email, person_id, message_id, reason, explanation, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING {COLUMNS}
        "#
    );
    let row: ReportRow = sqlx::query_as(&sql)
        .bind(Uuid::new_v4())
        .bind(&report.email)
        .bind(report.target.person_id())
        .bind(report.target.message_id())
        .bind(&report.reason)
        .bind(&report.explanation)
        .bind(created_at)
        .fetch_one(db)
        .await?;
    row.try_into()
}

pub async fn find(db: impl SqliteExecutor<'_>, id: Uuid) -> sqlx::Result<Option<ContentReport>> {
    let sql = format!("SELECT {COLUMNS} FROM content_reports WHERE id = ?");
    let row: Option<ReportRow> = sqlx::query_as(&sql).bind(id).fetch_optional(db).await?;
    row.map(ContentReport::try_from).transpose()
}

/// Stamp the report as resolved unless it already is.
///
/// Returns `false` when the report does not exist or was resolved earlier; the
/// first resolution time is never overwritten.
pub async fn resolve_if_pending(
    db: impl SqliteExecutor<'_>,
    id: Uuid,
    now: DateTime<Utc>,
) -> sqlx::Result<bool> {
    let result =
        sqlx::query("UPDATE content_reports SET resolved_at = ? WHERE id = ? AND resolved_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(db)
            .await?;
    Ok(result.rows_affected() == 1)
}

/// Reports filed against one entity, newest first.
pub async fn for_target(
    db: impl SqliteExecutor<'_>,
    target: ReportTarget,
) -> sqlx::Result<Vec<ContentReport>> {
    let column = match target {
        ReportTarget::Person(_) => "person_id",
        ReportTarget::Message(_) => "message_id",
    };
    let sql = format!(
        "SELECT {COLUMNS} FROM content_reports WHERE {column} = ? ORDER BY created_at DESC"
    );
    let rows = sqlx::query_as(&sql).bind(target.id()).fetch_all(db).await?;
    convert(rows)
}

pub async fn count(db: impl SqliteExecutor<'_>) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM content_reports")
        .fetch_one(db)
        .await
}

pub async fn page(
    db: impl SqliteExecutor<'_>,
    request: PageRequest,
) -> sqlx::Result<Vec<ContentReport>> {
    let sql =
        format!("SELECT {COLUMNS} FROM content_reports ORDER BY created_at DESC LIMIT ? OFFSET ?");
    let rows = sqlx::query_as(&sql)
        .bind(request.limit())
        .bind(request.offset())
        .fetch_all(db)
        .await?;
    convert(rows)
}

pub async fn recent(db: impl SqliteExecutor<'_>, limit: i64) -> sqlx::Result<Vec<ContentReport>> {
    let sql = format!("SELECT {COLUMNS} FROM content_reports ORDER BY created_at DESC LIMIT ?");
    let rows = sqlx::query_as(&sql).bind(limit).fetch_all(db).await?;
    convert(rows)
}

pub async fn created_since(
    db: impl SqliteExecutor<'_>,
    since: DateTime<Utc>,
) -> sqlx::Result<Vec<DateTime<Utc>>> {
    sqlx::query_scalar("SELECT created_at FROM content_reports WHERE created_at >= ?")
        .bind(since)
        .fetch_all(db)
        .await
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db;

    fn report(target: ReportTarget) -> NewReport {
        NewReport {
            email: "visitor@example.com".to_owned(),
            reason: "spam".to_owned(),
            explanation: None,
            target,
        }
    }

    #[tokio::test]
    async fn target_round_trips_through_the_columns() {
        let db = db::test_pool().await;
        let stored = insert(&db, &report(ReportTarget::Message(12)), Utc::now())
            .await
            .unwrap();

        let loaded = find(&db, stored.id).await.unwrap().unwrap();
        assert_eq!(loaded.target, ReportTarget::Message(12));
        assert_eq!(loaded.status(), "Pending");
    }

    #[tokio::test]
    async fn first_resolution_wins() {
        let db = db::test_pool().await;
        let stored = insert(&db, &report(ReportTarget::Person(1)), Utc::now())
            .await
            .unwrap();
        let first = Utc::now();

        assert!(resolve_if_pending(&db, stored.id, first).await.unwrap());
        assert!(
            !resolve_if_pending(&db, stored.id, first + Duration::hours(1))
                .await
                .unwrap()
        );

        let loaded = find(&db, stored.id).await.unwrap().unwrap();
        assert_eq!(loaded.resolved_at, Some(first));
    }

    #[tokio::test]
    async fn resolving_an_unknown_report_is_a_no_op() {
        let db = db::test_pool().await;
        assert!(!resolve_if_pending(&db, Uuid::new_v4(), Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn reports_are_filtered_by_target() {
        let db = db::test_pool().await;
        _ = insert(&db, &report(ReportTarget::Person(1)), Utc::now()).await.unwrap();
        _ = insert(&db, &report(ReportTarget::Message(1)), Utc::now()).await.unwrap();
        _ = insert(&db, &report(ReportTarget::Person(2)), Utc::now()).await.unwrap();

        let for_person = for_target(&db, ReportTarget::Person(1)).await.unwrap();
        assert_eq!(for_person.len(), 1);
        assert_eq!(for_person[0].target, ReportTarget::Person(1));
        assert_eq!(count(&db).await.unwrap(), 3);
    }
}
