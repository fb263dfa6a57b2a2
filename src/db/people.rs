//! `farewell_people` queries.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor};

use super::pagination::PageRequest;
use crate::models::{Person, PersonFields};

const COLUMNS: &str = "id, name, slug, description, portrait_url, background_url, email, \
                       is_public, created_at, updated_at";

/// A person as submitted by a visitor, before it has an id.
#[derive(Debug, Clone)]
pub struct NewPerson {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub portrait_url: Option<String>,
    pub background_url: Option<String>,
    pub email: Option<String>,
}

pub async fn insert(
    db: impl SqliteExecutor<'_>,
    person: &NewPerson,
    now: DateTime<Utc>,
) -> sqlx::Result<Person> {
    let sql = format!(
        r#"
        INSERT INTO farewell_people
            (name, slug, description, portrait_url, background_url, email, is_public, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
        RETURNING {COLUMNS}
        "#
    );
    sqlx::query_as(&sql)
        .bind(&person.name)
        .bind(&person.slug)
        .bind(&person.description)
        .bind(&person.portrait_url)
        .bind(&person.background_url)
        .bind(&person.email)
        .bind(now)
        .bind(now)
        .fetch_one(db)
        .await
}

pub async fn slug_exists(db: impl SqliteExecutor<'_>, slug: &str) -> sqlx::Result<bool> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM farewell_people WHERE slug = ?)")
        .bind(slug)
        .fetch_one(db)
        .await
}

pub async fn find(db: impl SqliteExecutor<'_>, id: i64) -> sqlx::Result<Option<Person>> {
    let sql = format!("SELECT {COLUMNS} FROM farewell_people WHERE id = ?");
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn find_public_by_slug(
    db: impl SqliteExecutor<'_>,
    slug: &str,
) -> sqlx::Result<Option<Person>> {
    let sql = format!("SELECT {COLUMNS} FROM farewell_people WHERE slug = ? AND is_public = 1");
    sqlx::query_as(&sql)
        .bind(slug)
        .fetch_optional(db)
        .await
}

pub async fn find_many(db: impl SqliteExecutor<'_>, ids: &[i64]) -> sqlx::Result<Vec<Person>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut query: QueryBuilder<'_, Sqlite> =
        QueryBuilder::new(format!("SELECT {COLUMNS} FROM farewell_people WHERE id IN ("));
    let mut separated = query.separated(", ");
    for id in ids {
        _ = separated.push_bind(*id);
    }
    _ = separated.push_unseparated(")");

    query.build_query_as().fetch_all(db).await
}

pub async fn update(
    db: impl SqliteExecutor<'_>,
    id: i64,
    fields: &PersonFields,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE farewell_people
        SET name = ?, slug = ?, description = ?, portrait_url = ?, background_url = ?,
            email = ?, is_public = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&fields.name)
    .bind(&fields.slug)
    .bind(&fields.description)
    .bind(&fields.portrait_url)
    .bind(&fields.background_url)
    .bind(&fields.email)
    .bind(fields.is_public)
    .bind(now)
    .bind(id)
    .execute(db)
    .await?;

    Ok(result.rows_affected())
}

/// Deletes the person; its messages go with it through the foreign key cascade.
pub async fn delete(db: impl SqliteExecutor<'_>, id: i64) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM farewell_people WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

pub async fn count(db: impl SqliteExecutor<'_>) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM farewell_people")
        .fetch_one(db)
        .await
}

pub async fn page(db: impl SqliteExecutor<'_>, request: PageRequest) -> sqlx::Result<Vec<Person>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM farewell_people ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    );
    sqlx::query_as(&sql)
        .bind(request.limit())
        .bind(request.offset())
        .fetch_all(db)
        .await
}

pub async fn created_since(
    db: impl SqliteExecutor<'_>,
    since: DateTime<Utc>,
) -> sqlx::Result<Vec<DateTime<Utc>>> {
    sqlx::query_scalar("SELECT created_at FROM farewell_people WHERE created_at >= ?")
        .bind(since)
        .fetch_all(db)
        .await
}
