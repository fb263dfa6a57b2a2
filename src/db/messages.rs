//! `farewell_messages` queries.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use super::pagination::PageRequest;
use crate::models::{Message, MessageFields, MessageWithPerson};

const COLUMNS: &str = "id, person_id, body, author_name, author_email, is_public, created_at";

const JOINED: &str = "SELECT m.id, m.person_id, m.body, m.author_name, m.author_email, \
                      m.is_public, m.created_at, p.name AS person_name, p.slug AS person_slug \
                      FROM farewell_messages m JOIN farewell_people p ON p.id = m.person_id";

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub person_id: i64,
    pub body: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

pub async fn insert(
    db: impl SqliteExecutor<'_>,
    message: &NewMessage,
    now: DateTime<Utc>,
) -> sqlx::Result<Message> {
    let sql = format!(
        r#"
        INSERT INTO farewell_messages (person_id, body, author_name, author_email, is_public, created_at)
        VALUES (?, ?, ?, ?, 1, ?)
        RETURNING {COLUMNS}
        "#
    );
    sqlx::query_as(&sql)
        .bind(message.person_id)
        .bind(&message.body)
        .bind(&message.author_name)
        .bind(&message.author_email)
        .bind(now)
        .fetch_one(db)
        .await
}

pub async fn find(db: impl SqliteExecutor<'_>, id: i64) -> sqlx::Result<Option<Message>> {
    let sql = format!("SELECT {COLUMNS} FROM farewell_messages WHERE id = ?");
    sqlx::query_as(&sql).bind(id).fetch_optional(db).await
}

pub async fn find_with_person(
    db: impl SqliteExecutor<'_>,
    id: i64,
) -> sqlx::Result<Option<MessageWithPerson>> {
    let sql = format!("{JOINED} WHERE m.id = ?");
    sqlx::query_as(&sql).bind(id).fetch_optional(db).await
}

pub async fn find_many_with_person(
    db: impl SqliteExecutor<'_>,
    ids: &[i64],
) -> sqlx::Result<Vec<MessageWithPerson>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    // ids are integers, so inlining them cannot inject anything.
    let list = ids
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("{JOINED} WHERE m.id IN ({list})");
    sqlx::query_as(&sql).fetch_all(db).await
}

/// Every message on a person's page, newest first.
pub async fn for_person(db: impl SqliteExecutor<'_>, person_id: i64) -> sqlx::Result<Vec<Message>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM farewell_messages WHERE person_id = ? ORDER BY created_at DESC, id DESC"
    );
    sqlx::query_as(&sql).bind(person_id).fetch_all(db).await
}

pub async fn public_for_person(
    db: impl SqliteExecutor<'_>,
    person_id: i64,
) -> sqlx::Result<Vec<Message>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM farewell_messages WHERE person_id = ? AND is_public = 1 \
         ORDER BY created_at DESC, id DESC"
    );
    sqlx::query_as(&sql).bind(person_id).fetch_all(db).await
}

/// Public messages on public pages, newest first.
pub async fn public(db: impl SqliteExecutor<'_>) -> sqlx::Result<Vec<MessageWithPerson>> {
    let sql = format!(
        "{JOINED} WHERE m.is_public = 1 AND p.is_public = 1 ORDER BY m.created_at DESC, m.id DESC"
    );
    sqlx::query_as(&sql).fetch_all(db).await
}

pub async fn update(
    db: impl SqliteExecutor<'_>,
    id: i64,
    fields: &MessageFields,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE farewell_messages
        SET body = ?, author_name = ?, author_email = ?, is_public = ?
        WHERE id = ?
        "#,
    )
    .bind(&fields.body)
    .bind(&fields.author_name)
    .bind(&fields.author_email)
    .bind(fields.is_public)
    .bind(id)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete(db: impl SqliteExecutor<'_>, id: i64) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM farewell_messages WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

pub async fn count(db: impl SqliteExecutor<'_>) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM farewell_messages")
        .fetch_one(db)
        .await
}

pub async fn page(
    db: impl SqliteExecutor<'_>,
    request: PageRequest,
) -> sqlx::Result<Vec<MessageWithPerson>> {
    let sql = format!("{JOINED} ORDER BY m.created_at DESC, m.id DESC LIMIT ? OFFSET ?");
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
    sqlx::query_scalar("SELECT created_at FROM farewell_messages WHERE created_at >= ?")
        .bind(since)
        .fetch_all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, people};

    async fn seed_person(db: &db::Db, slug: &str) -> i64 {
        people::insert(
            db,
            &people::NewPerson {
                name: slug.to_owned(),
                slug: slug.to_owned(),
                description: "d".to_owned(),
                portrait_url: None,
                background_url: None,
                email: None,
            },
            Utc::now(),
        )
        .await
        .unwrap()
        .id
    }

    fn note(person_id: i64, body: &str) -> NewMessage {
        NewMessage {
            person_id,
            body: body.to_owned(),
            author_name: Some("Friend".to_owned()),
            author_email: None,
        }
    }

    #[tokio::test]
    async fn message_requires_an_existing_person() {
        let db = db::test_pool().await;
        assert!(insert(&db, &note(42, "orphan"), Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn joined_rows_carry_the_person_name() {
        let db = db::test_pool().await;
        let person_id = seed_person(&db, "grace").await;
        let message = insert(&db, &note(person_id, "Rest well"), Utc::now())
            .await
            .unwrap();

        let joined = find_with_person(&db, message.id).await.unwrap().unwrap();
        assert_eq!(joined.person_name, "grace");
        assert_eq!(joined.message, message);

        let many = find_many_with_person(&db, &[message.id]).await.unwrap();
        assert_eq!(many.len(), 1);
    }

    #[tokio::test]
    async fn hidden_messages_are_not_public() {
        let db = db::test_pool().await;
        let person_id = seed_person(&db, "grace").await;
        let shown = insert(&db, &note(person_id, "shown"), Utc::now()).await.unwrap();
        let hidden = insert(&db, &note(person_id, "hidden"), Utc::now()).await.unwrap();
        let mut fields = hidden.fields();
        fields.is_public = false;
        _ = update(&db, hidden.id, &fields).await.unwrap();

        let public: Vec<i64> = public_for_person(&db, person_id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(public, vec![shown.id]);
        assert_eq!(for_person(&db, person_id).await.unwrap().len(), 2);
    }
}
