//! Moderator edits and deletions.
//!
//! Each mutation commits the entity change, its audit row and the optional
//! report resolution in a single transaction. Stored images that the change
//! orphaned are removed after the commit, best effort.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    db::{
        self, Db,
        logs::{self, NewLog},
        messages, people, reports,
    },
    metrics::{MODERATION_DELETE, MODERATION_EDIT},
    models::{
        AUTHOR_NAME_MAX, EMAIL_MAX, IMAGE_URL_MAX, LOG_REASON_MAX, MESSAGE_BODY_MAX, Message,
        MessageFields, ModerationAction, PERSON_DESCRIPTION_MAX, PERSON_NAME_MAX, PERSON_SLUG_MAX,
        Person, PersonFields, TargetKind,
    },
    slug,
    storage::ImageStorage,
    validation::ValidationErrors,
};

/// Why a moderator acted, and which report (if any) the action closes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModerationNote {
    pub reason: String,
    pub details: String,
    pub report_id: Option<Uuid>,
}

impl ModerationNote {
    fn validate(&self, errors: &mut ValidationErrors) {
        errors.required("action_reason", Some(self.reason.as_str()), "Action reason is required");
        errors.max_len(
            "action_reason",
            Some(self.reason.as_str()),
            LOG_REASON_MAX,
            "Action reason cannot exceed 200 characters",
        );
        errors.required(
            "action_details",
            Some(self.details.as_str()),
            "Action details are required",
        );
    }
}

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("{kind} {1} not found", kind = .0.label())]
    NotFound(TargetKind, i64),
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome<T> {
    /// The submitted values matched the stored row; nothing was written.
    Unchanged,
    Updated(T),
}

/// Field rules shared by the moderator edit form.
pub fn validate_person_fields(fields: &PersonFields) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    errors.required("name", Some(fields.name.as_str()), "Name is required");
    errors.max_len(
        "name",
        Some(fields.name.as_str()),
        PERSON_NAME_MAX,
        "Name cannot exceed 200 characters",
    );

    errors.required("slug", Some(fields.slug.as_str()), "Slug is required");
    errors.max_len(
        "slug",
        Some(fields.slug.as_str()),
        PERSON_SLUG_MAX,
        "Slug cannot exceed 200 characters",
    );
    if !fields.slug.is_empty() && !slug::is_valid_slug(&fields.slug) {
        errors.add("slug", "Slug may only contain lowercase letters, digits and hyphens");
    }
    if slug::is_reserved(&fields.slug) {
        errors.add("slug", "This slug is reserved");
    }

    errors.required("description", Some(fields.description.as_str()), "Description is required");
    errors.max_len(
        "description",
        Some(fields.description.as_str()),
        PERSON_DESCRIPTION_MAX,
        "Description cannot exceed 5000 characters",
    );

    errors.max_len(
        "portrait_url",
        fields.portrait_url.as_deref(),
        IMAGE_URL_MAX,
        "Portrait URL cannot exceed 500 characters",
    );
    errors.max_len(
        "background_url",
        fields.background_url.as_deref(),
        IMAGE_URL_MAX,
        "Background URL cannot exceed 500 characters",
    );

    errors.email("email", fields.email.as_deref(), "Invalid email address");
    errors.max_len(
        "email",
        fields.email.as_deref(),
        EMAIL_MAX,
        "Email cannot exceed 255 characters",
    );

    errors
}

pub fn validate_message_fields(fields: &MessageFields) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    errors.required("body", Some(fields.body.as_str()), "Message is required");
    errors.max_len(
        "body",
        Some(fields.body.as_str()),
        MESSAGE_BODY_MAX,
        "Message cannot exceed 2000 characters",
    );
    errors.max_len(
        "author_name",
        fields.author_name.as_deref(),
        AUTHOR_NAME_MAX,
        "Name cannot exceed 100 characters",
    );
    errors.email("author_email", fields.author_email.as_deref(), "Invalid email address");
    errors.max_len(
        "author_email",
        fields.author_email.as_deref(),
        EMAIL_MAX,
        "Email cannot exceed 255 characters",
    );

    errors
}

/// Resolve the selected report if it exists and is still pending.
///
/// Returns the id to link from the audit row; unknown ids are dropped.
async fn link_report(
    conn: &mut SqliteConnection,
    report_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> sqlx::Result<Option<Uuid>> {
    let Some(id) = report_id else {
        return Ok(None);
    };

    if reports::find(&mut *conn, id).await?.is_none() {
        warn!(report_id = %id, "selected content report does not exist, not linking it");
        return Ok(None);
    }

    if !reports::resolve_if_pending(&mut *conn, id, now).await? {
        info!(report_id = %id, "content report already resolved, leaving it untouched");
    }
    Ok(Some(id))
}

pub async fn edit_person(
    db: &Db,
    images: &ImageStorage,
    moderator: &str,
    id: i64,
    fields: PersonFields,
    note: &ModerationNote,
) -> Result<EditOutcome<Person>, ModerationError> {
    let mut tx = db.begin().await?;
    let current = people::find(&mut *tx, id)
        .await?
        .ok_or(ModerationError::NotFound(TargetKind::Person, id))?;

    let mut errors = validate_person_fields(&fields);
    note.validate(&mut errors);
    errors.into_result()?;

    if current.fields() == fields {
        return Ok(EditOutcome::Unchanged);
    }

    let now = Utc::now();
    if let Err(err) = people::update(&mut *tx, id, &fields, now).await {
        return Err(if db::is_unique_violation(&err) {
            ValidationErrors::single("slug", "A person with this slug already exists").into()
        } else {
            err.into()
        });
    }

    let report_id = link_report(&mut tx, note.report_id, now).await?;
    _ = logs::append(
        &mut *tx,
        &NewLog {
            moderator_name: moderator,
            target_type: TargetKind::Person,
            target_id: id,
            action: ModerationAction::Edit,
            reason: note.reason.trim(),
            details: note.details.trim(),
            content_report_id: report_id,
        },
        now,
    )
    .await?;
    tx.commit().await?;

    if current.portrait_url != fields.portrait_url {
        images.delete_if_managed(current.portrait_url.as_deref()).await;
    }
    if current.background_url != fields.background_url {
        images.delete_if_managed(current.background_url.as_deref()).await;
    }

    counter!(MODERATION_EDIT).increment(1);
    info!(person_id = id, moderator, "person edited");

    Ok(EditOutcome::Updated(Person {
        id,
        name: fields.name,
        slug: fields.slug,
        description: fields.description,
        portrait_url: fields.portrait_url,
        background_url: fields.background_url,
        email: fields.email,
        is_public: fields.is_public,
        created_at: current.created_at,
        updated_at: now,
    }))
}

/// Delete a person, their messages, and then their stored images.
pub async fn delete_person(
    db: &Db,
    images: &ImageStorage,
    moderator: &str,
    id: i64,
    note: &ModerationNote,
) -> Result<Person, ModerationError> {
    let mut tx = db.begin().await?;
    let person = people::find(&mut *tx, id)
        .await?
        .ok_or(ModerationError::NotFound(TargetKind::Person, id))?;

    let mut errors = ValidationErrors::new();
    note.validate(&mut errors);
    errors.into_result()?;

    let now = Utc::now();
    _ = people::delete(&mut *tx, id).await?;
    let report_id = link_report(&mut tx, note.report_id, now).await?;
    _ = logs::append(
        &mut *tx,
        &NewLog {
            moderator_name: moderator,
            target_type: TargetKind::Person,
            target_id: id,
            action: ModerationAction::Delete,
            reason: note.reason.trim(),
            details: note.details.trim(),
            content_report_id: report_id,
        },
        now,
    )
    .await?;
    tx.commit().await?;

    images.delete_if_managed(person.portrait_url.as_deref()).await;
    images.delete_if_managed(person.background_url.as_deref()).await;

    counter!(MODERATION_DELETE).increment(1);
    info!(person_id = id, moderator, "person deleted");

    Ok(person)
}

pub async fn edit_message(
    db: &Db,
    moderator: &str,
    id: i64,
    fields: MessageFields,
    note: &ModerationNote,
) -> Result<EditOutcome<Message>, ModerationError> {
    let mut tx = db.begin().await?;
    let current = messages::find(&mut *tx, id)
        .await?
        .ok_or(ModerationError::NotFound(TargetKind::Message, id))?;

    let mut errors = validate_message_fields(&fields);
    note.validate(&mut errors);
    errors.into_result()?;

    if current.fields() == fields {
        return Ok(EditOutcome::Unchanged);
    }

    let now = Utc::now();
    _ = messages::update(&mut *tx, id, &fields).await?;
    let report_id = link_report(&mut tx, note.report_id, now).await?;
    _ = logs::append(
        &mut *tx,
        &NewLog {
            moderator_name: moderator,
            target_type: TargetKind::Message,
            target_id: id,
            action: ModerationAction::Edit,
            reason: note.reason.trim(),
            details: note.details.trim(),
            content_report_id: report_id,
        },
        now,
    )
    .await?;
    tx.commit().await?;

    counter!(MODERATION_EDIT).increment(1);
    info!(message_id = id, moderator, "message edited");

    Ok(EditOutcome::Updated(Message {
        id,
        person_id: current.person_id,
        body: fields.body,
        author_name: fields.author_name,
        author_email: fields.author_email,
        is_public: fields.is_public,
        created_at: current.created_at,
    }))
}

pub async fn delete_message(
    db: &Db,
    moderator: &str,
    id: i64,
    note: &ModerationNote,
) -> Result<Message, ModerationError> {
    let mut tx = db.begin().await?;
    let message = messages::find(&mut *tx, id)
        .await?
        .ok_or(ModerationError::NotFound(TargetKind::Message, id))?;

    let mut errors = ValidationErrors::new();
    note.validate(&mut errors);
    errors.into_result()?;

    let now = Utc::now();
    _ = messages::delete(&mut *tx, id).await?;
    let report_id = link_report(&mut tx, note.report_id, now).await?;
    _ = logs::append(
        &mut *tx,
        &NewLog {
            moderator_name: moderator,
            target_type: TargetKind::Message,
            target_id: id,
            action: ModerationAction::Delete,
            reason: note.reason.trim(),
            details: note.details.trim(),
            content_report_id: report_id,
        },
        now,
    )
    .await?;
    tx.commit().await?;

    counter!(MODERATION_DELETE).increment(1);
    info!(message_id = id, moderator, "message deleted");

    Ok(message)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::{ImageConfig, StorageConfig},
        db::reports::NewReport,
        models::ReportTarget,
        storage::{ImageKind, memory::MemoryStore},
    };

    struct Fixture {
        db: Db,
        store: Arc<MemoryStore>,
        images: ImageStorage,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::default());
        let config = StorageConfig {
            endpoint: "https://s3.example.com".to_owned(),
            bucket: "farewell".to_owned(),
            region: "us-east-1".to_owned(),
            access_key: "k".to_owned(),
            secret_key: "s".to_owned(),
            signed_url_ttl_secs: 3600,
            max_upload_bytes: 5 * 1024 * 1024,
        };
        Fixture {
            db: db::test_pool().await,
            images: ImageStorage::new(store.clone(), &config, ImageConfig::default()),
            store,
        }
    }

    fn note() -> ModerationNote {
        ModerationNote {
            reason: "abuse".to_owned(),
            details: "Removed offensive wording".to_owned(),
            report_id: None,
        }
    }

    async fn seed_person(db: &Db, portrait_url: Option<String>) -> Person {
        people::insert(
            db,
            &people::NewPerson {
                name: "Ada Lovelace".to_owned(),
                slug: "ada-lovelace".to_owned(),
                description: "Mathematician.".to_owned(),
                portrait_url,
                background_url: None,
                email: None,
            },
            Utc::now() - chrono::Duration::days(1),
        )
        .await
        .unwrap()
    }

    async fn seed_message(db: &Db, person_id: i64) -> Message {
        messages::insert(
            db,
            &messages::NewMessage {
                person_id,
                body: "We miss you".to_owned(),
                author_name: None,
                author_email: None,
            },
            Utc::now(),
        )
        .await
        .unwrap()
    }

    async fn seed_report(db: &Db, target: ReportTarget) -> Uuid {
        reports::insert(
            db,
            &NewReport {
                email: "visitor@example.com".to_owned(),
                reason: "abuse".to_owned(),
                explanation: None,
                target,
            },
            Utc::now(),
        )
        .await
        .unwrap()
        .id
    }

    fn png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([0, 0, 0]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn identical_edit_writes_nothing() {
        let f = fixture().await;
        let person = seed_person(&f.db, None).await;

        let outcome = edit_person(&f.db, &f.images, "mod", person.id, person.fields(), &note())
            .await
            .unwrap();

        assert_eq!(outcome, EditOutcome::Unchanged);
        assert_eq!(logs::count(&f.db).await.unwrap(), 0);
        let stored = people::find(&f.db, person.id).await.unwrap().unwrap();
        assert_eq!(stored.updated_at, person.updated_at);
    }

    #[tokio::test]
    async fn edit_stamps_logs_and_resolves_in_one_go() {
        let f = fixture().await;
        let person = seed_person(&f.db, None).await;
        let report_id = seed_report(&f.db, ReportTarget::Person(person.id)).await;

        let mut fields = person.fields();
        fields.description = "Mathematician and writer.".to_owned();
        let note = ModerationNote {
            report_id: Some(report_id),
            ..note()
        };

        let outcome = edit_person(&f.db, &f.images, "octocat", person.id, fields, &note)
            .await
            .unwrap();
        let EditOutcome::Updated(updated) = outcome else {
            panic!("expected an update");
        };
        assert!(updated.updated_at > person.updated_at);

        let logs = logs::for_target(&f.db, TargetKind::Person, person.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "edit");
        assert_eq!(logs[0].moderator_name, "octocat");
        assert_eq!(logs[0].content_report_id, Some(report_id));

        let report = reports::find(&f.db, report_id).await.unwrap().unwrap();
        assert!(report.is_resolved());
    }

    #[tokio::test]
    async fn second_resolution_keeps_the_first_timestamp() {
        let f = fixture().await;
        let person = seed_person(&f.db, None).await;
        let message = seed_message(&f.db, person.id).await;
        let report_id = seed_report(&f.db, ReportTarget::Message(message.id)).await;
        let note = ModerationNote {
            report_id: Some(report_id),
            ..note()
        };

        let mut fields = message.fields();
        fields.is_public = false;
        _ = edit_message(&f.db, "mod", message.id, fields, &note).await.unwrap();
        let first = reports::find(&f.db, report_id).await.unwrap().unwrap().resolved_at;
        assert!(first.is_some());

        _ = delete_message(&f.db, "mod", message.id, &note).await.unwrap();
        let second = reports::find(&f.db, report_id).await.unwrap().unwrap().resolved_at;
        assert_eq!(first, second);
        assert_eq!(logs::count(&f.db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reason_and_details_are_required_everywhere() {
        let f = fixture().await;
        let person = seed_person(&f.db, None).await;
        let message = seed_message(&f.db, person.id).await;
        let blank = ModerationNote::default();

        let err = delete_message(&f.db, "mod", message.id, &blank).await.unwrap_err();
        let ModerationError::Invalid(errors) = err else {
            panic!("expected validation failure");
        };
        assert!(errors.has("action_reason"));
        assert!(errors.has("action_details"));

        let err = delete_person(&f.db, &f.images, "mod", person.id, &blank)
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::Invalid(_)));
        assert!(people::find(&f.db, person.id).await.unwrap().is_some());
        assert!(messages::find(&f.db, message.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_targets_are_not_found() {
        let f = fixture().await;
        let err = delete_person(&f.db, &f.images, "mod", 404, &note()).await.unwrap_err();
        assert!(matches!(err, ModerationError::NotFound(TargetKind::Person, 404)));

        let err = delete_message(&f.db, "mod", 404, &note()).await.unwrap_err();
        assert!(matches!(err, ModerationError::NotFound(TargetKind::Message, 404)));
    }

    #[tokio::test]
    async fn delete_cascades_and_removes_managed_images() {
        let f = fixture().await;
        let portrait = f.images.upload(ImageKind::Portrait, "p.png", png()).await.unwrap();
        let person = seed_person(&f.db, Some(portrait)).await;
        let message = seed_message(&f.db, person.id).await;

        _ = delete_person(&f.db, &f.images, "mod", person.id, &note()).await.unwrap();

        assert!(people::find(&f.db, person.id).await.unwrap().is_none());
        assert!(messages::find(&f.db, message.id).await.unwrap().is_none());
        assert!(f.store.is_empty());

        let logs = logs::for_target(&f.db, TargetKind::Person, person.id).await.unwrap();
        assert_eq!(logs[0].action, "delete");
    }

    #[tokio::test]
    async fn storage_failures_do_not_undo_the_delete() {
        let f = fixture().await;
        let portrait = f.images.upload(ImageKind::Portrait, "p.png", png()).await.unwrap();
        let person = seed_person(&f.db, Some(portrait)).await;
        f.store.fail_deletes(true);

        _ = delete_person(&f.db, &f.images, "mod", person.id, &note()).await.unwrap();

        assert!(people::find(&f.db, person.id).await.unwrap().is_none());
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn replacing_an_image_deletes_the_old_object() {
        let f = fixture().await;
        let portrait = f.images.upload(ImageKind::Portrait, "p.png", png()).await.unwrap();
        let person = seed_person(&f.db, Some(portrait)).await;

        let mut fields = person.fields();
        fields.portrait_url = Some("DELETED BY ADMIN".to_owned());
        _ = edit_person(&f.db, &f.images, "mod", person.id, fields, &note())
            .await
            .unwrap();

        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn slug_collisions_on_edit_are_validation_errors() {
        let f = fixture().await;
        let ada = seed_person(&f.db, None).await;
        let grace = people::insert(
            &f.db,
            &people::NewPerson {
                name: "Grace Hopper".to_owned(),
                slug: "grace-hopper".to_owned(),
                description: "Admiral.".to_owned(),
                portrait_url: None,
                background_url: None,
                email: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();

        let mut fields = grace.fields();
        fields.slug = ada.slug.clone();
        let err = edit_person(&f.db, &f.images, "mod", grace.id, fields, &note())
            .await
            .unwrap_err();

        let ModerationError::Invalid(errors) = err else {
            panic!("expected validation failure");
        };
        assert!(errors.has("slug"));
        assert_eq!(logs::count(&f.db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_report_ids_are_not_linked() {
        let f = fixture().await;
        let person = seed_person(&f.db, None).await;
        let note = ModerationNote {
            report_id: Some(Uuid::new_v4()),
            ..note()
        };

        _ = delete_person(&f.db, &f.images, "mod", person.id, &note).await.unwrap();

        let logs = logs::for_target(&f.db, TargetKind::Person, person.id).await.unwrap();
        assert_eq!(logs[0].content_report_id, None);
    }
}
