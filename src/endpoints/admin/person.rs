use axum::{
    Form, Json, Router,
    extract::{Path, State},
    response::{IntoResponse as _, Redirect, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use super::{NoteInput, ReportSummary, Rejection, ensure_same_id, redisplay, reject, summaries};
use crate::{
    AppState, Db, Error, Result,
    auth::{self, Moderator},
    db::{logs, messages, people, reports},
    models::{Message, ModeratorLog, Person, PersonFields, ReportTarget, TargetKind},
    moderation::{self, EditOutcome},
    storage::ImageStorage,
    validation::ValidationErrors,
};

const LISTING: &str = "/Admin/FarewellPeople";

#[derive(Debug, Deserialize)]
struct EditPersonForm {
    form_token: Option<String>,
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    description: String,
    #[serde(default, deserialize_with = "crate::endpoints::empty_as_none")]
    portrait_url: Option<String>,
    #[serde(default, deserialize_with = "crate::endpoints::empty_as_none")]
    background_url: Option<String>,
    #[serde(default, deserialize_with = "crate::endpoints::empty_as_none")]
    email: Option<String>,
    #[serde(default, deserialize_with = "crate::endpoints::checkbox")]
    is_public: bool,
    #[serde(default)]
    action_reason: String,
    #[serde(default)]
    action_details: String,
    #[serde(default, deserialize_with = "crate::endpoints::empty_as_none")]
    report_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeletePersonForm {
    form_token: Option<String>,
    id: i64,
    #[serde(default)]
    action_reason: String,
    #[serde(default)]
    action_details: String,
    #[serde(default, deserialize_with = "crate::endpoints::empty_as_none")]
    report_id: Option<String>,
}

/// Everything the edit and delete pages show about one person.
#[derive(Serialize)]
struct PersonContext {
    person: Person,
    portrait_preview: String,
    background_preview: String,
    related_reports: Vec<ReportSummary>,
    related_messages: Vec<Message>,
    history: Vec<ModeratorLog>,
}

#[derive(Serialize)]
struct EditPersonView {
    form_token: String,
    #[serde(flatten)]
    context: PersonContext,
    values: PersonFields,
    note: NoteInput,
    errors: ValidationErrors,
}

#[derive(Serialize)]
struct DeletePersonView {
    form_token: String,
    #[serde(flatten)]
    context: PersonContext,
    note: NoteInput,
    errors: ValidationErrors,
}

async fn context(db: &Db, images: &ImageStorage, id: i64) -> Result<PersonContext> {
    let person = people::find(db, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("person {id}")))?;

    Ok(PersonContext {
        portrait_preview: images.resolve(person.portrait_url.as_deref()).await,
        background_preview: images.resolve(person.background_url.as_deref()).await,
        related_reports: summaries(reports::for_target(db, ReportTarget::Person(id)).await?),
        related_messages: messages::for_person(db, id).await?,
        history: logs::for_target(db, TargetKind::Person, id).await?,
        person,
    })
}

/// - GET `/Admin/FarewellPeople/Edit/{id}`
async fn edit_form(
    _moderator: Moderator,
    State(db): State<Db>,
    State(images): State<ImageStorage>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<EditPersonView>> {
    let context = context(&db, &images, id).await?;

    Ok(Json(EditPersonView {
        form_token: auth::form_token(&session).await?,
        values: context.person.fields(),
        context,
        note: NoteInput::default(),
        errors: ValidationErrors::new(),
    }))
}

/// Apply a moderator's edit, logging it and optionally resolving a report.
/// - POST `/Admin/FarewellPeople/Edit/{id}`
#[tracing::instrument(skip_all)]
async fn edit(
    moderator: Moderator,
    State(db): State<Db>,
    State(images): State<ImageStorage>,
    session: Session,
    Path(id): Path<i64>,
    Form(form): Form<EditPersonForm>,
) -> Result<Response> {
    auth::verify_form_token(&session, form.form_token.as_deref()).await?;
    ensure_same_id(id, form.id)?;

    let values = PersonFields {
        name: form.name,
        slug: form.slug,
        description: form.description,
        portrait_url: form.portrait_url,
        background_url: form.background_url,
        email: form.email,
        is_public: form.is_public,
    };
    let note = NoteInput::new(form.action_reason, form.action_details, form.report_id);

    let result = moderation::edit_person(
        &db,
        &images,
        &moderator.login,
        id,
        values.clone(),
        &note.to_note()?,
    )
    .await;

    let (status, errors) = match result {
        Ok(EditOutcome::Unchanged | EditOutcome::Updated(_)) => {
            return Ok(Redirect::to(LISTING).into_response());
        }
        Err(err) => match reject(
            err,
            "An error occurred while updating the farewell person. Please try again.",
        ) {
            Rejection::Fail(err) => return Err(err),
            Rejection::Redisplay(status, errors) => (status, errors),
        },
    };

    let view = EditPersonView {
        form_token: auth::form_token(&session).await?,
        context: context(&db, &images, id).await?,
        values,
        note,
        errors,
    };
    Ok(redisplay(status, view))
}

/// - GET `/Admin/FarewellPeople/Delete/{id}`
async fn delete_form(
    _moderator: Moderator,
    State(db): State<Db>,
    State(images): State<ImageStorage>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<DeletePersonView>> {
    Ok(Json(DeletePersonView {
        form_token: auth::form_token(&session).await?,
        context: context(&db, &images, id).await?,
        note: NoteInput::default(),
        errors: ValidationErrors::new(),
    }))
}

/// Delete a person with their messages and stored pictures.
/// - POST `/Admin/FarewellPeople/Delete/{id}`
#[tracing::instrument(skip_all)]
async fn delete(
    moderator: Moderator,
    State(db): State<Db>,
    State(images): State<ImageStorage>,
    session: Session,
    Path(id): Path<i64>,
    Form(form): Form<DeletePersonForm>,
) -> Result<Response> {
    auth::verify_form_token(&session, form.form_token.as_deref()).await?;
    ensure_same_id(id, form.id)?;

    let note = NoteInput::new(form.action_reason, form.action_details, form.report_id);
    let result =
        moderation::delete_person(&db, &images, &moderator.login, id, &note.to_note()?).await;

    let (status, errors) = match result {
        Ok(_) => return Ok(Redirect::to(LISTING).into_response()),
        Err(err) => match reject(
            err,
            "An error occurred while deleting the farewell person. Please try again.",
        ) {
            Rejection::Fail(err) => return Err(err),
            Rejection::Redisplay(status, errors) => (status, errors),
        },
    };

    let view = DeletePersonView {
        form_token: auth::form_token(&session).await?,
        context: context(&db, &images, id).await?,
        note,
        errors,
    };
    Ok(redisplay(status, view))
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/Admin/FarewellPeople/Edit/{id}", get(edit_form).post(edit))
        .route("/Admin/FarewellPeople/Delete/{id}", get(delete_form).post(delete))
}
