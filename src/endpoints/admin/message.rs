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
    db::{logs, messages, reports},
    models::{MessageFields, MessageWithPerson, ModeratorLog, ReportTarget, TargetKind},
    moderation::{self, EditOutcome},
    validation::ValidationErrors,
};

const LISTING: &str = "/Admin/FarewellMessages";

#[derive(Debug, Deserialize)]
struct EditMessageForm {
    form_token: Option<String>,
    id: i64,
    #[serde(default)]
    body: String,
    #[serde(default, deserialize_with = "crate::endpoints::empty_as_none")]
    author_name: Option<String>,
    #[serde(default, deserialize_with = "crate::endpoints::empty_as_none")]
    author_email: Option<String>,
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
struct DeleteMessageForm {
    form_token: Option<String>,
    id: i64,
    #[serde(default)]
    action_reason: String,
    #[serde(default)]
    action_details: String,
    #[serde(default, deserialize_with = "crate::endpoints::empty_as_none")]
    report_id: Option<String>,
}

#[derive(Serialize)]
struct MessageContext {
    message: MessageWithPerson,
    related_reports: Vec<ReportSummary>,
    history: Vec<ModeratorLog>,
}

#[derive(Serialize)]
struct EditMessageView {
    form_token: String,
    #[serde(flatten)]
    context: MessageContext,
    values: MessageFields,
    note: NoteInput,
    errors: ValidationErrors,
}

#[derive(Serialize)]
struct DeleteMessageView {
    form_token: String,
    #[serde(flatten)]
    context: MessageContext,
    note: NoteInput,
    errors: ValidationErrors,
}

async fn context(db: &Db, id: i64) -> Result<MessageContext> {
    let message = messages::find_with_person(db, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("message {id}")))?;

    Ok(MessageContext {
        message,
        related_reports: summaries(reports::for_target(db, ReportTarget::Message(id)).await?),
        history: logs::for_target(db, TargetKind::Message, id).await?,
    })
}

/// - GET `/Admin/FarewellMessages/Edit/{id}`
async fn edit_form(
    _moderator: Moderator,
    State(db): State<Db>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<EditMessageView>> {
    let context = context(&db, id).await?;

    Ok(Json(EditMessageView {
        form_token: auth::form_token(&session).await?,
        values: context.message.message.fields(),
        context,
        note: NoteInput::default(),
        errors: ValidationErrors::new(),
    }))
}

/// - POST `/Admin/FarewellMessages/Edit/{id}`
async fn edit(
    moderator: Moderator,
    State(db): State<Db>,
    session: Session,
    Path(id): Path<i64>,
    Form(form): Form<EditMessageForm>,
) -> Result<Response> {
    auth::verify_form_token(&session, form.form_token.as_deref()).await?;
    ensure_same_id(id, form.id)?;

    let values = MessageFields {
        body: form.body,
        author_name: form.author_name,
        author_email: form.author_email,
        is_public: form.is_public,
    };
    let note = NoteInput::new(form.action_reason, form.action_details, form.report_id);

    let result =
        moderation::edit_message(&db, &moderator.login, id, values.clone(), &note.to_note()?)
            .await;

    let (status, errors) = match result {
        Ok(EditOutcome::Unchanged | EditOutcome::Updated(_)) => {
            return Ok(Redirect::to(LISTING).into_response());
        }
        Err(err) => match reject(
            err,
            "An error occurred while updating the farewell message. Please try again.",
        ) {
            Rejection::Fail(err) => return Err(err),
            Rejection::Redisplay(status, errors) => (status, errors),
        },
    };

    let view = EditMessageView {
        form_token: auth::form_token(&session).await?,
        context: context(&db, id).await?,
        values,
        note,
        errors,
    };
    Ok(redisplay(status, view))
}

/// - GET `/Admin/FarewellMessages/Delete/{id}`
async fn delete_form(
    _moderator: Moderator,
    State(db): State<Db>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<DeleteMessageView>> {
    Ok(Json(DeleteMessageView {
        form_token: auth::form_token(&session).await?,
        context: context(&db, id).await?,
        note: NoteInput::default(),
        errors: ValidationErrors::new(),
    }))
}

/// - POST `/Admin/FarewellMessages/Delete/{id}`
async fn delete(
    moderator: Moderator,
    State(db): State<Db>,
    session: Session,
    Path(id): Path<i64>,
    Form(form): Form<DeleteMessageForm>,
) -> Result<Response> {
    auth::verify_form_token(&session, form.form_token.as_deref()).await?;
    ensure_same_id(id, form.id)?;

    let note = NoteInput::new(form.action_reason, form.action_details, form.report_id);
    let result = moderation::delete_message(&db, &moderator.login, id, &note.to_note()?).await;

    let (status, errors) = match result {
        Ok(_) => return Ok(Redirect::to(LISTING).into_response()),
        Err(err) => match reject(
            err,
            "An error occurred while deleting the farewell message. Please try again.",
        ) {
            Rejection::Fail(err) => return Err(err),
            Rejection::Redisplay(status, errors) => (status, errors),
        },
    };

    let view = DeleteMessageView {
        form_token: auth::form_token(&session).await?,
        context: context(&db, id).await?,
        note,
        errors,
    };
    Ok(redisplay(status, view))
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/Admin/FarewellMessages/Edit/{id}", get(edit_form).post(edit))
        .route("/Admin/FarewellMessages/Delete/{id}", get(delete_form).post(delete))
}
