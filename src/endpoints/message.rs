use axum::{
    Form, Json, Router,
    extract::{Query, State},
    response::{IntoResponse as _, Redirect, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::info;

use super::{empty_as_none, unprocessable};
use crate::{
    AppState, Db, Error, Result, auth,
    db::{messages, people},
    metrics::MESSAGES_CREATED,
    models::{MessageFields, MessageWithPerson, Person},
    moderation::validate_message_fields,
    validation::ValidationErrors,
};

#[derive(Serialize)]
struct MessageListing {
    messages: Vec<ListedMessage>,
}

#[derive(Serialize)]
struct ListedMessage {
    id: i64,
    body: String,
    author_name: Option<String>,
    created_at: DateTime<Utc>,
    person_name: String,
    person_slug: String,
}

impl From<MessageWithPerson> for ListedMessage {
    fn from(row: MessageWithPerson) -> Self {
        Self {
            id: row.message.id,
            body: row.message.body,
            author_name: row.message.author_name,
            created_at: row.message.created_at,
            person_name: row.person_name,
            person_slug: row.person_slug,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateQuery {
    #[serde(rename = "farewellPersonId")]
    farewell_person_id: Option<i64>,
}

/// The submitted values, echoed back when the form is redisplayed.
#[derive(Debug, Default, Clone, Serialize)]
struct MessageInput {
    body: String,
    author_name: Option<String>,
    author_email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateMessageForm {
    form_token: Option<String>,
    farewell_person_id: i64,
    #[serde(default)]
    body: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    author_name: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    author_email: Option<String>,
}

#[derive(Serialize)]
struct CreateMessageView {
    form_token: String,
    farewell_person_id: i64,
    person_name: String,
    values: MessageInput,
    errors: ValidationErrors,
}

async fn public_person(db: &Db, id: Option<i64>) -> Result<Person> {
    let id = id.ok_or_else(|| Error::not_found("person"))?;
    people::find(db, id)
        .await?
        .filter(|p| p.is_public)
        .ok_or_else(|| Error::not_found(format!("person {id}")))
}

/// Public messages across every public page, newest first.
/// - GET `/FarewellMessage`
async fn index(State(db): State<Db>) -> Result<Json<MessageListing>> {
    let messages = messages::public(&db).await?;
    Ok(Json(MessageListing {
        messages: messages.into_iter().map(ListedMessage::from).collect(),
    }))
}

/// The empty message form for one person.
/// - GET `/FarewellMessage/Create?farewellPersonId=`
async fn create_form(
    State(db): State<Db>,
    session: Session,
    Query(query): Query<CreateQuery>,
) -> Result<Json<CreateMessageView>> {
    let person = public_person(&db, query.farewell_person_id).await?;

    Ok(Json(CreateMessageView {
        form_token: auth::form_token(&session).await?,
        farewell_person_id: person.id,
        person_name: person.name,
        values: MessageInput::default(),
        errors: ValidationErrors::new(),
    }))
}

/// Leave a message on a person's page.
/// - POST `/FarewellMessage/Create`
async fn create(
    State(db): State<Db>,
    session: Session,
    Form(form): Form<CreateMessageForm>,
) -> Result<Response> {
    auth::verify_form_token(&session, form.form_token.as_deref()).await?;
    let person = public_person(&db, Some(form.farewell_person_id)).await?;

    let fields = MessageFields {
        body: form.body,
        author_name: form.author_name,
        author_email: form.author_email,
        is_public: true,
    };
    let errors = validate_message_fields(&fields);
    if !errors.is_empty() {
        return Ok(unprocessable(CreateMessageView {
            form_token: auth::form_token(&session).await?,
            farewell_person_id: person.id,
            person_name: person.name,
            values: MessageInput {
                body: fields.body,
                author_name: fields.author_name,
                author_email: fields.author_email,
            },
            errors,
        }));
    }

    let message = messages::insert(
        &db,
        &messages::NewMessage {
            person_id: person.id,
            body: fields.body,
            author_name: fields.author_name,
            author_email: fields.author_email,
        },
        Utc::now(),
    )
    .await?;

    counter!(MESSAGES_CREATED).increment(1);
    info!(message_id = message.id, person_id = person.id, "message created");

    Ok(Redirect::to(&format!("/{}", person.slug)).into_response())
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/FarewellMessage", get(index))
        .route("/FarewellMessage/Create", get(create_form).post(create))
}
