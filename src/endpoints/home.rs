use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse as _, Redirect, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    AppState, Db, Error, Result,
    db::{messages, people},
    models::Message,
    storage::ImageStorage,
};

#[derive(Serialize)]
struct PersonPage {
    id: i64,
    name: String,
    slug: String,
    description: String,
    portrait_url: String,
    background_url: String,
    created_at: DateTime<Utc>,
    messages: Vec<PublicMessage>,
}

#[derive(Serialize)]
struct PublicMessage {
    id: i64,
    body: String,
    author_name: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<Message> for PublicMessage {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            body: message.body,
            author_name: message.author_name,
            created_at: message.created_at,
        }
    }
}

/// A public memorial page with its public messages.
/// - GET `/{slug}`
#[tracing::instrument(skip_all)]
async fn person_page(
    State(db): State<Db>,
    State(images): State<ImageStorage>,
    Path(slug): Path<String>,
) -> Result<Response> {
    if slug == "index" {
        return Ok(Redirect::to("/").into_response());
    }

    let person = people::find_public_by_slug(&db, &slug)
        .await?
        .ok_or_else(|| Error::not_found(format!("person '{slug}'")))?;
    let messages = messages::public_for_person(&db, person.id).await?;

    let page = PersonPage {
        portrait_url: images.resolve(person.portrait_url.as_deref()).await,
        background_url: images.resolve(person.background_url.as_deref()).await,
        id: person.id,
        name: person.name,
        slug: person.slug,
        description: person.description,
        created_at: person.created_at,
        messages: messages.into_iter().map(PublicMessage::from).collect(),
    };

    Ok(Json(page).into_response())
}

pub(super) fn routes() -> Router<AppState> {
    Router::new().route("/{slug}", get(person_page))
}
