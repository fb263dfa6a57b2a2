use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::AppState;

mod admin;
mod home;
mod language;
mod message;
mod person;
mod report;

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(person::routes())
        .merge(message::routes())
        .merge(report::routes())
        .merge(language::routes())
        .merge(admin::routes())
        .merge(home::routes())
}

/// `?page=` on the paginated listings.
#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    #[serde(default, deserialize_with = "lenient_page")]
    page: Option<u32>,
}

/// A blank or non-numeric page number means the first page.
fn lenient_page<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
    let value = Option::<String>::deserialize(de)?;
    Ok(value.and_then(|v| v.trim().parse().ok()))
}

/// `true` for same-site paths such as `/x` or `~/x`, never `//host` or `/\host`.
pub(crate) fn is_local_url(url: &str) -> bool {
    match url.as_bytes() {
        [b'/'] => true,
        [b'/', second, ..] => *second != b'/' && *second != b'\\',
        [b'~', b'/', ..] => true,
        _ => false,
    }
}

/// Blank form inputs bind to `None`.
fn empty_as_none<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(de)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

/// An HTML checkbox: present as `on`/`true`/`1` when ticked, absent otherwise.
fn checkbox<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    let value = Option::<String>::deserialize(de)?;
    Ok(value.is_some_and(|v| is_checked(&v)))
}

fn is_checked(value: &str) -> bool {
    matches!(value.trim(), "on" | "true" | "True" | "1")
}

/// Redisplay a form with its field errors and the submitted values.
fn unprocessable<T: Serialize>(view: T) -> Response {
    (StatusCode::UNPROCESSABLE_ENTITY, Json(view)).into_response()
}
