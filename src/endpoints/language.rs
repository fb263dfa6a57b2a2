use anyhow::Context as _;
use axum::{
    Router,
    extract::Query,
    http::{HeaderValue, header},
    response::{AppendHeaders, IntoResponse, Redirect},
    routing::get,
};
use serde::Deserialize;
use tracing::debug;

use super::is_local_url;
use crate::{AppState, Result};

/// Cookie read by the presentation layer to pick a locale.
const CULTURE_COOKIE: &str = ".AspNetCore.Culture";
const DEFAULT_CULTURE: &str = "en-US";
const ONE_YEAR_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Deserialize)]
struct SetCultureQuery {
    culture: Option<String>,
    #[serde(rename = "returnUrl")]
    return_url: Option<String>,
}

fn culture_cookie(culture: &str) -> String {
    let value = format!("c={culture}|uic={culture}");
    let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
    format!("{CULTURE_COOKIE}={encoded}; Max-Age={ONE_YEAR_SECS}; Path=/; SameSite=Lax")
}

/// Remember the visitor's locale and go back where they came from.
/// - GET `/Language/SetCulture?culture=&returnUrl=`
async fn set_culture(Query(query): Query<SetCultureQuery>) -> Result<impl IntoResponse> {
    let culture = query
        .culture
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CULTURE);
    let return_url = query
        .return_url
        .as_deref()
        .filter(|url| is_local_url(url))
        .map(|url| url.strip_prefix('~').unwrap_or(url))
        .unwrap_or("/");
    debug!(culture, return_url, "setting culture");

    let cookie =
        HeaderValue::from_str(&culture_cookie(culture)).context("invalid culture cookie")?;

    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Redirect::to(return_url),
    ))
}

pub(super) fn routes() -> Router<AppState> {
    Router::new().route("/Language/SetCulture", get(set_culture))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_value_is_encoded_and_long_lived() {
        let cookie = culture_cookie("id-ID");
        assert_eq!(
            cookie,
            ".AspNetCore.Culture=c%3Did-ID%7Cuic%3Did-ID; Max-Age=31536000; Path=/; SameSite=Lax"
        );
    }

    #[test]
    fn hostile_cultures_cannot_inject_attributes() {
        let cookie = culture_cookie("en; Domain=evil.example");
        assert!(HeaderValue::from_str(&cookie).is_ok());
        assert_eq!(cookie.matches(';').count(), 3);
    }
}
