//! Moderator sign-in through the identity provider.

use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    Json, Router,
    extract::{Query, State},
    response::{IntoResponse as _, Redirect, Response},
    routing::get,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    AppState, Error, Result,
    auth::{self, Moderator},
    config::AllowList,
    metrics::{AUTH_DENIED, AUTH_FAILED},
    oauth::IdentityProvider,
};

/// Error codes carried to `/Admin/error`.
const OAUTH_ERROR: &str = "oauth_error";
const MISSING_STATE: &str = "missing_state";
const INVALID_STATE: &str = "invalid_state";

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorQuery {
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorView {
    request_id: Uuid,
    error: String,
    message: &'static str,
    detailed_message: String,
}

fn error_redirect(code: &str, description: Option<&str>) -> Response {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    _ = query.append_pair("error", code);
    if let Some(description) = description {
        _ = query.append_pair("error_description", description);
    }
    Redirect::to(&format!("/Admin/error?{}", query.finish())).into_response()
}

/// The (message, detailed message) pair shown for an error code.
fn describe(code: &str, description: Option<String>) -> (&'static str, String) {
    match code {
        OAUTH_ERROR => (
            "Authentication failed",
            description
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "The identity provider reported an error.".to_owned()),
        ),
        MISSING_STATE | INVALID_STATE => (
            "Invalid authentication request",
            "The authentication request appears to be invalid or tampered with. Please try again."
                .to_owned(),
        ),
        _ => (
            "Authentication error",
            "An unknown error occurred during authentication.".to_owned(),
        ),
    }
}

/// Start a sign-in at the identity provider.
/// - GET `/Admin/login`
async fn login(
    State(identity): State<Arc<dyn IdentityProvider>>,
    session: Session,
) -> Result<Redirect> {
    let state = auth::generate_state();
    auth::store_state(&session, &state).await?;
    Ok(Redirect::to(&identity.authorize_url(&state)))
}

/// Where the identity provider sends the browser back to.
/// - GET `/Admin/callback?code=&state=&error=&error_description=`
#[tracing::instrument(skip_all)]
async fn callback(
    State(identity): State<Arc<dyn IdentityProvider>>,
    State(allow_list): State<AllowList>,
    session: Session,
    Query(query): Query<CallbackQuery>,
) -> Result<Response> {
    if let Some(error) = query.error.filter(|e| !e.is_empty()) {
        warn!(%error, "identity provider reported an error");
        counter!(AUTH_FAILED).increment(1);
        let description = query.error_description.unwrap_or(error);
        return Ok(error_redirect(OAUTH_ERROR, Some(&description)));
    }

    let Some(state) = query.state.filter(|s| !s.is_empty()) else {
        warn!("oauth callback without a state parameter, potential CSRF");
        counter!(AUTH_FAILED).increment(1);
        return Ok(error_redirect(MISSING_STATE, None));
    };

    if !auth::validate_state(&session, &state).await {
        warn!("oauth callback with an unknown state parameter, potential CSRF");
        counter!(AUTH_FAILED).increment(1);
        return Ok(error_redirect(INVALID_STATE, None));
    }
    auth::remove_state(&session, &state).await?;

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        counter!(AUTH_FAILED).increment(1);
        return Ok(error_redirect(OAUTH_ERROR, Some("No authorization code was returned.")));
    };

    let who = match identity.exchange(&code).await {
        Ok(who) => who,
        Err(err) => {
            error!("failed to complete sign-in: {err:?}");
            counter!(AUTH_FAILED).increment(1);
            return Ok(error_redirect(OAUTH_ERROR, Some("Could not verify your identity.")));
        }
    };

    if !allow_list.allows(&who.email) {
        warn!(login = %who.login, "identity is not on the moderator allow-list");
        counter!(AUTH_DENIED).increment(1);
        auth::sign_out(&session).await?;
        return Err(Error::forbidden(anyhow!("{} is not a moderator", who.login)));
    }

    info!(login = %who.login, "moderator signed in");
    Moderator {
        login: who.login,
        email: who.email,
    }
    .sign_in(&session)
    .await?;

    Ok(Redirect::to("/Admin").into_response())
}

/// - GET `/Admin/error?error=&error_description=`
async fn oauth_error(Query(query): Query<ErrorQuery>) -> Json<ErrorView> {
    let error = query.error.unwrap_or_default();
    let (message, detailed_message) = describe(&error, query.error_description);

    Json(ErrorView {
        request_id: Uuid::new_v4(),
        error,
        message,
        detailed_message,
    })
}

/// - GET `/Admin/logout`
async fn logout(session: Session) -> Result<Redirect> {
    auth::sign_out(&session).await?;
    Ok(Redirect::to("/"))
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route(auth::LOGIN_PATH, get(login))
        .route("/Admin/callback", get(callback))
        .route("/Admin/error", get(oauth_error))
        .route("/Admin/logout", get(logout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_messages() {
        let (message, detail) = describe(OAUTH_ERROR, Some("access_denied".to_owned()));
        assert_eq!(message, "Authentication failed");
        assert_eq!(detail, "access_denied");

        let (message, _) = describe(INVALID_STATE, None);
        assert_eq!(message, "Invalid authentication request");
        assert_eq!(describe(MISSING_STATE, None).0, message);

        assert_eq!(describe("boom", None).0, "Authentication error");
    }

    #[test]
    fn error_redirect_encodes_the_description() {
        let response = error_redirect(OAUTH_ERROR, Some("bad & worse"));
        let location = response
            .headers()
            .get(axum::http::header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(
            location,
            "/Admin/error?error=oauth_error&error_description=bad+%26+worse"
        );
    }
}
