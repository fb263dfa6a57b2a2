//! Session-backed authentication: OAuth state parameters, anti-forgery tokens
//! and the moderator extractor.

use anyhow::anyhow;
use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse as _, Redirect, Response},
};
use base64::Engine as _;
use metrics::counter;
use rand::{Rng as _, thread_rng};
use serde::{Deserialize, Serialize};
use tower_sessions::{Session, session};
use tracing::{info, warn};

use crate::{AppState, Error, Result, metrics::AUTH_DENIED};

/// Session key prefix for pending OAuth state parameters.
const STATE_KEY_PREFIX: &str = "oauth_state_";
const FORM_TOKEN_KEY: &str = "form_token";
const MODERATOR_KEY: &str = "moderator";

/// Where unauthenticated moderators are sent.
pub const LOGIN_PATH: &str = "/Admin/login";

/// 32 random bytes, URL-safe base64.
fn random_token() -> String {
    let mut bytes = [0_u8; 32];
    thread_rng().fill(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// A fresh, unguessable OAuth state parameter.
pub fn generate_state() -> String {
    random_token()
}

/// Remember `state` in the session until the provider redirects back.
pub async fn store_state(session: &Session, state: &str) -> Result<(), session::Error> {
    session
        .insert(&format!("{STATE_KEY_PREFIX}{state}"), state)
        .await
}

/// `true` iff `state` was stored in this session and has not been consumed.
pub async fn validate_state(session: &Session, state: &str) -> bool {
    if state.is_empty() {
        warn!("oauth state validation failed: empty state parameter");
        return false;
    }

    match session
        .get::<String>(&format!("{STATE_KEY_PREFIX}{state}"))
        .await
    {
        Ok(Some(stored)) if stored == state => true,
        Ok(_) => {
            warn!("oauth state validation failed: unknown state parameter");
            false
        }
        Err(err) => {
            warn!("oauth state validation failed: session unavailable: {err}");
            false
        }
    }
}

/// Consume `state` so it cannot be replayed.
pub async fn remove_state(session: &Session, state: &str) -> Result<(), session::Error> {
    _ = session
        .remove::<String>(&format!("{STATE_KEY_PREFIX}{state}"))
        .await?;
    Ok(())
}

/// The session's anti-forgery token, created on first use.
pub async fn form_token(session: &Session) -> Result<String> {
    if let Some(token) = session.get::<String>(FORM_TOKEN_KEY).await? {
        return Ok(token);
    }

    let token = random_token();
    session.insert(FORM_TOKEN_KEY, &token).await?;
    Ok(token)
}

/// Reject a form post whose anti-forgery token is missing or does not match.
pub async fn verify_form_token(session: &Session, presented: Option<&str>) -> Result<()> {
    let stored = session.get::<String>(FORM_TOKEN_KEY).await?;
    match (stored, presented) {
        (Some(stored), Some(presented)) if !presented.is_empty() && stored == presented => Ok(()),
        _ => Err(Error::bad_request(anyhow!(
            "missing or invalid anti-forgery token"
        ))),
    }
}

/// A signed-in moderator.
///
/// Extraction redirects anonymous visitors to the login page. A signed-in
/// identity that has since dropped off the allow-list is signed out and
/// refused with 403.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moderator {
    pub login: String,
    pub email: String,
}

impl Moderator {
    /// Start an authenticated session for this moderator.
    pub async fn sign_in(self, session: &Session) -> Result<(), session::Error> {
        session.cycle_id().await?;
        session.insert(MODERATOR_KEY, self).await
    }
}

impl FromRequestParts<AppState> for Moderator {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|rejection| rejection.into_response())?;

        let moderator = session
            .get::<Self>(MODERATOR_KEY)
            .await
            .map_err(|err| Error::from(err).into_response())?;

        let Some(moderator) = moderator else {
            return Err(Redirect::to(LOGIN_PATH).into_response());
        };

        if !state.allow_list.allows(&moderator.email) {
            warn!(login = %moderator.login, "moderator no longer on the allow-list, signing out");
            counter!(AUTH_DENIED).increment(1);
            session
                .flush()
                .await
                .map_err(|err| Error::from(err).into_response())?;
            return Err(Error::forbidden(anyhow!("not authorized")).into_response());
        }

        Ok(moderator)
    }
}

/// Drop every value in the session, signing the moderator out.
pub async fn sign_out(session: &Session) -> Result<(), session::Error> {
    if let Ok(Some(moderator)) = session.get::<Moderator>(MODERATOR_KEY).await {
        info!(login = %moderator.login, "moderator signed out");
    }
    session.flush().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tower_sessions::MemoryStore;

    use super::*;

    fn session() -> Session {
        Session::new(None, Arc::new(MemoryStore::default()), None)
    }

    #[test]
    fn states_are_url_safe_and_distinct() {
        let a = generate_state();
        let b = generate_state();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn state_is_single_use() {
        let session = session();
        let state = generate_state();
        store_state(&session, &state).await.unwrap();

        assert!(validate_state(&session, &state).await);
        remove_state(&session, &state).await.unwrap();
        assert!(!validate_state(&session, &state).await);
    }

    #[tokio::test]
    async fn unknown_or_empty_states_are_rejected() {
        let session = session();
        store_state(&session, &generate_state()).await.unwrap();

        assert!(!validate_state(&session, "").await);
        assert!(!validate_state(&session, &generate_state()).await);
    }

    #[tokio::test]
    async fn form_token_is_stable_within_a_session() {
        let session = session();
        let token = form_token(&session).await.unwrap();
        assert_eq!(form_token(&session).await.unwrap(), token);

        verify_form_token(&session, Some(&token)).await.unwrap();

        let err = verify_form_token(&session, Some("forged")).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(verify_form_token(&session, None).await.is_err());
    }

    #[tokio::test]
    async fn form_token_is_required_even_before_one_was_issued() {
        let session = session();
        assert!(verify_form_token(&session, Some("")).await.is_err());
    }
}
