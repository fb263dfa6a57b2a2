//! GitHub identity provider for moderator sign-in.

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use reqwest::header;
use serde::{Deserialize, de::DeserializeOwned};
use url::Url;

use crate::config::OAuthConfig;

/// The authenticated identity returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub login: String,
    pub email: String,
}

/// An OAuth 2.0 authorization-code identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to start a sign-in carrying `state`.
    fn authorize_url(&self, state: &str) -> String;

    /// Trade an authorization `code` for the signed-in identity.
    async fn exchange(&self, code: &str) -> anyhow::Result<Identity>;
}

#[derive(Debug, Clone)]
pub struct GitHub {
    client: reqwest::Client,
    config: OAuthConfig,
    authorize_url: Url,
    redirect_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct User {
    login: String,
    email: Option<String>,
}

#[derive(Deserialize)]
struct Email {
    email: String,
    primary: bool,
    verified: bool,
}

impl GitHub {
    pub fn new(
        client: reqwest::Client,
        config: OAuthConfig,
        redirect_uri: String,
    ) -> anyhow::Result<Self> {
        let authorize_url =
            Url::parse(&config.authorize_url).context("invalid oauth authorize_url")?;

        Ok(Self {
            client,
            config,
            authorize_url,
            redirect_uri,
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }

    async fn access_token(&self, code: &str) -> anyhow::Result<String> {
        let response: TokenResponse = self
            .client
            .post(&self.config.token_url)
            .header(header::ACCEPT, "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await
            .context("failed to reach token endpoint")?
            .error_for_status()
            .context("token endpoint rejected the request")?
            .json()
            .await
            .context("failed to parse token response")?;

        if let Some(error) = response.error {
            return Err(anyhow!(
                "token exchange failed: {error}: {}",
                response.error_description.unwrap_or_default()
            ));
        }

        response
            .access_token
            .context("token response carried no access token")
    }

    async fn get<T: DeserializeOwned>(&self, token: &str, path: &str) -> anyhow::Result<T> {
        self.client
            .get(self.api(path))
            .bearer_auth(token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("failed to fetch {path}"))?
            .error_for_status()
            .with_context(|| format!("{path} returned an error"))?
            .json()
            .await
            .with_context(|| format!("failed to parse {path}"))
    }
}

#[async_trait]
impl IdentityProvider for GitHub {
    fn authorize_url(&self, state: &str) -> String {
        let mut url = self.authorize_url.clone();
        _ = url
            .query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", "read:user user:email")
            .append_pair("state", state);
        url.into()
    }

    async fn exchange(&self, code: &str) -> anyhow::Result<Identity> {
        let token = self.access_token(code).await?;
        let user: User = self.get(&token, "/user").await?;

        // Accounts with a private address only expose it through /user/emails.
        let email = match user.email.filter(|e| !e.is_empty()) {
            Some(email) => email,
            None => {
                let emails: Vec<Email> = self.get(&token, "/user/emails").await?;
                emails
                    .into_iter()
                    .find(|e| e.primary && e.verified)
                    .map(|e| e.email)
                    .with_context(|| format!("{} has no verified primary email", user.login))?
            }
        };

        Ok(Identity {
            login: user.login,
            email,
        })
    }
}
