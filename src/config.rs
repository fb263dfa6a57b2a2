//! Application configuration, loaded through `figment`.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use figment::{
    Figment,
    providers::{Env, Format as _, Toml},
};
use serde::Deserialize;
use tracing::warn;
use url::Url;

/// Environment variable prefix for every configuration key.
pub const ENV_PREFIX: &str = "FAREWELL_";

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    /// Address to bind. Defaults to `127.0.0.1:8000`.
    pub listen_address: Option<SocketAddr>,
    /// SQLite connection string.
    #[serde(default = "default_db")]
    pub db: String,
    /// Externally visible base URL, used to build the OAuth redirect URI.
    pub public_url: Url,
    pub storage: StorageConfig,
    #[serde(default)]
    pub images: ImageConfig,
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub reports: ReportConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    pub metrics: Option<MetricConfig>,
}

impl AppConfig {
    pub fn listen_address(&self) -> SocketAddr {
        self.listen_address
            .unwrap_or(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000))
    }

    /// The callback the identity provider redirects back to.
    pub fn oauth_redirect_uri(&self) -> String {
        format!(
            "{}/Admin/callback",
            self.public_url.as_str().trim_end_matches('/')
        )
    }
}

fn default_db() -> String {
    "sqlite://data/farewell.db".to_owned()
}

/// S3-compatible object storage (Backblaze B2, MinIO, AWS).
#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Lifetime of signed display URLs.
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_secs: u64,
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
}

impl StorageConfig {
    /// `{endpoint}/{bucket}/`, the prefix shared by every managed object URL.
    pub fn object_url_prefix(&self) -> String {
        format!("{}/{}/", self.endpoint.trim_end_matches('/'), self.bucket)
    }
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

const fn default_signed_url_ttl() -> u64 {
    3600
}

const fn default_max_upload() -> usize {
    5 * 1024 * 1024
}

/// Placeholder images shown in place of missing or removed pictures.
#[derive(Deserialize, Debug, Clone)]
pub struct ImageConfig {
    pub default_url: String,
    pub deleted_url: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            default_url: "https://s6.imgcdn.dev/YQO8MN.webp".to_owned(),
            deleted_url: "https://s6.imgcdn.dev/YQkM7y.jpg".to_owned(),
        }
    }
}

/// GitHub OAuth application settings.
#[derive(Deserialize, Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_authorize_url() -> String {
    "https://github.com/login/oauth/authorize".to_owned()
}

fn default_token_url() -> String {
    "https://github.com/login/oauth/access_token".to_owned()
}

fn default_api_url() -> String {
    "https://api.github.com".to_owned()
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AdminConfig {
    /// Identity-provider emails allowed to moderate.
    #[serde(default)]
    pub emails: Vec<String>,
}

impl AdminConfig {
    pub fn allows(&self, email: &str) -> bool {
        self.emails.iter().any(|e| e.eq_ignore_ascii_case(email))
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ReportConfig {
    /// Reason codes offered on the report form.
    pub reasons: Vec<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            reasons: ["spam", "abuse", "inappropriate", "copyright", "other"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct DashboardConfig {
    /// Offset of the moderators' local time from UTC. Asia/Jakarta by default.
    pub utc_offset_minutes: i32,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 7 * 60,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct PrometheusConfig {
    /// The URL of the Prometheus push gateway.
    pub url: Url,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum MetricConfig {
    PrometheusPush(PrometheusConfig),
}

/// The configuration sources: an optional TOML file overlaid with `FAREWELL_*` variables.
pub fn figment(path: Option<&PathBuf>) -> Figment {
    let mut figment = Figment::new();
    if let Some(path) = path {
        figment = figment.admerge(Toml::file(path));
    }
    figment.admerge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Moderator allow-list accessor.
///
/// The configuration sources are rebuilt and `[admin]` re-extracted on every
/// check so edits take effect without a restart. When re-extraction fails the
/// value loaded at startup is used instead.
#[derive(Debug, Clone)]
pub struct AllowList {
    source: AllowListSource,
    fallback: AdminConfig,
}

#[derive(Debug, Clone)]
enum AllowListSource {
    /// The startup value, never re-read.
    Fixed,
    /// The optional config file plus `FAREWELL_*` variables.
    Config(Option<PathBuf>),
}

impl AllowList {
    /// A list re-read from `path` and the environment, as [`figment`] loads them.
    pub fn new(path: Option<PathBuf>, fallback: AdminConfig) -> Self {
        Self {
            source: AllowListSource::Config(path),
            fallback,
        }
    }

    /// A list that never re-reads its sources.
    pub fn fixed(emails: Vec<String>) -> Self {
        Self {
            source: AllowListSource::Fixed,
            fallback: AdminConfig { emails },
        }
    }

    pub fn current(&self) -> AdminConfig {
        let AllowListSource::Config(path) = &self.source else {
            return self.fallback.clone();
        };

        match figment(path.as_ref()).extract_inner::<AdminConfig>("admin") {
            Ok(admin) => admin,
            Err(err) => {
                warn!("failed to re-read admin allow-list, using startup value: {err}");
                self.fallback.clone()
            }
        }
    }

    pub fn allows(&self, email: &str) -> bool {
        self.current().allows(email)
    }
}
