use super::config::{self, AllowList, AppConfig};
use super::db::{DatabaseMigrator, Db, establish_pool};
pub use super::error::Error;
use super::oauth::{GitHub, IdentityProvider};
use super::storage::{ImageStorage, S3Store};
use anyhow::Context as _;
use axum::{Router, extract::DefaultBodyLimit, extract::FromRef, routing::get};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity, log::LevelFilter};
use std::{path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tower_sessions::{ExpiredDeletion as _, Expiry, SessionManagerLayer, cookie::time::Duration};
use tower_sessions_sqlx_store::SqliteStore;
use tracing::{error, info, warn};

/// The application user agent. Concatenates the package name and version. e.g. `farewell/0.1.0`.
pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Idle time after which a session (and any pending sign-in) is forgotten.
const SESSION_IDLE_MINUTES: i64 = 30;

/// How often expired sessions are purged from the database.
const SESSION_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Request bodies above this many bytes, on top of the two image uploads, are refused.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// The application-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Parser, Debug, Clone)]
/// Command line arguments.
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "default.toml")]
    pub config: PathBuf,
    /// The verbosity level.
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

#[derive(Clone, FromRef)]
/// The application state, shared across all routes.
pub struct AppState {
    /// The application configuration.
    pub(crate) config: AppConfig,
    /// The main database connection pool.
    pub db: Db,
    /// Uploaded images and the single image reference resolver.
    pub images: ImageStorage,
    /// The moderator identity provider.
    pub identity: Arc<dyn IdentityProvider>,
    /// The moderator allow-list, re-read on every check.
    pub allow_list: AllowList,
}

/// Session storage in the application database, with expired sessions
/// deleted every `sweep_every` by a background task.
pub async fn session_store(
    db: Db,
    sweep_every: std::time::Duration,
) -> anyhow::Result<SqliteStore> {
    let store = SqliteStore::new(db);
    store
        .migrate()
        .await
        .context("failed to create session table")?;

    let sweeper = store.clone();
    drop(tokio::spawn(async move {
        if let Err(err) = sweeper.continuously_delete_expired(sweep_every).await {
            error!("expired session cleanup stopped: {err}");
        }
    }));

    Ok(store)
}

/// Build the router, with sessions and request tracing, over `state`.
pub fn app(state: AppState, sessions: SqliteStore) -> Router {
    let body_limit = state
        .config
        .storage
        .max_upload_bytes
        .saturating_mul(2)
        .saturating_add(FORM_OVERHEAD_BYTES);

    let sessions = SessionManagerLayer::new(sessions)
        .with_secure(state.config.public_url.scheme() == "https")
        .with_expiry(Expiry::OnInactivity(Duration::minutes(SESSION_IDLE_MINUTES)));

    Router::new()
        .route("/", get(super::index))
        .merge(super::endpoints::routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(sessions)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The main application entry point.
pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    // Console logging at the level picked with -v/-q.
    if args.verbosity.log_level_filter() != LevelFilter::Off {
        let lvl = match args.verbosity.log_level_filter() {
            LevelFilter::Error => tracing::Level::ERROR,
            LevelFilter::Warn => tracing::Level::WARN,
            LevelFilter::Info | LevelFilter::Off => tracing::Level::INFO,
            LevelFilter::Debug => tracing::Level::DEBUG,
            LevelFilter::Trace => tracing::Level::TRACE,
        };
        tracing_subscriber::fmt().with_max_level(lvl).init();
    }

    if !args.config.exists() {
        // Not fatal: every setting can come from FAREWELL_* variables instead.
        warn!(
            "configuration file {} does not exist",
            args.config.display()
        );
    }

    // Read and parse the user-provided configuration.
    let figment = config::figment(Some(&args.config));
    let config: AppConfig = figment
        .extract()
        .context("failed to load configuration")?;

    if config.admin.emails.is_empty() {
        warn!("no moderator emails are configured, nobody will be able to sign in to /Admin");
    }

    // Initialize metrics reporting.
    super::metrics::setup(config.metrics.as_ref()).context("failed to set up metrics exporter")?;

    // Create a reqwest client that will be used for all outbound requests.
    let client = reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .build()
        .context("failed to build requester client")?;

    if let Some(dir) = config
        .db
        .strip_prefix("sqlite://")
        .map(PathBuf::from)
        .and_then(|p| p.parent().map(PathBuf::from))
        .filter(|p| !p.as_os_str().is_empty())
    {
        tokio::fs::create_dir_all(&dir)
            .await
            .context("failed to create database directory")?;
    }

    // Create a database connection pool and bring the schema up to date.
    let db = establish_pool(&config.db)
        .await
        .context("failed to establish database connection pool")?;
    DatabaseMigrator::new(db.clone())
        .migrate_to_latest()
        .await
        .context("failed to apply migrations")?;

    let images = ImageStorage::new(
        Arc::new(S3Store::new(&config.storage)),
        &config.storage,
        config.images.clone(),
    );
    let identity = GitHub::new(client, config.oauth.clone(), config.oauth_redirect_uri())
        .context("failed to configure identity provider")?;
    let allow_list = AllowList::new(Some(args.config.clone()), config.admin.clone());
    let sessions = session_store(db.clone(), SESSION_SWEEP_INTERVAL).await?;

    let addr = config.listen_address();
    let app = app(
        AppState {
            config,
            db,
            images,
            identity: Arc::new(identity),
            allow_list,
        },
        sessions,
    );

    info!("listening on {addr}");
    info!("connect to: http://127.0.0.1:{}", addr.port());

    let listener = TcpListener::bind(&addr)
        .await
        .context("failed to bind address")?;

    let serve = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .context("failed to serve app")
    });

    serve
        .await
        .map_err(Into::into)
        .and_then(|r| r)
        .context("failed to serve app")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tower_sessions::{
        SessionStore as _,
        cookie::time::OffsetDateTime,
        session::{Id, Record},
    };

    use super::*;

    fn record(expiry_date: OffsetDateTime) -> Record {
        Record {
            id: Id::default(),
            data: HashMap::new(),
            expiry_date,
        }
    }

    #[tokio::test]
    async fn expired_sessions_are_purged() {
        let db = crate::db::test_pool().await;
        let store = session_store(db.clone(), std::time::Duration::from_millis(20))
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc();
        store.create(&mut record(now - Duration::minutes(1))).await.unwrap();
        store.create(&mut record(now + Duration::minutes(30))).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tower_sessions")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
