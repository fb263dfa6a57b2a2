//! Moderator backend: dashboard, listings, and the edit/delete flows.

use std::collections::BTreeMap;

use anyhow::{Context as _, anyhow};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse as _, Response},
    routing::get,
};
use chrono::{FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use super::PageQuery;
use crate::{
    AppState, Db, Error, Result,
    auth::Moderator,
    config::AppConfig,
    dashboard::{self, ChartData},
    db::{
        logs, messages,
        pagination::{Page, PageRequest},
        people, reports,
    },
    models::{ContentReport, MessageWithPerson, ModeratorLog, Person, ReportTarget},
    moderation::{ModerationError, ModerationNote},
    validation::{FORM, ValidationErrors},
};

mod login;
mod message;
mod person;

const PEOPLE_PAGE_SIZE: u32 = 10;
const MESSAGES_PAGE_SIZE: u32 = 10;
const REPORTS_PAGE_SIZE: u32 = 10;
const LOGS_PAGE_SIZE: u32 = 250;
const DASHBOARD_RECENT: i64 = 50;

/// A report plus its human-readable state.
#[derive(Debug, Serialize)]
struct ReportSummary {
    #[serde(flatten)]
    report: ContentReport,
    status: &'static str,
}

impl From<ContentReport> for ReportSummary {
    fn from(report: ContentReport) -> Self {
        let status = report.status();
        Self { report, status }
    }
}

fn summaries(reports: Vec<ContentReport>) -> Vec<ReportSummary> {
    reports.into_iter().map(ReportSummary::from).collect()
}

/// The justification fields shared by every moderation form, echoed back on redisplay.
#[derive(Debug, Default, Clone, Serialize)]
struct NoteInput {
    action_reason: String,
    action_details: String,
    report_id: Option<String>,
}

impl NoteInput {
    fn new(action_reason: String, action_details: String, report_id: Option<String>) -> Self {
        Self {
            action_reason,
            action_details,
            report_id,
        }
    }

    fn to_note(&self) -> Result<ModerationNote> {
        let report_id = self
            .report_id
            .as_deref()
            .map(str::parse::<Uuid>)
            .transpose()
            .map_err(|e| Error::bad_request(anyhow!("invalid report id: {e}")))?;

        Ok(ModerationNote {
            reason: self.action_reason.clone(),
            details: self.action_details.clone(),
            report_id,
        })
    }
}

/// A form post whose hidden id disagrees with the URL is refused outright.
fn ensure_same_id(path_id: i64, form_id: i64) -> Result<()> {
    if path_id == form_id {
        Ok(())
    } else {
        Err(Error::bad_request(anyhow!(
            "form id {form_id} does not match target {path_id}"
        )))
    }
}

/// How a failed moderation mutation is answered.
enum Rejection {
    Fail(Error),
    /// Redisplay the form with these errors.
    Redisplay(StatusCode, ValidationErrors),
}

fn reject(err: ModerationError, generic: &str) -> Rejection {
    match err {
        ModerationError::NotFound(kind, id) => {
            Rejection::Fail(Error::not_found(format!("{} {id}", kind.label())))
        }
        ModerationError::Invalid(errors) => {
            Rejection::Redisplay(StatusCode::UNPROCESSABLE_ENTITY, errors)
        }
        ModerationError::Database(err) => {
            error!("moderation action failed and was rolled back: {err}");
            Rejection::Redisplay(
                StatusCode::INTERNAL_SERVER_ERROR,
                ValidationErrors::single(FORM, generic),
            )
        }
    }
}

fn redisplay<T: Serialize>(status: StatusCode, view: T) -> Response {
    (status, Json(view)).into_response()
}

#[derive(Serialize)]
struct DashboardView {
    moderator: String,
    total_people: i64,
    total_messages: i64,
    total_reports: i64,
    people: ChartData,
    messages: ChartData,
    reports: ChartData,
    recent_logs: Vec<ModeratorLog>,
    recent_reports: Vec<ReportSummary>,
}

/// Creation charts and the latest moderation activity.
/// - GET `/Admin`
async fn dashboard(
    moderator: Moderator,
    State(config): State<AppConfig>,
    State(db): State<Db>,
) -> Result<Json<DashboardView>> {
    let offset = FixedOffset::east_opt(config.dashboard.utc_offset_minutes * 60)
        .context("dashboard utc offset out of range")?;
    let now = Utc::now();
    let since = dashboard::window_start(now, offset);

    let people_created = people::created_since(&db, since).await?;
    let messages_created = messages::created_since(&db, since).await?;
    let reports_created = reports::created_since(&db, since).await?;

    Ok(Json(DashboardView {
        moderator: moderator.login,
        total_people: people::count(&db).await?,
        total_messages: messages::count(&db).await?,
        total_reports: reports::count(&db).await?,
        people: dashboard::chart(&people_created, now, offset),
        messages: dashboard::chart(&messages_created, now, offset),
        reports: dashboard::chart(&reports_created, now, offset),
        recent_logs: logs::recent(&db, DASHBOARD_RECENT).await?,
        recent_reports: summaries(reports::recent(&db, DASHBOARD_RECENT).await?),
    }))
}

/// Every person, hidden ones included.
/// - GET `/Admin/FarewellPeople?page=`
async fn list_people(
    _moderator: Moderator,
    State(db): State<Db>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Person>>> {
    let request = PageRequest::new(query.page, PEOPLE_PAGE_SIZE);
    let total = people::count(&db).await?;
    let items = people::page(&db, request).await?;
    Ok(Json(Page::new(request, total, items)))
}

/// - GET `/Admin/FarewellMessages?page=`
async fn list_messages(
    _moderator: Moderator,
    State(db): State<Db>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<MessageWithPerson>>> {
    let request = PageRequest::new(query.page, MESSAGES_PAGE_SIZE);
    let total = messages::count(&db).await?;
    let items = messages::page(&db, request).await?;
    Ok(Json(Page::new(request, total, items)))
}

#[derive(Serialize)]
struct PersonRef {
    name: String,
    slug: String,
}

#[derive(Serialize)]
struct MessageRef {
    body: String,
    person_id: i64,
    person_name: String,
}

#[derive(Serialize)]
struct ReportListing {
    #[serde(flatten)]
    page: Page<ReportSummary>,
    /// Targets that still exist, keyed by id. Deleted targets are absent.
    person_lookup: BTreeMap<i64, PersonRef>,
    message_lookup: BTreeMap<i64, MessageRef>,
}

/// Reports with the names of what they point at, loaded in two batch queries.
/// - GET `/Admin/ContentReports?page=`
async fn list_reports(
    _moderator: Moderator,
    State(db): State<Db>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ReportListing>> {
    let request = PageRequest::new(query.page, REPORTS_PAGE_SIZE);
    let total = reports::count(&db).await?;
    let items = reports::page(&db, request).await?;

    let mut person_ids = Vec::new();
    let mut message_ids = Vec::new();
    for report in &items {
        match report.target {
            ReportTarget::Person(id) => person_ids.push(id),
            ReportTarget::Message(id) => message_ids.push(id),
        }
    }

    let person_lookup = people::find_many(&db, &person_ids)
        .await?
        .into_iter()
        .map(|p| {
            (
                p.id,
                PersonRef {
                    name: p.name,
                    slug: p.slug,
                },
            )
        })
        .collect();
    let message_lookup = messages::find_many_with_person(&db, &message_ids)
        .await?
        .into_iter()
        .map(|m| {
            (
                m.message.id,
                MessageRef {
                    body: m.message.body,
                    person_id: m.message.person_id,
                    person_name: m.person_name,
                },
            )
        })
        .collect();

    Ok(Json(ReportListing {
        page: Page::new(request, total, summaries(items)),
        person_lookup,
        message_lookup,
    }))
}

/// The moderation audit trail.
/// - GET `/Admin/AdminLogs?page=`
async fn list_logs(
    _moderator: Moderator,
    State(db): State<Db>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<ModeratorLog>>> {
    let request = PageRequest::new(query.page, LOGS_PAGE_SIZE);
    let total = logs::count(&db).await?;
    let items = logs::page(&db, request).await?;
    Ok(Json(Page::new(request, total, items)))
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/Admin", get(dashboard))
        .route("/Admin/FarewellPeople", get(list_people))
        .route("/Admin/FarewellMessages", get(list_messages))
        .route("/Admin/ContentReports", get(list_reports))
        .route("/Admin/AdminLogs", get(list_logs))
        .merge(login::routes())
        .merge(person::routes())
        .merge(message::routes())
}
