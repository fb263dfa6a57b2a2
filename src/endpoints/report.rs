//! Anonymous content reports.

use anyhow::anyhow;
use axum::{
    Form, Json, Router,
    extract::{Query, State},
    response::{IntoResponse as _, Redirect, Response},
    routing::get,
};
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::info;

use super::{empty_as_none, is_local_url, unprocessable};
use crate::{
    AppState, Db, Error, Result, auth,
    config::AppConfig,
    db::reports::{self, NewReport},
    metrics::REPORTS_CREATED,
    models::{EMAIL_MAX, REPORT_REASON_MAX, ReportTarget},
    validation::ValidationErrors,
};

#[derive(Debug, Deserialize)]
struct ReportQuery {
    id: Option<String>,
    what: Option<String>,
    referer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportForm {
    form_token: Option<String>,
    #[serde(default)]
    id: String,
    #[serde(default)]
    what: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    referer: Option<String>,
    #[serde(default)]
    email: String,
    #[serde(default)]
    reason: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    explanation: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct ReportInput {
    email: String,
    reason: String,
    explanation: Option<String>,
}

#[derive(Serialize)]
struct ReportView {
    form_token: String,
    id: i64,
    what: &'static str,
    /// Where "back" leads from the form.
    referer: String,
    reasons: Vec<String>,
    values: ReportInput,
    errors: ValidationErrors,
}

#[derive(Debug, Deserialize)]
struct SuccessQuery {
    #[serde(rename = "reportId")]
    report_id: Option<String>,
}

#[derive(Serialize)]
struct SuccessView {
    report_id: String,
}

/// Only same-site referers are kept; anything else falls back to the home page.
fn safe_referer(referer: Option<&str>) -> String {
    referer
        .filter(|r| is_local_url(r))
        .unwrap_or("/")
        .to_owned()
}

fn validate(input: &ReportInput) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    errors.required("email", Some(input.email.as_str()), "Email is required");
    errors.max_len(
        "email",
        Some(input.email.as_str()),
        EMAIL_MAX,
        "Email cannot exceed 255 characters",
    );
    if !input.email.trim().is_empty() {
        errors.email("email", Some(input.email.as_str()), "Invalid email address");
    }
    errors.required("reason", Some(input.reason.as_str()), "Reason is required");
    errors.max_len(
        "reason",
        Some(input.reason.as_str()),
        REPORT_REASON_MAX,
        "Reason cannot exceed 100 characters",
    );

    errors
}

/// The report form for one person or message.
/// - GET `/report?id=&what={FarewellPerson|FarewellMessage}&referer=`
async fn report_form(
    State(config): State<AppConfig>,
    session: Session,
    Query(query): Query<ReportQuery>,
) -> Result<Json<ReportView>> {
    let target = ReportTarget::from_query(
        query.what.as_deref().unwrap_or_default(),
        query.id.as_deref().unwrap_or_default(),
    )
    .ok_or_else(|| Error::not_found("report target"))?;

    Ok(Json(ReportView {
        form_token: auth::form_token(&session).await?,
        id: target.id(),
        what: target.kind().label(),
        referer: safe_referer(query.referer.as_deref()),
        reasons: config.reports.reasons,
        values: ReportInput::default(),
        errors: ValidationErrors::new(),
    }))
}

/// File a report.
/// - POST `/report`
async fn submit(
    State(config): State<AppConfig>,
    State(db): State<Db>,
    session: Session,
    Form(form): Form<ReportForm>,
) -> Result<Response> {
    auth::verify_form_token(&session, form.form_token.as_deref()).await?;
    let target = ReportTarget::from_query(&form.what, &form.id)
        .ok_or_else(|| Error::bad_request(anyhow!("invalid report target")))?;

    let input = ReportInput {
        email: form.email.trim().to_owned(),
        reason: form.reason.trim().to_owned(),
        explanation: form.explanation,
    };
    let errors = validate(&input);
    if !errors.is_empty() {
        return Ok(unprocessable(ReportView {
            form_token: auth::form_token(&session).await?,
            id: target.id(),
            what: target.kind().label(),
            referer: safe_referer(form.referer.as_deref()),
            reasons: config.reports.reasons,
            values: input,
            errors,
        }));
    }

    let report = reports::insert(
        &db,
        &NewReport {
            email: input.email,
            reason: input.reason,
            explanation: input.explanation,
            target,
        },
        Utc::now(),
    )
    .await?;

    counter!(REPORTS_CREATED).increment(1);
    info!(report_id = %report.id, target = ?report.target, "content report filed");

    Ok(Redirect::to(&format!("/report/success?reportId={}", report.id)).into_response())
}

/// Confirmation page quoting the new report's id.
/// - GET `/report/success?reportId=`
async fn success(Query(query): Query<SuccessQuery>) -> Response {
    match query.report_id.filter(|id| !id.is_empty()) {
        Some(report_id) => Json(SuccessView { report_id }).into_response(),
        None => Redirect::to("/").into_response(),
    }
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/report", get(report_form).post(submit))
        .route("/report/success", get(success))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_referers_fall_back_to_home() {
        assert_eq!(safe_referer(Some("/ada")), "/ada");
        assert_eq!(safe_referer(Some("https://evil.example/")), "/");
        assert_eq!(safe_referer(Some("//evil.example")), "/");
        assert_eq!(safe_referer(None), "/");
    }

    #[test]
    fn email_and_reason_are_checked() {
        let errors = validate(&ReportInput {
            email: "not-an-address".to_owned(),
            reason: "x".repeat(101),
            explanation: None,
        });
        assert_eq!(errors.messages("email"), ["Invalid email address"]);
        assert_eq!(errors.messages("reason"), ["Reason cannot exceed 100 characters"]);

        let errors = validate(&ReportInput::default());
        assert_eq!(errors.messages("email"), ["Email is required"]);
        assert_eq!(errors.messages("reason"), ["Reason is required"]);
    }
}
