//! Metric name constants.

use std::time::Duration;

use anyhow::Context;
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config;

pub const AUTH_FAILED: &str = "farewell.auth.failed"; // Counter.
pub const AUTH_DENIED: &str = "farewell.auth.denied"; // Counter.

pub const PEOPLE_CREATED: &str = "farewell.people.created"; // Counter.
pub const MESSAGES_CREATED: &str = "farewell.messages.created"; // Counter.
pub const REPORTS_CREATED: &str = "farewell.reports.created"; // Counter.

pub const MODERATION_EDIT: &str = "farewell.moderation.edit"; // Counter.
pub const MODERATION_DELETE: &str = "farewell.moderation.delete"; // Counter.

pub const STORAGE_CLEANUP_FAILED: &str = "farewell.storage.cleanup_failed"; // Counter.

/// Must be ran exactly once on startup. This will declare all of the instruments for `metrics`.
pub fn setup(config: Option<&config::MetricConfig>) -> anyhow::Result<()> {
    describe_counter!(AUTH_FAILED, "The number of failed moderator login attempts.");
    describe_counter!(
        AUTH_DENIED,
        "Authenticated identities rejected by the moderator allow-list."
    );

    describe_counter!(PEOPLE_CREATED, "The count of memorial pages created.");
    describe_counter!(MESSAGES_CREATED, "The count of farewell messages posted.");
    describe_counter!(REPORTS_CREATED, "The count of content reports submitted.");

    describe_counter!(MODERATION_EDIT, "The count of moderator edits.");
    describe_counter!(MODERATION_DELETE, "The count of moderator deletions.");

    describe_counter!(
        STORAGE_CLEANUP_FAILED,
        "Object-storage deletions that failed and left an orphaned object."
    );

    if let Some(config) = config {
        match config {
            config::MetricConfig::PrometheusPush(prometheus_config) => {
                PrometheusBuilder::new()
                    .with_push_gateway(
                        prometheus_config.url.clone(),
                        Duration::from_secs(10),
                        None,
                        None,
                    )
                    .context("failed to set up push gateway")?
                    .install()
                    .context("failed to install metrics exporter")?;
            }
        }
    }

    Ok(())
}
