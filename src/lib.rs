//! FarewellMyBeloved: memorial pages, farewell messages and their moderation.
mod auth;
mod config;
mod dashboard;
mod db;
mod endpoints;
pub mod error;
mod metrics;
mod models;
mod moderation;
mod oauth;
mod serve;
mod slug;
mod storage;
mod validation;

pub(crate) use db::Db;
pub use error::Error;
pub(crate) use serve::{AppState, Result};
pub use serve::run;

/// The index (/) route.
async fn index() -> impl axum::response::IntoResponse {
    r"
   ___                         _ _
  / __\_ _ _ __ _____      __ | | |
 / _\/ _` | '__/ _ \ \ /\ / / | | |
/ / | (_| | | |  __/\ V  V /  | | |
\/   \__,_|_|  \___| \_/\_/   |_|_|


FarewellMyBeloved: memorial pages and farewell messages.

  Create a page:  /FarewellPerson/Create
  Messages:       /FarewellMessage
  Moderators:     /Admin
    "
}
