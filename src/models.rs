//! Entities persisted by the application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Stored in an image column once a moderator has removed the picture.
pub const DELETED_IMAGE_SENTINEL: &str = "DELETED BY ADMIN";

pub const PERSON_NAME_MAX: usize = 200;
pub const PERSON_SLUG_MAX: usize = 200;
pub const PERSON_DESCRIPTION_MAX: usize = 5000;
pub const IMAGE_URL_MAX: usize = 500;
pub const EMAIL_MAX: usize = 255;
pub const MESSAGE_BODY_MAX: usize = 2000;
pub const AUTHOR_NAME_MAX: usize = 100;
pub const REPORT_REASON_MAX: usize = 100;
pub const LOG_REASON_MAX: usize = 200;

/// A memorial page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub portrait_url: Option<String>,
    pub background_url: Option<String>,
    pub email: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The moderator-editable fields of a [`Person`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonFields {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub portrait_url: Option<String>,
    pub background_url: Option<String>,
    pub email: Option<String>,
    pub is_public: bool,
}

impl Person {
    pub fn fields(&self) -> PersonFields {
        PersonFields {
            name: self.name.clone(),
            slug: self.slug.clone(),
            description: self.description.clone(),
            portrait_url: self.portrait_url.clone(),
            background_url: self.background_url.clone(),
            email: self.email.clone(),
            is_public: self.is_public,
        }
    }
}

/// A farewell note left on a person's page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Message {
    pub id: i64,
    pub person_id: i64,
    pub body: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

/// The moderator-editable fields of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFields {
    pub body: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub is_public: bool,
}

impl Message {
    pub fn fields(&self) -> MessageFields {
        MessageFields {
            body: self.body.clone(),
            author_name: self.author_name.clone(),
            author_email: self.author_email.clone(),
            is_public: self.is_public,
        }
    }
}

/// A message joined with the person it was left for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct MessageWithPerson {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub message: Message,
    pub person_name: String,
    pub person_slug: String,
}

/// What a content report points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id")]
pub enum ReportTarget {
    Person(i64),
    Message(i64),
}

impl ReportTarget {
    /// Parse the `what`/`id` pair used by the report form.
    pub fn from_query(what: &str, id: &str) -> Option<Self> {
        let id = id.trim().parse().ok()?;
        match TargetKind::from_label(what)? {
            TargetKind::Person => Some(Self::Person(id)),
            TargetKind::Message => Some(Self::Message(id)),
        }
    }

    pub fn kind(self) -> TargetKind {
        match self {
            Self::Person(_) => TargetKind::Person,
            Self::Message(_) => TargetKind::Message,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            Self::Person(id) | Self::Message(id) => id,
        }
    }

    pub(crate) fn person_id(self) -> Option<i64> {
        match self {
            Self::Person(id) => Some(id),
            Self::Message(_) => None,
        }
    }

    pub(crate) fn message_id(self) -> Option<i64> {
        match self {
            Self::Message(id) => Some(id),
            Self::Person(_) => None,
        }
    }
}

/// A visitor-submitted flag against a person or message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentReport {
    pub id: Uuid,
    pub email: String,
    pub reason: String,
    pub explanation: Option<String>,
    pub target: ReportTarget,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ContentReport {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    pub fn status(&self) -> &'static str {
        if self.is_resolved() {
            "Resolved"
        } else {
            "Pending"
        }
    }
}

/// The entity kinds a moderator can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    #[serde(rename = "FarewellPerson")]
    Person,
    #[serde(rename = "FarewellMessage")]
    Message,
}

impl TargetKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Person => "FarewellPerson",
            Self::Message => "FarewellMessage",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "FarewellPerson" => Some(Self::Person),
            "FarewellMessage" => Some(Self::Message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Edit,
    Delete,
}

impl ModerationAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

/// An append-only audit row for one moderation action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct ModeratorLog {
    pub id: Uuid,
    pub moderator_name: String,
    pub target_type: String,
    pub target_id: i64,
    pub action: String,
    pub reason: String,
    pub details: String,
    pub content_report_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_target_accepts_exactly_the_two_labels() {
        assert_eq!(
            ReportTarget::from_query("FarewellPerson", "4"),
            Some(ReportTarget::Person(4))
        );
        assert_eq!(
            ReportTarget::from_query("FarewellMessage", " 9 "),
            Some(ReportTarget::Message(9))
        );
        assert_eq!(ReportTarget::from_query("farewellperson", "4"), None);
        assert_eq!(ReportTarget::from_query("FarewellPerson", ""), None);
        assert_eq!(ReportTarget::from_query("Comment", "1"), None);
    }

    #[test]
    fn report_target_columns_are_mutually_exclusive() {
        let person = ReportTarget::Person(3);
        assert_eq!((person.person_id(), person.message_id()), (Some(3), None));

        let message = ReportTarget::Message(5);
        assert_eq!((message.person_id(), message.message_id()), (None, Some(5)));
    }
}
