//! Field-level validation for submitted forms.
//!
//! Failures are collected per field so the form can be redisplayed with every
//! message at once and the submitted values intact.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

/// Key for messages that belong to the form as a whole.
pub const FORM: &str = "";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[error("{} field(s) failed validation", .fields.len())]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single failure on one field.
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_owned())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.fields.get(field).map_or(&[], Vec::as_slice)
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }

    /// Reject blank (empty or whitespace-only) values.
    pub fn required(&mut self, field: &str, value: Option<&str>, message: &str) {
        if value.is_none_or(|v| v.trim().is_empty()) {
            self.add(field, message);
        }
    }

    /// Reject values longer than `max` characters.
    pub fn max_len(&mut self, field: &str, value: Option<&str>, max: usize, message: &str) {
        if value.is_some_and(|v| v.chars().count() > max) {
            self.add(field, message);
        }
    }

    /// Reject values that are present but not an email address.
    pub fn email(&mut self, field: &str, value: Option<&str>, message: &str) {
        if value.is_some_and(|v| !is_email(v)) {
            self.add(field, message);
        }
    }
}

/// A loose address check: a non-empty local part before a single `@` and a
/// dotted domain, without whitespace.
pub fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split('.')
            .collect::<Vec<_>>()
            .split_first()
            .is_some_and(|(first, rest)| {
                !first.is_empty() && !rest.is_empty() && rest.iter().all(|p| !p.is_empty())
            })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(is_email("a@example.com"));
        assert!(is_email("first.last+tag@sub.example.org"));
        assert!(!is_email("example.com"));
        assert!(!is_email("@example.com"));
        assert!(!is_email("a@localhost"));
        assert!(!is_email("a@@example.com"));
        assert!(!is_email("a b@example.com"));
        assert!(!is_email("a@example."));
    }

    #[test]
    fn blank_values_fail_required() {
        let mut errors = ValidationErrors::new();
        errors.required("name", Some("   "), "Name is required");
        errors.required("description", None, "Description is required");
        errors.required("email", Some("x"), "unused");

        assert!(errors.has("name"));
        assert!(errors.has("description"));
        assert!(!errors.has("email"));
        assert_eq!(errors.messages("name"), ["Name is required"]);
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let mut errors = ValidationErrors::new();
        errors.max_len("name", Some("ééé"), 3, "too long");
        assert!(errors.is_empty());

        errors.max_len("name", Some("éééé"), 3, "too long");
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn serializes_as_a_field_map() {
        let errors = ValidationErrors::single(FORM, "Something went wrong");
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json, serde_json::json!({ "": ["Something went wrong"] }));
    }
}
