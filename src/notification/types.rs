use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Entity;

/// Account-scoped user roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Member,
    Viewer,
}

/// Reference to a user, resolved by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub user_id: i64,
    pub email: String,
}

/// A persisted notification.
///
/// Immutable after creation; recipients are stored as user identifiers
/// (relation by id, no embedded back-references). Delivery status lives with
/// the push adapter, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub account_id: i64,
    /// Recipient user ids, deduplicated before persistence
    pub recipients: Vec<i64>,
    pub subject: String,
    /// Body, markdown formatted
    pub markdown: String,
    /// Caller-supplied idempotency key
    pub dedup_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Notification {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

/// A request to create and dispatch a notification.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub account_id: i64,
    pub subject: String,
    pub markdown: String,
    /// Restrict recipients to these roles; absent matches any role
    pub roles: Option<Vec<Role>>,
    /// Idempotency key; a prior notification with the same key short-circuits
    pub dedup_key: Option<String>,
}

impl NotificationRequest {
    pub fn new(account_id: i64, subject: impl Into<String>, markdown: impl Into<String>) -> Self {
        Self {
            account_id,
            subject: subject.into(),
            markdown: markdown.into(),
            roles: None,
            dedup_key: None,
        }
    }

    pub fn roles(mut self, roles: Vec<Role>) -> Self {
        self.roles = Some(roles);
        self
    }

    pub fn dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}

/// Terminal states of a notification request.
#[derive(Debug, Clone)]
pub enum NotificationOutcome {
    /// A new notification was persisted and handed to delivery
    Created(Notification),
    /// A prior notification with the same dedup key already exists; nothing
    /// was created or dispatched. Not an error.
    SkippedDuplicate(Notification),
}

impl NotificationOutcome {
    /// The persisted record, whichever way the request terminated.
    pub fn notification(&self) -> &Notification {
        match self {
            NotificationOutcome::Created(n) => n,
            NotificationOutcome::SkippedDuplicate(n) => n,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, NotificationOutcome::SkippedDuplicate(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = NotificationRequest::new(7, "Invoice paid", "**Paid.**")
            .roles(vec![Role::Owner, Role::Admin])
            .dedup_key("invoice-42-paid");

        assert_eq!(request.account_id, 7);
        assert_eq!(request.roles.as_deref(), Some(&[Role::Owner, Role::Admin][..]));
        assert_eq!(request.dedup_key.as_deref(), Some("invoice-42-paid"));
    }

    #[test]
    fn test_role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Owner).unwrap(), "\"owner\"");
    }

    #[test]
    fn test_notification_field_access_for_caching() {
        let notification = Notification {
            id: 3,
            account_id: 7,
            recipients: vec![1, 2],
            subject: "s".into(),
            markdown: "m".into(),
            dedup_key: Some("k".into()),
            created_at: Utc::now(),
        };

        assert_eq!(
            notification.field_value("dedup_key"),
            Some(serde_json::json!("k"))
        );
        assert_eq!(
            notification.field_value("account_id"),
            Some(serde_json::json!(7))
        );
    }
}
