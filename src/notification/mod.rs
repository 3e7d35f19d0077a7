//! Notification dispatch engine.
//!
//! Built on the generic entity service: a notification request is deduped by
//! an optional idempotency key, its recipient set is resolved from account
//! and role criteria, the record is persisted (cache and CREATE beacon ride
//! along), and delivery is handed off to a push adapter best-effort.

mod recipients;
mod service;
mod types;

pub mod push;

pub use recipients::{MemoryUserDirectory, RecipientResolver, UserDirectory};
pub use service::NotificationService;
pub use types::{Notification, NotificationOutcome, NotificationRequest, Role, UserRef};
