//! Notification orchestration.
//!
//! One request runs dedup check, recipient resolution, persistence, and push
//! handoff in that order. The persisted record is the durable source of
//! truth; delivery is best-effort and never retried here.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::entity::{EntityError, EntityService};
use crate::metrics::{
    DELIVERY_FAILED_TOTAL, NOTIFICATIONS_CREATED_TOTAL, NOTIFICATIONS_DEDUPED_TOTAL,
};
use crate::store::Filter;

use super::push::{DeliveryDescriptor, PushDelivery};
use super::recipients::RecipientResolver;
use super::types::{Notification, NotificationOutcome, NotificationRequest};

/// Creates and dispatches notifications.
pub struct NotificationService {
    entities: EntityService<Notification>,
    resolver: RecipientResolver,
    push: Option<Arc<dyn PushDelivery>>,
}

impl NotificationService {
    /// Create a service without a delivery adapter; notifications are
    /// persisted but not pushed.
    pub fn new(entities: EntityService<Notification>, resolver: RecipientResolver) -> Self {
        Self {
            entities,
            resolver,
            push: None,
        }
    }

    /// Attach a push delivery adapter.
    pub fn with_push(mut self, push: Arc<dyn PushDelivery>) -> Self {
        self.push = Some(push);
        self
    }

    /// The underlying entity service, for reads.
    pub fn entities(&self) -> &EntityService<Notification> {
        &self.entities
    }

    /// Process one notification request.
    ///
    /// With a dedup key, a prior notification bearing the same key
    /// short-circuits to [`NotificationOutcome::SkippedDuplicate`]: no
    /// recipients are re-resolved, no row is created, nothing is dispatched.
    /// The dedup check is not serialized against concurrent requests; two
    /// racing requests with the same key can both persist, which degrades to
    /// duplicate delivery, never lost delivery.
    pub async fn send(
        &self,
        request: NotificationRequest,
    ) -> Result<NotificationOutcome, EntityError> {
        if let Some(key) = &request.dedup_key {
            let filter = Filter::new().eq("dedup_key", json!(key));
            if let Some(existing) = self.entities.find_one(&filter).await? {
                NOTIFICATIONS_DEDUPED_TOTAL.inc();
                tracing::info!(
                    account_id = request.account_id,
                    dedup_key = %key,
                    notification_id = existing.id,
                    "Notification already sent, skipping"
                );
                return Ok(NotificationOutcome::SkippedDuplicate(existing));
            }
        }

        let recipients = self
            .resolver
            .resolve(request.account_id, request.roles.as_deref())
            .await?;

        let notification = self
            .entities
            .create(Notification {
                id: 0,
                account_id: request.account_id,
                recipients: recipients.iter().map(|u| u.user_id).collect(),
                subject: request.subject,
                markdown: request.markdown,
                dedup_key: request.dedup_key,
                created_at: Utc::now(),
            })
            .await?;

        NOTIFICATIONS_CREATED_TOTAL.inc();
        tracing::debug!(
            notification_id = notification.id,
            account_id = notification.account_id,
            recipients = notification.recipients.len(),
            "Notification persisted"
        );

        if let Some(push) = &self.push {
            let descriptor = DeliveryDescriptor::push_for_account(notification.account_id);
            if let Err(err) = push.deliver(descriptor).await {
                DELIVERY_FAILED_TOTAL.inc();
                tracing::warn!(
                    notification_id = notification.id,
                    account_id = notification.account_id,
                    error = %err,
                    "Push handoff failed, notification remains persisted"
                );
            }
        }

        Ok(NotificationOutcome::Created(notification))
    }
}
