//! Push delivery adapter boundary.
//!
//! The notification service hands a delivery descriptor to a [`PushDelivery`]
//! implementation and moves on: transport, retries, and delivery status are
//! the adapter's responsibility. Delivery failures never roll back the
//! persisted notification.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::RedisConfig;

/// Errors that can occur during push delivery.
///
/// Never surfaced to notification callers; logged and absorbed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport unavailable
    #[error("Delivery transport unavailable: {0}")]
    Unavailable(String),
}

/// Delivery methods requested for a descriptor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DeliveryMethods {
    pub push: bool,
}

/// What the notification service hands to the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryDescriptor {
    pub methods: DeliveryMethods,
    /// Target channel, derived from the account id
    pub channel: String,
}

impl DeliveryDescriptor {
    /// Push descriptor on the account's notification channel.
    pub fn push_for_account(account_id: i64) -> Self {
        Self {
            methods: DeliveryMethods { push: true },
            channel: format!("account_{}_beacon_notification", account_id),
        }
    }
}

/// Adapter trait for the downstream delivery transport.
#[async_trait]
pub trait PushDelivery: Send + Sync {
    async fn deliver(&self, descriptor: DeliveryDescriptor) -> Result<(), DeliveryError>;
}

/// In-memory delivery adapter that records descriptors.
#[derive(Default)]
pub struct MemoryPushDelivery {
    delivered: Mutex<Vec<DeliveryDescriptor>>,
}

impl MemoryPushDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptors handed off so far, in order.
    pub async fn delivered(&self) -> Vec<DeliveryDescriptor> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl PushDelivery for MemoryPushDelivery {
    async fn deliver(&self, descriptor: DeliveryDescriptor) -> Result<(), DeliveryError> {
        self.delivered.lock().await.push(descriptor);
        Ok(())
    }
}

/// Redis pub/sub delivery adapter.
///
/// Publishes the descriptor on its channel; a gateway subscribed to
/// `account_*_beacon_notification` channels carries it the rest of the way.
pub struct RedisPushDelivery {
    connection: ConnectionManager,
}

impl RedisPushDelivery {
    pub async fn connect(config: &RedisConfig) -> Result<Self, DeliveryError> {
        let client = Client::open(config.url.as_str())?;
        let connection = ConnectionManager::new(client).await?;

        tracing::info!(url = %config.url, "Redis push delivery connected");

        Ok(Self { connection })
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl PushDelivery for RedisPushDelivery {
    async fn deliver(&self, descriptor: DeliveryDescriptor) -> Result<(), DeliveryError> {
        let message = serde_json::to_string(&descriptor)?;
        let mut conn = self.connection.clone();
        let receivers: i64 = conn.publish(&descriptor.channel, message).await?;

        tracing::debug!(
            channel = %descriptor.channel,
            receivers = receivers,
            "Delivery descriptor published"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_channel_shape() {
        let descriptor = DeliveryDescriptor::push_for_account(42);
        assert!(descriptor.methods.push);
        assert_eq!(descriptor.channel, "account_42_beacon_notification");
    }

    #[tokio::test]
    async fn test_memory_delivery_records() {
        let delivery = MemoryPushDelivery::new();
        delivery
            .deliver(DeliveryDescriptor::push_for_account(1))
            .await
            .unwrap();
        delivery
            .deliver(DeliveryDescriptor::push_for_account(2))
            .await
            .unwrap();

        let delivered = delivery.delivered().await;
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[1].channel, "account_2_beacon_notification");
    }
}
