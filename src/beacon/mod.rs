//! Beacon eventing for entity mutations.
//!
//! A beacon is the outbound event raised after a mutation commits: the store
//! write happens first, then the cache update, then the beacon. Emission is
//! fire-and-forget from the entity service's perspective; a bus outage never
//! fails a database write that already succeeded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::RedisConfig;

/// Errors that can occur during beacon emission.
///
/// Never surfaced to mutation callers; the entity service logs and absorbs.
#[derive(Debug, Error)]
pub enum EmissionError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Event bus unavailable
    #[error("Event bus unavailable: {0}")]
    Unavailable(String),
}

/// Entity mutation kinds carried by a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityAction {
    Create,
    Update,
    Delete,
    /// Request subscribers to re-read, without a specific mutation
    Reload,
}

impl EntityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityAction::Create => "CREATE",
            EntityAction::Update => "UPDATE",
            EntityAction::Delete => "DELETE",
            EntityAction::Reload => "RELOAD",
        }
    }
}

/// Payload published for one entity mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconPayload {
    /// Unique identifier for this emission
    pub event_id: Uuid,
    /// When the beacon was emitted
    pub emitted_at: DateTime<Utc>,
    pub action: EntityAction,
    /// Snapshot of the mutated record
    pub data: serde_json::Value,
}

impl BeaconPayload {
    /// Build a payload from a mutated record.
    pub fn new<T: Serialize>(action: EntityAction, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            emitted_at: Utc::now(),
            action,
            data: serde_json::to_value(data)?,
        })
    }
}

/// Emitter trait for the beacon event bus.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one emitter is shared across every
/// service instance configured with it.
#[async_trait]
pub trait BeaconEmitter: Send + Sync {
    /// Publish a payload under an event name.
    async fn publish(&self, event_name: &str, payload: BeaconPayload) -> Result<(), EmissionError>;
}

/// In-memory emitter that records published events.
///
/// Useful in tests and single-process deployments where subscribers poll the
/// recorded stream instead of a bus.
#[derive(Default)]
pub struct MemoryBeaconEmitter {
    events: DashMap<String, Vec<BeaconPayload>>,
}

impl MemoryBeaconEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far under an event name, in emission order.
    pub fn events_for(&self, event_name: &str) -> Vec<BeaconPayload> {
        self.events
            .get(event_name)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Total events across all names.
    pub fn total_events(&self) -> usize {
        self.events.iter().map(|e| e.len()).sum()
    }
}

#[async_trait]
impl BeaconEmitter for MemoryBeaconEmitter {
    async fn publish(&self, event_name: &str, payload: BeaconPayload) -> Result<(), EmissionError> {
        self.events
            .entry(event_name.to_string())
            .or_default()
            .push(payload);
        Ok(())
    }
}

/// Redis pub/sub emitter.
///
/// Publishes the JSON payload on a channel named after the event, the same
/// channel shape downstream trigger listeners subscribe to.
pub struct RedisBeaconEmitter {
    connection: ConnectionManager,
}

impl RedisBeaconEmitter {
    pub async fn connect(config: &RedisConfig) -> Result<Self, EmissionError> {
        let client = Client::open(config.url.as_str())?;
        let connection = ConnectionManager::new(client).await?;

        tracing::info!(url = %config.url, "Redis beacon emitter connected");

        Ok(Self { connection })
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl BeaconEmitter for RedisBeaconEmitter {
    async fn publish(&self, event_name: &str, payload: BeaconPayload) -> Result<(), EmissionError> {
        let message = serde_json::to_string(&payload)?;
        let mut conn = self.connection.clone();
        let receivers: i64 = conn.publish(event_name, message).await?;

        tracing::debug!(
            event = %event_name,
            event_id = %payload.event_id,
            action = %payload.action.as_str(),
            receivers = receivers,
            "Beacon published"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_emitter_records_in_order() {
        let emitter = MemoryBeaconEmitter::new();

        let first = BeaconPayload::new(EntityAction::Create, &json!({"id": 1})).unwrap();
        let second = BeaconPayload::new(EntityAction::Update, &json!({"id": 1})).unwrap();
        emitter.publish("contacts_1", first).await.unwrap();
        emitter.publish("contacts_1", second).await.unwrap();

        let events = emitter.events_for("contacts_1");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, EntityAction::Create);
        assert_eq!(events[1].action, EntityAction::Update);
        assert_eq!(emitter.total_events(), 2);
    }

    #[test]
    fn test_payload_snapshot() {
        let payload = BeaconPayload::new(EntityAction::Delete, &json!({"id": 5})).unwrap();
        assert_eq!(payload.action, EntityAction::Delete);
        assert_eq!(payload.data, json!({"id": 5}));
        assert!(!payload.event_id.is_nil());
    }

    #[test]
    fn test_action_serializes_screaming_snake() {
        let rendered = serde_json::to_string(&EntityAction::Create).unwrap();
        assert_eq!(rendered, "\"CREATE\"");
    }
}
