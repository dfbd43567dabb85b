//! Domain events for notification delivery
//!
//! Emitted on competition start/end, registration and progress milestones.
//! Delivery is someone else's job: sinks only hand events over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

const BROADCAST_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CompetitionStarted,
    CompetitionEnded,
    RegistrationConfirmed,
    MilestoneReached,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompetitionStarted => "competition_started",
            Self::CompetitionEnded => "competition_ended",
            Self::RegistrationConfirmed => "registration_confirmed",
            Self::MilestoneReached => "milestone_reached",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub competition_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participation_id: Option<Uuid>,
    /// Template variables for the notification layer
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub emitted_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(kind: EventKind, competition_id: Uuid, emitted_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            competition_id,
            participation_id: None,
            variables: serde_json::Map::new(),
            emitted_at,
        }
    }

    pub fn participation(mut self, id: Uuid) -> Self {
        self.participation_id = Some(id);
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }
}

pub trait EventSink: Send + Sync {
    /// Must not block; failures stay inside the sink
    fn emit(&self, event: DomainEvent);
}

/// Fan-out to in-process subscribers; events are dropped when nobody listens
pub struct BroadcastSink {
    tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: DomainEvent) {
        let kind = event.kind.as_str();
        match self.tx.send(event) {
            Ok(subscribers) => debug!(event_type = kind, subscribers, "Event emitted"),
            Err(_) => debug!(event_type = kind, "Event emitted but no subscribers listening"),
        }
    }
}

/// Writes every event to the log
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: DomainEvent) {
        info!(
            event_type = event.kind.as_str(),
            competition = %event.competition_id,
            participation = ?event.participation_id,
            "{}",
            serde_json::Value::Object(event.variables)
        );
    }
}
