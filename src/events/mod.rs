//! Domain events and the notification collaborator
//!
//! Publishing is strictly best-effort: a failed publish is logged and
//! swallowed, it never fails the operation that produced the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AdjustmentReason, MemoryId, RetrievalId, TemporalLevel, TraceId};

/// Types of domain events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MemoryCreated,
    MemoryPromoted,
    RetrievalPerformed,
    DecisionTracked,
    OutcomeObserved,
    SalienceAdjusted,
}

/// A domain event broadcast to the notification collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Event type
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Owning user
    pub user_id: String,
    /// Related memory (if applicable)
    pub memory_id: Option<MemoryId>,
    /// Related trace (if applicable)
    pub trace_id: Option<TraceId>,
    /// Additional data
    pub data: Option<serde_json::Value>,
}

impl DomainEvent {
    pub fn memory_created(user_id: &str, memory_id: MemoryId, level: TemporalLevel) -> Self {
        Self {
            event_type: EventType::MemoryCreated,
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            memory_id: Some(memory_id),
            trace_id: None,
            data: Some(serde_json::json!({ "level": level.as_str() })),
        }
    }

    pub fn memory_promoted(
        user_id: &str,
        memory_id: MemoryId,
        from: TemporalLevel,
        to: TemporalLevel,
    ) -> Self {
        Self {
            event_type: EventType::MemoryPromoted,
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            memory_id: Some(memory_id),
            trace_id: None,
            data: Some(serde_json::json!({
                "from": from.as_str(),
                "to": to.as_str(),
            })),
        }
    }

    pub fn retrieval_performed(user_id: &str, retrieval_id: RetrievalId, returned: usize) -> Self {
        Self {
            event_type: EventType::RetrievalPerformed,
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            memory_id: None,
            trace_id: None,
            data: Some(serde_json::json!({
                "retrieval_id": retrieval_id,
                "returned": returned,
            })),
        }
    }

    pub fn decision_tracked(user_id: &str, trace_id: TraceId, memory_count: usize) -> Self {
        Self {
            event_type: EventType::DecisionTracked,
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            memory_id: None,
            trace_id: Some(trace_id),
            data: Some(serde_json::json!({ "memory_count": memory_count })),
        }
    }

    pub fn outcome_observed(
        user_id: &str,
        trace_id: TraceId,
        quality: f32,
        memories_updated: usize,
    ) -> Self {
        Self {
            event_type: EventType::OutcomeObserved,
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            memory_id: None,
            trace_id: Some(trace_id),
            data: Some(serde_json::json!({
                "quality": quality,
                "memories_updated": memories_updated,
            })),
        }
    }

    pub fn salience_adjusted(
        user_id: &str,
        memory_id: MemoryId,
        trace_id: TraceId,
        delta: f32,
        reason: AdjustmentReason,
    ) -> Self {
        Self {
            event_type: EventType::SalienceAdjusted,
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            memory_id: Some(memory_id),
            trace_id: Some(trace_id),
            data: Some(serde_json::json!({
                "delta": delta,
                "reason": reason.as_str(),
            })),
        }
    }
}

/// Why a publish attempt failed
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    #[error("no subscribers")]
    NoSubscribers,
    #[error("publish failed: {0}")]
    Failed(String),
}

/// Outbound event sink (fire-and-forget)
pub trait EventPublisher: Send + Sync {
    /// Attempt to publish; callers go through [`publish_best_effort`]
    fn publish(&self, event: DomainEvent) -> Result<(), PublishError>;
}

/// Publish and swallow failure with a log line
///
/// This is the only way core operations emit events; a broken notification
/// collaborator can never fail retrieval, tracking, or promotion.
pub fn publish_best_effort(publisher: &dyn EventPublisher, event: DomainEvent) {
    let event_type = event.event_type;
    if let Err(err) = publisher.publish(event) {
        tracing::warn!(?event_type, %err, "event publish failed, dropping");
    }
}

/// Publisher that drops every event (default for embedded use)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: DomainEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Publisher backed by a tokio broadcast channel
///
/// Subscribers that lag simply miss events; delivery guarantees belong to
/// the external bus, not to this in-process fan-out.
pub struct BroadcastPublisher {
    sender: tokio::sync::broadcast::Sender<DomainEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: DomainEvent) -> Result<(), PublishError> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|_| PublishError::NoSubscribers)
    }
}
