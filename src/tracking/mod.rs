//! Decision & outcome tracking
//!
//! A decision trace pins the exact memories (and their scores as retrieved)
//! behind one decision. When the outcome of that decision is observed, each
//! contributing memory receives a salience delta proportional to its share
//! of the trace's score mass, so memories that back good decisions surface
//! more in future fusions and memories that back bad ones fade.
//!
//! The tracker is stateless between calls; the Created -> OutcomeObserved
//! transition is a compare-and-set at the trace store, and the tracker is
//! the single owner of all usage counters on memories.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{MnemonError, Result};
use crate::events::{publish_best_effort, DomainEvent, EventPublisher, NoopPublisher};
use crate::retrieval::RetrievalResult;
use crate::storage::{MemoryStore, TraceStore};
use crate::types::{
    AdjustmentReason, CreateTraceInput, DecisionTrace, MemoryId, Outcome, SalienceUpdate,
};

/// Configuration for outcome attribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Maximum absolute salience delta one outcome can apply to one memory
    ///
    /// `delta = quality x contribution x cap`; with quality and contribution
    /// both at most 1 in magnitude, no single event can move a memory's
    /// salience by more than this.
    pub outcome_delta_cap: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            outcome_delta_cap: 0.1,
        }
    }
}

/// What one recorded outcome did
#[derive(Debug, Clone)]
pub struct OutcomeRecord {
    /// The trace in its terminal OutcomeObserved state
    pub trace: DecisionTrace,
    /// Salience deltas applied, one per contributing memory
    pub updates: Vec<SalienceUpdate>,
    /// How many memories were actually updated
    pub memories_updated: usize,
    /// Attributed memories whose delta could not be applied, with the error
    /// text; the trace's `attributions` map holds the full attempted set
    pub failed: Vec<(MemoryId, String)>,
}

/// Contribution fraction per memory: `score_i / sum(scores)`
///
/// An all-zero (or empty) snapshot attributes nothing; there is no
/// divide-by-zero path.
pub fn compute_attributions(scores: &HashMap<MemoryId, f32>) -> HashMap<MemoryId, f32> {
    let total: f32 = scores.values().sum();
    if total <= 0.0 {
        return HashMap::new();
    }
    scores
        .iter()
        .map(|(id, score)| (*id, score / total))
        .collect()
}

/// The decision & outcome tracker
pub struct DecisionTracker {
    memories: Arc<dyn MemoryStore>,
    traces: Arc<dyn TraceStore>,
    events: Arc<dyn EventPublisher>,
    config: TrackerConfig,
}

impl DecisionTracker {
    pub fn new(memories: Arc<dyn MemoryStore>, traces: Arc<dyn TraceStore>) -> Self {
        Self {
            memories,
            traces,
            events: Arc::new(NoopPublisher),
            config: TrackerConfig::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Note that a retrieval surfaced these memories
    ///
    /// Bumps `retrieval_count`; the retrieval service itself never touches
    /// counters so they have exactly one owner.
    pub async fn record_retrieval(&self, result: &RetrievalResult) -> Result<usize> {
        self.memories.record_retrieval(&result.memory_ids()).await
    }

    /// Persist a new trace in the Created state
    pub async fn create_trace(&self, input: CreateTraceInput) -> Result<DecisionTrace> {
        input.validate()?;
        let trace = DecisionTrace::from_input(input);
        self.traces.insert_trace(trace.clone()).await?;

        let mut ids: Vec<MemoryId> = trace.memory_scores.keys().copied().collect();
        ids.sort();
        self.memories.record_decision(&ids).await?;

        tracing::debug!(
            trace_id = %trace.id,
            user_id = %trace.user_id,
            memories = ids.len(),
            kind = %trace.decision_kind,
            "decision trace created"
        );
        publish_best_effort(
            self.events.as_ref(),
            DomainEvent::decision_tracked(&trace.user_id, trace.id, ids.len()),
        );
        Ok(trace)
    }

    /// Record the observed outcome for a trace, exactly once
    ///
    /// Attribution is computed from the trace's immutable score snapshot and
    /// the terminal transition is a single-winner compare-and-set; a second
    /// call (concurrent or later) gets `AlreadyObserved` and changes nothing.
    ///
    /// The trace turns terminal before the salience deltas land, and the
    /// CAS makes a retry of the whole operation impossible, so a storage
    /// failure on one memory does not abort the rest: every attributed
    /// memory is attempted and failures are reported in
    /// [`OutcomeRecord::failed`] for the caller to reconcile against the
    /// trace's attribution map.
    pub async fn record_outcome(&self, outcome: Outcome) -> Result<OutcomeRecord> {
        outcome.validate()?;

        let trace = self
            .traces
            .get_trace(outcome.trace_id)
            .await?
            .ok_or(MnemonError::TraceNotFound(outcome.trace_id))?;
        if trace.outcome_observed {
            return Err(MnemonError::AlreadyObserved(trace.id));
        }

        // The snapshot is frozen at trace creation, so computing before the
        // CAS cannot attribute against stale scores.
        let attributions = compute_attributions(&trace.memory_scores);
        let observed = self.traces.complete_outcome(&outcome, &attributions).await?;

        let mut ordered: Vec<(MemoryId, f32)> =
            attributions.iter().map(|(id, c)| (*id, *c)).collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));

        let mut updates = Vec::new();
        let mut failed = Vec::new();
        for (memory_id, contribution) in ordered {
            let delta = outcome.quality * contribution * self.config.outcome_delta_cap;
            if delta == 0.0 {
                continue;
            }
            let update = SalienceUpdate {
                memory_id,
                trace_id: trace.id,
                delta,
                reason: if delta > 0.0 {
                    AdjustmentReason::PositiveOutcome
                } else {
                    AdjustmentReason::NegativeOutcome
                },
            };
            match self.memories.apply_salience_update(&update).await {
                Ok(_) => {
                    publish_best_effort(
                        self.events.as_ref(),
                        DomainEvent::salience_adjusted(
                            &trace.user_id,
                            memory_id,
                            trace.id,
                            delta,
                            update.reason,
                        ),
                    );
                    updates.push(update);
                }
                // a memory deleted since the decision shouldn't sink the rest
                Err(MnemonError::MemoryNotFound(_)) => {
                    tracing::warn!(%memory_id, trace_id = %trace.id, "attributed memory missing, skipping");
                }
                Err(err) => {
                    tracing::warn!(%memory_id, trace_id = %trace.id, %err, "salience update failed, continuing");
                    failed.push((memory_id, err.to_string()));
                }
            }
        }

        tracing::info!(
            trace_id = %trace.id,
            quality = outcome.quality,
            signal = %outcome.signal,
            memories_updated = updates.len(),
            "outcome recorded"
        );
        publish_best_effort(
            self.events.as_ref(),
            DomainEvent::outcome_observed(
                &trace.user_id,
                trace.id,
                outcome.quality,
                updates.len(),
            ),
        );

        Ok(OutcomeRecord {
            memories_updated: updates.len(),
            trace: observed,
            updates,
            failed,
        })
    }

    /// Traces still waiting for an outcome, oldest first
    pub async fn pending_traces(&self, user_id: &str, limit: usize) -> Result<Vec<DecisionTrace>> {
        self.traces.list_pending(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::types::{ContentKind, Memory};
    use uuid::Uuid;

    fn tracker_over(store: Arc<InMemoryStore>) -> DecisionTracker {
        DecisionTracker::new(store.clone(), store)
    }

    fn trace_input(scores: HashMap<MemoryId, f32>) -> CreateTraceInput {
        CreateTraceInput {
            user_id: "u1".into(),
            session_id: "s1".into(),
            retrieval_id: None,
            memory_scores: scores,
            decision_kind: "code_edit".into(),
            summary: "applied suggested refactor".into(),
            confidence: 0.8,
            alternatives_considered: 1,
        }
    }

    #[test]
    fn test_attribution_splits_proportionally() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let scores = HashMap::from([(a, 0.9), (b, 0.3)]);
        let attributions = compute_attributions(&scores);
        assert!((attributions[&a] - 0.75).abs() < 1e-6);
        assert!((attributions[&b] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_zero_score_snapshot_attributes_nothing() {
        let scores = HashMap::from([(Uuid::new_v4(), 0.0), (Uuid::new_v4(), 0.0)]);
        assert!(compute_attributions(&scores).is_empty());
        assert!(compute_attributions(&HashMap::new()).is_empty());
    }

    #[tokio::test]
    async fn test_outcome_applies_bounded_deltas() {
        let store = Arc::new(InMemoryStore::new());
        let a = Memory::new("u1", "memory a", ContentKind::Fact, 0.5);
        let b = Memory::new("u1", "memory b", ContentKind::Fact, 0.5);
        store.insert_memory(a.clone()).await.unwrap();
        store.insert_memory(b.clone()).await.unwrap();

        let tracker = tracker_over(store.clone());
        let trace = tracker
            .create_trace(trace_input(HashMap::from([(a.id, 0.9), (b.id, 0.3)])))
            .await
            .unwrap();

        let record = tracker
            .record_outcome(Outcome::new(trace.id, 0.5, "tests_passed"))
            .await
            .unwrap();
        assert_eq!(record.memories_updated, 2);

        let a_after = store.get_memory(a.id).await.unwrap().unwrap();
        let b_after = store.get_memory(b.id).await.unwrap().unwrap();
        // delta(a) = 0.5 * 0.75 * 0.1, delta(b) = 0.5 * 0.25 * 0.1
        assert!((a_after.outcome_adjustment - 0.0375).abs() < 1e-6);
        assert!((b_after.outcome_adjustment - 0.0125).abs() < 1e-6);
        assert_eq!(a_after.positive_outcomes, 1);
        assert_eq!(a_after.decision_count, 1);
    }

    #[tokio::test]
    async fn test_single_contributor_delta_is_exactly_cap() {
        let store = Arc::new(InMemoryStore::new());
        let m = Memory::new("u1", "only contributor", ContentKind::Fact, 0.5);
        store.insert_memory(m.clone()).await.unwrap();

        let tracker = tracker_over(store.clone());
        let trace = tracker
            .create_trace(trace_input(HashMap::from([(m.id, 0.42)])))
            .await
            .unwrap();
        let record = tracker
            .record_outcome(Outcome::new(trace.id, 1.0, "explicit_praise"))
            .await
            .unwrap();
        assert!((record.updates[0].delta - 0.1).abs() < 1e-7);

        // negative direction mirrors exactly
        let trace2 = tracker
            .create_trace(trace_input(HashMap::from([(m.id, 0.42)])))
            .await
            .unwrap();
        let record2 = tracker
            .record_outcome(Outcome::new(trace2.id, -1.0, "user_revert"))
            .await
            .unwrap();
        assert!((record2.updates[0].delta + 0.1).abs() < 1e-7);
    }

    #[tokio::test]
    async fn test_second_outcome_rejected_and_unchanged() {
        let store = Arc::new(InMemoryStore::new());
        let m = Memory::new("u1", "m", ContentKind::Fact, 0.5);
        store.insert_memory(m.clone()).await.unwrap();

        let tracker = tracker_over(store.clone());
        let trace = tracker
            .create_trace(trace_input(HashMap::from([(m.id, 1.0)])))
            .await
            .unwrap();
        tracker
            .record_outcome(Outcome::new(trace.id, 0.8, "tests_passed"))
            .await
            .unwrap();

        let err = tracker
            .record_outcome(Outcome::new(trace.id, -1.0, "user_revert"))
            .await
            .unwrap_err();
        assert!(matches!(err, MnemonError::AlreadyObserved(_)));

        let stored = tracker.traces.get_trace(trace.id).await.unwrap().unwrap();
        assert_eq!(stored.outcome_quality, Some(0.8));
        assert_eq!(stored.outcome_signal.as_deref(), Some("tests_passed"));
    }

    #[tokio::test]
    async fn test_unknown_trace_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = tracker_over(store);
        let err = tracker
            .record_outcome(Outcome::new(Uuid::new_v4(), 0.5, "signal"))
            .await
            .unwrap_err();
        assert!(matches!(err, MnemonError::TraceNotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_quality_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = tracker_over(store);
        let err = tracker
            .record_outcome(Outcome::new(Uuid::new_v4(), 2.0, "signal"))
            .await
            .unwrap_err();
        assert!(matches!(err, MnemonError::Validation(_)));
    }
}
