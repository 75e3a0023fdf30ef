//! Cross-module scenarios: retrieve -> decide -> observe -> promote
//!
//! Runs the whole feedback loop over the in-memory backend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use mnemon::events::{BroadcastPublisher, EventPublisher, EventType};
use mnemon::promotion::PromotionEngine;
use mnemon::storage::{InMemoryStore, MemoryStore, TraceStore};
use mnemon::{
    ContentKind, CreateTraceInput, DecisionTracker, Memory, MnemonError, Outcome,
    RetrievalRequest, RetrievalService, TemporalLevel,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn trace_input_for(user: &str, scores: HashMap<uuid::Uuid, f32>) -> CreateTraceInput {
    CreateTraceInput {
        user_id: user.into(),
        session_id: "session-1".into(),
        retrieval_id: None,
        memory_scores: scores,
        decision_kind: "code_edit".into(),
        summary: "used remembered preference".into(),
        confidence: 0.9,
        alternatives_considered: 2,
    }
}

#[tokio::test]
async fn full_feedback_loop_adjusts_salience() {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let memory = Memory::new(
        "u1",
        "user prefers explicit error enums over anyhow in libraries",
        ContentKind::Preference,
        0.5,
    );
    store.insert_memory(memory.clone()).await.unwrap();

    let service = RetrievalService::new(store.clone());
    let tracker = DecisionTracker::new(store.clone(), store.clone());

    // retrieve: the memory is the only candidate and must rank first
    let result = service
        .retrieve(&RetrievalRequest::new("u1", "error enums in libraries"))
        .await
        .unwrap();
    assert_eq!(result.memories.len(), 1);
    assert_eq!(result.memories[0].memory.id, memory.id);
    assert_eq!(result.memories[0].rank, 1);
    assert!(result.memories[0].fused_score > 0.0);

    tracker.record_retrieval(&result).await.unwrap();

    // decide: snapshot the fused scores into a trace
    let trace = tracker
        .create_trace(CreateTraceInput {
            retrieval_id: Some(result.retrieval_id),
            ..trace_input_for("u1", result.score_map())
        })
        .await
        .unwrap();

    // observe: sole contributor, quality 0.8 -> delta exactly 0.08
    let record = tracker
        .record_outcome(Outcome::new(trace.id, 0.8, "tests_passed"))
        .await
        .unwrap();
    assert_eq!(record.memories_updated, 1);
    assert!((record.updates[0].delta - 0.08).abs() < 1e-6);

    let after = store.get_memory(memory.id).await.unwrap().unwrap();
    assert!((after.effective_salience() - 0.58).abs() < 1e-6);
    assert_eq!(after.positive_outcomes, 1);
    assert_eq!(after.retrieval_count, 1);
    assert_eq!(after.decision_count, 1);

    // a second outcome on the same trace is rejected and changes nothing
    let err = tracker
        .record_outcome(Outcome::new(trace.id, -1.0, "user_revert"))
        .await
        .unwrap_err();
    assert!(matches!(err, MnemonError::AlreadyObserved(_)));
    let unchanged = store.get_memory(memory.id).await.unwrap().unwrap();
    assert!((unchanged.effective_salience() - 0.58).abs() < 1e-6);
}

#[tokio::test]
async fn concurrent_outcomes_have_exactly_one_winner() {
    let store = Arc::new(InMemoryStore::new());
    let memory = Memory::new("u1", "x", ContentKind::Fact, 0.5);
    store.insert_memory(memory.clone()).await.unwrap();

    let tracker = Arc::new(DecisionTracker::new(store.clone(), store.clone()));
    let trace = tracker
        .create_trace(trace_input_for("u1", HashMap::from([(memory.id, 1.0)])))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let tracker = tracker.clone();
        let trace_id = trace.id;
        handles.push(tokio::spawn(async move {
            tracker
                .record_outcome(Outcome::new(trace_id, 0.5, format!("signal-{}", i)))
                .await
        }));
    }

    let mut winners = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(MnemonError::AlreadyObserved(_)) => already += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(already, 9);

    // exactly one outcome's delta landed
    let after = store.get_memory(memory.id).await.unwrap().unwrap();
    assert!((after.outcome_adjustment - 0.05).abs() < 1e-6);
}

#[tokio::test]
async fn sustained_evidence_promotes_through_tiers() {
    let store = Arc::new(InMemoryStore::new());
    let mut memory = Memory::new("u1", "always run fmt before commit", ContentKind::Fact, 0.6);
    memory.created_at = Utc::now() - Duration::hours(30);
    memory.valid_from = memory.created_at;
    store.insert_memory(memory.clone()).await.unwrap();

    let tracker = DecisionTracker::new(store.clone(), store.clone());

    // three retrieval-decision-outcome rounds, all positive
    for _ in 0..3 {
        store.record_retrieval(&[memory.id]).await.unwrap();
        let trace = tracker
            .create_trace(trace_input_for("u1", HashMap::from([(memory.id, 1.0)])))
            .await
            .unwrap();
        tracker
            .record_outcome(Outcome::new(trace.id, 1.0, "tests_passed"))
            .await
            .unwrap();
    }

    let engine = PromotionEngine::new(store.clone());
    let report = engine.run("u1").await.unwrap();
    assert_eq!(report.promoted.len(), 1);
    assert_eq!(report.promoted[0].from, TemporalLevel::Immediate);
    assert_eq!(report.promoted[0].to, TemporalLevel::Situational);

    // a second run finds nothing new: the memory is too young for the next
    // tier and the first promotion does not repeat
    let again = engine.run("u1").await.unwrap();
    assert!(again.promoted.is_empty());
    let after = store.get_memory(memory.id).await.unwrap().unwrap();
    assert_eq!(after.level, TemporalLevel::Situational);
}

#[tokio::test]
async fn events_flow_through_the_loop() {
    let store = Arc::new(InMemoryStore::new());
    let publisher = Arc::new(BroadcastPublisher::new(64));
    let mut rx = publisher.subscribe();

    let memory = Memory::new("u1", "uses just for task running", ContentKind::Fact, 0.5);
    store.insert_memory(memory.clone()).await.unwrap();

    let service = RetrievalService::new(store.clone())
        .with_events(publisher.clone() as Arc<dyn EventPublisher>);
    let tracker = DecisionTracker::new(store.clone(), store.clone())
        .with_events(publisher.clone() as Arc<dyn EventPublisher>);

    let result = service
        .retrieve(&RetrievalRequest::new("u1", "task running just"))
        .await
        .unwrap();
    let trace = tracker
        .create_trace(trace_input_for("u1", result.score_map()))
        .await
        .unwrap();
    tracker
        .record_outcome(Outcome::new(trace.id, 0.6, "accepted"))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event.event_type);
    }
    assert_eq!(
        seen,
        vec![
            EventType::RetrievalPerformed,
            EventType::DecisionTracked,
            EventType::SalienceAdjusted,
            EventType::OutcomeObserved,
        ]
    );
}

#[tokio::test]
async fn pending_traces_lists_unobserved_only() {
    let store = Arc::new(InMemoryStore::new());
    let memory = Memory::new("u1", "x", ContentKind::Fact, 0.5);
    store.insert_memory(memory.clone()).await.unwrap();

    let tracker = DecisionTracker::new(store.clone(), store.clone());
    let open = tracker
        .create_trace(trace_input_for("u1", HashMap::from([(memory.id, 1.0)])))
        .await
        .unwrap();
    let closed = tracker
        .create_trace(trace_input_for("u1", HashMap::from([(memory.id, 1.0)])))
        .await
        .unwrap();
    tracker
        .record_outcome(Outcome::new(closed.id, 0.4, "accepted"))
        .await
        .unwrap();

    let pending = tracker.pending_traces("u1", 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, open.id);

    // the observed trace kept its attribution snapshot
    let stored = store.get_trace(closed.id).await.unwrap().unwrap();
    assert!(stored.outcome_observed);
    assert_eq!(stored.attributions.len(), 1);
}
