//! In-memory reference backend
//!
//! Implements both store traits over `dashmap`. Entry-level exclusivity
//! gives the atomicity the traits demand: salience increments and the trace
//! compare-and-set happen under each entry's own lock. Used by the test
//! suite and by embedded deployments that don't need durability.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::embedding::cosine_similarity;
use crate::error::{MnemonError, Result};
use crate::storage::{MemoryFilter, MemoryStore, PromotionApplied, TraceStore};
use crate::types::{
    DecisionTrace, Memory, MemoryId, Outcome, SalienceUpdate, TemporalLevel, TraceId,
};

/// In-memory store for memories, embeddings, and decision traces
#[derive(Default)]
pub struct InMemoryStore {
    memories: DashMap<MemoryId, Memory>,
    embeddings: DashMap<MemoryId, Vec<f32>>,
    traces: DashMap<TraceId, DecisionTrace>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored memories
    pub fn memory_count(&self) -> usize {
        self.memories.len()
    }

    /// Number of stored traces
    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }

    fn filtered(&self, filter: &MemoryFilter) -> Vec<Memory> {
        self.memories
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 1)
            .map(String::from)
            .collect()
    }

    /// Token-overlap relevance: fraction of query terms present, weighted by
    /// in-document term frequency. Stands in for the FTS engine a durable
    /// backend would use.
    fn keyword_relevance(query_terms: &[String], content: &str) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let doc_terms = Self::tokenize(content);
        if doc_terms.is_empty() {
            return 0.0;
        }
        let mut tf: HashMap<&str, f32> = HashMap::new();
        for term in &doc_terms {
            *tf.entry(term.as_str()).or_insert(0.0) += 1.0;
        }
        let doc_len = doc_terms.len() as f32;
        let mut score = 0.0;
        for term in query_terms {
            if let Some(count) = tf.get(term.as_str()) {
                score += 1.0 + (count / doc_len);
            }
        }
        score / (2.0 * query_terms.len() as f32)
    }

    /// Deterministic best-first ordering for scored candidates
    fn sort_scored(scored: &mut Vec<(Memory, f32)>) {
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn insert_memory(&self, memory: Memory) -> Result<()> {
        match self.memories.entry(memory.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(MnemonError::Validation(format!(
                "memory {} already exists",
                memory.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(memory);
                Ok(())
            }
        }
    }

    async fn get_memory(&self, id: MemoryId) -> Result<Option<Memory>> {
        Ok(self.memories.get(&id).map(|entry| entry.value().clone()))
    }

    async fn put_embedding(&self, id: MemoryId, embedding: Vec<f32>) -> Result<()> {
        if !self.memories.contains_key(&id) {
            return Err(MnemonError::MemoryNotFound(id));
        }
        self.embeddings.insert(id, embedding);
        Ok(())
    }

    async fn rank_by_vector(
        &self,
        filter: &MemoryFilter,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(Memory, f32)>> {
        let mut scored: Vec<(Memory, f32)> = self
            .filtered(filter)
            .into_iter()
            .filter_map(|memory| {
                let embedding = self.embeddings.get(&memory.id)?;
                let similarity = cosine_similarity(query, embedding.value());
                (similarity > 0.0).then_some((memory, similarity))
            })
            .collect();
        Self::sort_scored(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }

    async fn rank_by_keyword(
        &self,
        filter: &MemoryFilter,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(Memory, f32)>> {
        let query_terms = Self::tokenize(query);
        let mut scored: Vec<(Memory, f32)> = self
            .filtered(filter)
            .into_iter()
            .filter_map(|memory| {
                let relevance = Self::keyword_relevance(&query_terms, &memory.content);
                (relevance > 0.0).then_some((memory, relevance))
            })
            .collect();
        Self::sort_scored(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }

    async fn rank_by_salience(&self, filter: &MemoryFilter, limit: usize) -> Result<Vec<Memory>> {
        let mut memories = self.filtered(filter);
        memories.sort_by(|a, b| {
            b.effective_salience()
                .partial_cmp(&a.effective_salience())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        memories.truncate(limit);
        Ok(memories)
    }

    async fn rank_by_recency(&self, filter: &MemoryFilter, limit: usize) -> Result<Vec<Memory>> {
        let mut memories = self.filtered(filter);
        memories.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        memories.truncate(limit);
        Ok(memories)
    }

    async fn apply_salience_update(&self, update: &SalienceUpdate) -> Result<Memory> {
        let mut entry = self
            .memories
            .get_mut(&update.memory_id)
            .ok_or(MnemonError::MemoryNotFound(update.memory_id))?;
        // entry lock makes the increment atomic with the counter bump
        let next = entry.value().with_salience_delta(update.delta);
        *entry.value_mut() = next.clone();
        Ok(next)
    }

    async fn record_retrieval(&self, ids: &[MemoryId]) -> Result<usize> {
        let mut touched = 0;
        for id in ids {
            if let Some(mut entry) = self.memories.get_mut(id) {
                entry.value_mut().retrieval_count += 1;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn record_decision(&self, ids: &[MemoryId]) -> Result<usize> {
        let mut touched = 0;
        for id in ids {
            if let Some(mut entry) = self.memories.get_mut(id) {
                entry.value_mut().decision_count += 1;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn promote_memory(
        &self,
        id: MemoryId,
        target: TemporalLevel,
        at: DateTime<Utc>,
    ) -> Result<PromotionApplied> {
        let mut entry = self
            .memories
            .get_mut(&id)
            .ok_or(MnemonError::MemoryNotFound(id))?;
        if entry.value().level >= target {
            return Ok(PromotionApplied {
                memory: entry.value().clone(),
                changed: false,
            });
        }
        let promoted = entry.value().promoted_to(target, at);
        *entry.value_mut() = promoted.clone();
        Ok(PromotionApplied {
            memory: promoted,
            changed: true,
        })
    }

    async fn list_at_level(&self, user_id: &str, level: TemporalLevel) -> Result<Vec<Memory>> {
        let mut memories: Vec<Memory> = self
            .memories
            .iter()
            .filter(|entry| entry.value().user_id == user_id && entry.value().level == level)
            .map(|entry| entry.value().clone())
            .collect();
        memories.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(memories)
    }
}

#[async_trait]
impl TraceStore for InMemoryStore {
    async fn insert_trace(&self, trace: DecisionTrace) -> Result<()> {
        match self.traces.entry(trace.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(MnemonError::Validation(format!(
                "trace {} already exists",
                trace.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(trace);
                Ok(())
            }
        }
    }

    async fn get_trace(&self, id: TraceId) -> Result<Option<DecisionTrace>> {
        Ok(self.traces.get(&id).map(|entry| entry.value().clone()))
    }

    async fn complete_outcome(
        &self,
        outcome: &Outcome,
        attributions: &HashMap<MemoryId, f32>,
    ) -> Result<DecisionTrace> {
        let mut entry = self
            .traces
            .get_mut(&outcome.trace_id)
            .ok_or(MnemonError::TraceNotFound(outcome.trace_id))?;
        // exclusive entry ref: the observed check and the write are one step
        if entry.value().outcome_observed {
            return Err(MnemonError::AlreadyObserved(outcome.trace_id));
        }
        let observed = entry.value().with_outcome(outcome, attributions.clone());
        *entry.value_mut() = observed.clone();
        Ok(observed)
    }

    async fn list_pending(&self, user_id: &str, limit: usize) -> Result<Vec<DecisionTrace>> {
        let mut pending: Vec<DecisionTrace> = self
            .traces
            .iter()
            .filter(|entry| {
                !entry.value().outcome_observed && entry.value().user_id == user_id
            })
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        pending.truncate(limit);
        Ok(pending)
    }
}
