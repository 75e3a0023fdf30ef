//! Storage collaborator traits
//!
//! The durable engine (relational + vector) lives outside the core; the
//! engine components only depend on these traits. Backends that lack a
//! native ranking query return `MnemonError::Unsupported` and the retrieval
//! service drops that source.
//!
//! # Design principles
//!
//! 1. **Async interface**: backends are expected to sit on a network or a
//!    connection pool; every method is async and takes `&self`.
//! 2. **Atomicity where it matters**: `apply_salience_update` must be an
//!    atomic increment, `complete_outcome` a compare-and-set, and
//!    `promote_memory` idempotent. Everything else is plain CRUD.
//! 3. **Minimal coupling**: only `crate::types` values cross the boundary.

mod memstore;

pub use memstore::InMemoryStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    DecisionTrace, Memory, MemoryId, Outcome, SalienceUpdate, TemporalLevel, TraceId,
};

/// Filter applied by every ranking query
#[derive(Debug, Clone)]
pub struct MemoryFilter {
    /// Owning user
    pub user_id: String,
    /// Restrict to these tiers (None = all)
    pub levels: Option<Vec<TemporalLevel>>,
    /// Minimum effective salience
    pub min_salience: f32,
    /// Include memories outside their validity window
    pub include_expired: bool,
    /// "Now" for validity checks, pinned by the caller for determinism
    pub now: DateTime<Utc>,
}

impl MemoryFilter {
    /// Whether a memory passes this filter
    pub fn matches(&self, memory: &Memory) -> bool {
        if memory.user_id != self.user_id {
            return false;
        }
        if let Some(ref levels) = self.levels {
            if !levels.contains(&memory.level) {
                return false;
            }
        }
        if memory.effective_salience() < self.min_salience {
            return false;
        }
        if !self.include_expired && !memory.is_valid_at(self.now) {
            return false;
        }
        true
    }
}

/// Result of an idempotent promotion attempt
#[derive(Debug, Clone)]
pub struct PromotionApplied {
    /// The memory after the attempt (promoted or untouched)
    pub memory: Memory,
    /// False when the memory was already at or above the target
    pub changed: bool,
}

/// Storage collaborator for memories
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist a new memory
    async fn insert_memory(&self, memory: Memory) -> Result<()>;

    /// Fetch a memory by id
    async fn get_memory(&self, id: MemoryId) -> Result<Option<Memory>>;

    /// Attach or replace a memory's embedding
    async fn put_embedding(&self, id: MemoryId, embedding: Vec<f32>) -> Result<()>;

    /// Rank filtered memories by vector similarity to `query`
    ///
    /// Returns (memory, similarity) best-first. Backends without a vector
    /// index return `Unsupported`.
    async fn rank_by_vector(
        &self,
        filter: &MemoryFilter,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(Memory, f32)>>;

    /// Rank filtered memories by full-text relevance to `query`
    ///
    /// Returns (memory, relevance) best-first. Backends without full-text
    /// search return `Unsupported`.
    async fn rank_by_keyword(
        &self,
        filter: &MemoryFilter,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(Memory, f32)>>;

    /// Filtered memories ordered by effective salience descending
    async fn rank_by_salience(&self, filter: &MemoryFilter, limit: usize) -> Result<Vec<Memory>>;

    /// Filtered memories ordered by creation time descending
    async fn rank_by_recency(&self, filter: &MemoryFilter, limit: usize) -> Result<Vec<Memory>>;

    /// Apply one bounded salience delta as an atomic increment
    ///
    /// Concurrent updates to the same memory must all land; the adjustment
    /// is a commutative sum. Returns the memory after the update.
    async fn apply_salience_update(&self, update: &SalienceUpdate) -> Result<Memory>;

    /// Increment retrieval_count on each listed memory; returns how many existed
    async fn record_retrieval(&self, ids: &[MemoryId]) -> Result<usize>;

    /// Increment decision_count on each listed memory; returns how many existed
    async fn record_decision(&self, ids: &[MemoryId]) -> Result<usize>;

    /// Promote a memory to `target`, idempotently
    ///
    /// If the live tier is already at or above `target` the call succeeds
    /// with `changed = false` and provenance fields untouched. Backends must
    /// make the check-and-write atomic so retried or concurrent attempts
    /// cannot double-promote.
    async fn promote_memory(
        &self,
        id: MemoryId,
        target: TemporalLevel,
        at: DateTime<Utc>,
    ) -> Result<PromotionApplied>;

    /// All of a user's memories at one tier (promotion candidate scan)
    async fn list_at_level(&self, user_id: &str, level: TemporalLevel) -> Result<Vec<Memory>>;
}

/// Storage collaborator for decision traces
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Persist a new trace in the Created state
    ///
    /// A duplicate id is a validation error.
    async fn insert_trace(&self, trace: DecisionTrace) -> Result<()>;

    /// Fetch a trace by id
    async fn get_trace(&self, id: TraceId) -> Result<Option<DecisionTrace>>;

    /// Atomically move a trace Created -> OutcomeObserved
    ///
    /// Single-writer-wins: exactly one concurrent caller succeeds, every
    /// other caller gets `AlreadyObserved` and the stored outcome fields are
    /// untouched by the losers. Returns the observed trace.
    async fn complete_outcome(
        &self,
        outcome: &Outcome,
        attributions: &HashMap<MemoryId, f32>,
    ) -> Result<DecisionTrace>;

    /// Traces for a user that have no recorded outcome yet, oldest first
    async fn list_pending(&self, user_id: &str, limit: usize) -> Result<Vec<DecisionTrace>>;
}
