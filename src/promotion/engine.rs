//! The periodic promotion engine
//!
//! Exposes the three steps the external scheduler drives (find candidates,
//! promote one, notify) as independently callable units, plus a per-user
//! `run` that chains them. Promotion is idempotent and notification is
//! best-effort, so a crash or retry between steps is always safe to resume.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::{publish_best_effort, DomainEvent, EventPublisher, NoopPublisher};
use crate::promotion::{PromotionCandidate, PromotionCriteria};
use crate::storage::MemoryStore;
use crate::types::{MemoryId, TemporalLevel};

/// Configuration for promotion runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    /// Cap on promotions per user per run; the candidate batch is truncated
    /// by priority score, highest first
    pub max_promotions_per_run: usize,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            max_promotions_per_run: 10,
        }
    }
}

/// One applied (or idempotently skipped) promotion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub memory_id: MemoryId,
    pub user_id: String,
    /// Tier the memory held before this attempt
    pub from: TemporalLevel,
    /// Tier the memory holds now
    pub to: TemporalLevel,
    /// When the promotion landed
    pub at: DateTime<Utc>,
    /// False when the memory was already at or above the target
    pub changed: bool,
}

/// Report of one per-user promotion run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromotionRunReport {
    pub user_id: String,
    /// Candidates that passed admission (after batch truncation)
    pub candidates: usize,
    /// Promotions that changed a memory's tier
    pub promoted: Vec<Promotion>,
    /// Idempotent no-ops (already at/above target)
    pub skipped: usize,
    /// Candidates whose promotion failed, with the error text
    pub failed: Vec<(MemoryId, String)>,
    /// Duration of the run in milliseconds
    pub duration_ms: f64,
}

/// The promotion lifecycle engine
pub struct PromotionEngine {
    store: Arc<dyn MemoryStore>,
    events: Arc<dyn EventPublisher>,
    config: PromotionConfig,
}

impl PromotionEngine {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            events: Arc::new(NoopPublisher),
            config: PromotionConfig::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: PromotionConfig) -> Self {
        self.config = config;
        self
    }

    /// Step 1: scan the promotable tiers for qualified candidates
    ///
    /// One tier failing discovery is logged and skipped; the other tiers
    /// still contribute. Discovery fails as a whole only when every tier
    /// failed, so the scheduler can retry the scan.
    pub async fn find_candidates(&self, user_id: &str) -> Result<Vec<PromotionCandidate>> {
        let now = Utc::now();
        let mut candidates = Vec::new();
        let mut last_error = None;
        let mut scanned_any = false;

        for level in [
            TemporalLevel::Immediate,
            TemporalLevel::Situational,
            TemporalLevel::Seasonal,
        ] {
            let criteria = match PromotionCriteria::for_transition(level) {
                Some(criteria) => criteria,
                None => continue,
            };
            let target = match level.next() {
                Some(target) => target,
                None => continue,
            };

            match self.store.list_at_level(user_id, level).await {
                Ok(memories) => {
                    scanned_any = true;
                    for memory in memories {
                        if criteria.qualifies(&memory, now) {
                            let score = criteria.priority_score(&memory, now);
                            candidates.push(PromotionCandidate {
                                memory,
                                target,
                                score,
                            });
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(%user_id, %level, %err, "candidate scan failed for tier, skipping");
                    last_error = Some(err);
                }
            }
        }

        if !scanned_any {
            if let Some(err) = last_error {
                return Err(err);
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });
        candidates.truncate(self.config.max_promotions_per_run);

        tracing::debug!(%user_id, count = candidates.len(), "promotion candidates found");
        Ok(candidates)
    }

    /// Step 2: promote one memory, idempotently
    ///
    /// Retried or concurrent attempts on the same memory converge: the first
    /// writer moves the tier and records provenance, every later attempt
    /// succeeds with `changed = false` and touches nothing.
    pub async fn promote(&self, memory_id: MemoryId, target: TemporalLevel) -> Result<Promotion> {
        let at = Utc::now();
        let applied = self.store.promote_memory(memory_id, target, at).await?;

        let promotion = Promotion {
            memory_id,
            user_id: applied.memory.user_id.clone(),
            from: applied
                .memory
                .promoted_from_level
                .filter(|_| applied.changed)
                .unwrap_or(applied.memory.level),
            to: applied.memory.level,
            at,
            changed: applied.changed,
        };

        if applied.changed {
            tracing::info!(
                %memory_id,
                from = %promotion.from,
                to = %promotion.to,
                "memory promoted"
            );
        } else {
            tracing::debug!(%memory_id, target = %target, "already at or above target, no-op");
        }
        Ok(promotion)
    }

    /// Step 3: announce a promotion, best-effort
    ///
    /// Failure here never rolls back the promotion; the scheduler may retry
    /// this step on its own.
    pub fn notify(&self, promotion: &Promotion) {
        if !promotion.changed {
            return;
        }
        publish_best_effort(
            self.events.as_ref(),
            DomainEvent::memory_promoted(
                &promotion.user_id,
                promotion.memory_id,
                promotion.from,
                promotion.to,
            ),
        );
    }

    /// One full run for one user: find, promote each, notify each
    ///
    /// A single candidate's failure is collected into the report and the
    /// batch continues; successes stand regardless.
    pub async fn run(&self, user_id: &str) -> Result<PromotionRunReport> {
        let started = std::time::Instant::now();
        let candidates = self.find_candidates(user_id).await?;

        let mut report = PromotionRunReport {
            user_id: user_id.to_string(),
            candidates: candidates.len(),
            ..Default::default()
        };

        for candidate in candidates {
            match self.promote(candidate.memory.id, candidate.target).await {
                Ok(promotion) if promotion.changed => {
                    self.notify(&promotion);
                    report.promoted.push(promotion);
                }
                Ok(_) => report.skipped += 1,
                Err(err) => {
                    tracing::warn!(memory_id = %candidate.memory.id, %err, "promotion failed, continuing batch");
                    report.failed.push((candidate.memory.id, err.to_string()));
                }
            }
        }

        report.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        tracing::info!(
            %user_id,
            candidates = report.candidates,
            promoted = report.promoted.len(),
            skipped = report.skipped,
            failed = report.failed.len(),
            "promotion run complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::types::{ContentKind, Memory};
    use chrono::Duration;

    fn qualified_memory(user: &str) -> Memory {
        let mut m = Memory::new(user, "proven useful", ContentKind::Fact, 0.6);
        m.created_at = Utc::now() - Duration::hours(48);
        m.valid_from = m.created_at;
        m.retrieval_count = 5;
        m.positive_outcomes = 4;
        m.negative_outcomes = 1;
        m
    }

    #[tokio::test]
    async fn test_run_promotes_qualified_memory() {
        let store = Arc::new(InMemoryStore::new());
        let memory = qualified_memory("u1");
        store.insert_memory(memory.clone()).await.unwrap();

        let engine = PromotionEngine::new(store.clone());
        let report = engine.run("u1").await.unwrap();

        assert_eq!(report.promoted.len(), 1);
        assert!(report.failed.is_empty());
        let after = store.get_memory(memory.id).await.unwrap().unwrap();
        assert_eq!(after.level, TemporalLevel::Situational);
        assert_eq!(after.promoted_from_level, Some(TemporalLevel::Immediate));
        assert!(after.promotion_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_unqualified_memory_left_alone() {
        let store = Arc::new(InMemoryStore::new());
        let memory = Memory::new("u1", "brand new", ContentKind::Fact, 0.9);
        store.insert_memory(memory.clone()).await.unwrap();

        let engine = PromotionEngine::new(store.clone());
        let report = engine.run("u1").await.unwrap();
        assert!(report.promoted.is_empty());
        let after = store.get_memory(memory.id).await.unwrap().unwrap();
        assert_eq!(after.level, TemporalLevel::Immediate);
    }

    #[tokio::test]
    async fn test_promote_is_idempotent_across_retries() {
        let store = Arc::new(InMemoryStore::new());
        let memory = qualified_memory("u1");
        store.insert_memory(memory.clone()).await.unwrap();

        let engine = PromotionEngine::new(store.clone());
        let first = engine
            .promote(memory.id, TemporalLevel::Situational)
            .await
            .unwrap();
        assert!(first.changed);

        let stamp = store
            .get_memory(memory.id)
            .await
            .unwrap()
            .unwrap()
            .promotion_timestamp;

        // retried attempt: success, nothing mutated
        let second = engine
            .promote(memory.id, TemporalLevel::Situational)
            .await
            .unwrap();
        assert!(!second.changed);
        let after = store.get_memory(memory.id).await.unwrap().unwrap();
        assert_eq!(after.promotion_timestamp, stamp);
        assert_eq!(after.promoted_from_level, Some(TemporalLevel::Immediate));
    }

    #[tokio::test]
    async fn test_batch_truncated_by_priority() {
        let store = Arc::new(InMemoryStore::new());
        // one barely-qualified, one long-qualified
        let mut barely = qualified_memory("u1");
        barely.retrieval_count = 3;
        barely.created_at = Utc::now() - Duration::hours(25);
        barely.valid_from = barely.created_at;
        let strong = {
            let mut m = qualified_memory("u1");
            m.retrieval_count = 50;
            m.positive_outcomes = 20;
            m.negative_outcomes = 0;
            m
        };
        store.insert_memory(barely.clone()).await.unwrap();
        store.insert_memory(strong.clone()).await.unwrap();

        let engine = PromotionEngine::new(store.clone()).with_config(PromotionConfig {
            max_promotions_per_run: 1,
        });
        let candidates = engine.find_candidates("u1").await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].memory.id, strong.id);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_memory(qualified_memory("u1")).await.unwrap();
        store.insert_memory(qualified_memory("u2")).await.unwrap();

        let engine = Arc::new(PromotionEngine::new(store));
        let (r1, r2) = tokio::join!(engine.run("u1"), engine.run("u2"));
        assert_eq!(r1.unwrap().promoted.len(), 1);
        assert_eq!(r2.unwrap().promoted.len(), 1);
    }
}
