//! Promotion lifecycle: criteria, candidate scoring, and the periodic engine
//!
//! Memories climb the temporal hierarchy when they accumulate sustained
//! positive evidence. Admission is a hard AND over four thresholds; the
//! priority score only orders an oversized batch, it never admits a memory
//! the thresholds reject.

mod engine;
mod retry;

pub use engine::{Promotion, PromotionConfig, PromotionEngine, PromotionRunReport};
pub use retry::{run_with_retry, RetryPolicy};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Memory, TemporalLevel};

/// Priority score weights (age / retrievals / salience / outcome ratio)
const AGE_WEIGHT: f32 = 0.15;
const RETRIEVAL_WEIGHT: f32 = 0.25;
const SALIENCE_WEIGHT: f32 = 0.25;
const RATIO_WEIGHT: f32 = 0.35;

/// Hard admission thresholds for one tier transition
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PromotionCriteria {
    /// Minimum age in hours
    pub min_age_hours: f32,
    /// Minimum retrieval count
    pub min_retrievals: i64,
    /// Minimum share of positive outcomes (0.5 when none recorded)
    pub min_positive_ratio: f32,
    /// Minimum effective salience
    pub min_salience: f32,
}

impl PromotionCriteria {
    /// Thresholds for promoting *out of* `from` (None at the top tier)
    ///
    /// A memory with zero recorded outcomes carries the neutral 0.5 ratio,
    /// so only the first, most lenient transition is open to it.
    pub fn for_transition(from: TemporalLevel) -> Option<Self> {
        match from {
            TemporalLevel::Immediate => Some(Self {
                min_age_hours: 24.0,
                min_retrievals: 3,
                min_positive_ratio: 0.6,
                min_salience: 0.5,
            }),
            TemporalLevel::Situational => Some(Self {
                min_age_hours: 168.0,
                min_retrievals: 10,
                min_positive_ratio: 0.7,
                min_salience: 0.6,
            }),
            TemporalLevel::Seasonal => Some(Self {
                min_age_hours: 720.0,
                min_retrievals: 25,
                min_positive_ratio: 0.8,
                min_salience: 0.7,
            }),
            TemporalLevel::Identity => None,
        }
    }

    /// All four thresholds must hold
    pub fn qualifies(&self, memory: &Memory, now: DateTime<Utc>) -> bool {
        memory.age_hours(now) >= self.min_age_hours
            && memory.retrieval_count >= self.min_retrievals
            && memory.positive_ratio() >= self.min_positive_ratio
            && memory.effective_salience() >= self.min_salience
    }

    /// Batch priority, not an admission gate
    ///
    /// Each component is progress toward its threshold, capped at 1.0, so a
    /// long-qualified memory cannot crowd out one that barely qualifies on a
    /// different axis.
    pub fn priority_score(&self, memory: &Memory, now: DateTime<Utc>) -> f32 {
        let age = (memory.age_hours(now) / self.min_age_hours).min(1.0);
        let retrievals =
            (memory.retrieval_count as f32 / self.min_retrievals as f32).min(1.0);
        let salience = (memory.effective_salience() / self.min_salience).min(1.0);
        let ratio = (memory.positive_ratio() / self.min_positive_ratio).min(1.0);

        AGE_WEIGHT * age
            + RETRIEVAL_WEIGHT * retrievals
            + SALIENCE_WEIGHT * salience
            + RATIO_WEIGHT * ratio
    }
}

/// A memory that passed admission, with its batch priority
#[derive(Debug, Clone)]
pub struct PromotionCandidate {
    pub memory: Memory,
    /// Tier the memory would move to
    pub target: TemporalLevel,
    /// Priority score for batch truncation
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentKind;
    use chrono::Duration;

    fn aged_memory(age: Duration, retrievals: i64, pos: i64, neg: i64, salience: f32) -> Memory {
        let mut m = Memory::new("u1", "m", ContentKind::Fact, salience);
        m.created_at = Utc::now() - age;
        m.valid_from = m.created_at;
        m.retrieval_count = retrievals;
        m.positive_outcomes = pos;
        m.negative_outcomes = neg;
        m
    }

    #[test]
    fn test_age_boundary_blocks_then_admits() {
        let criteria = PromotionCriteria::for_transition(TemporalLevel::Immediate).unwrap();
        let now = Utc::now();

        let young = aged_memory(Duration::hours(23), 3, 3, 2, 0.5);
        assert!(!criteria.qualifies(&young, now));

        let old_enough = aged_memory(Duration::hours(24) + Duration::minutes(1), 3, 3, 2, 0.5);
        assert!(criteria.qualifies(&old_enough, now));
    }

    #[test]
    fn test_all_four_thresholds_required() {
        let criteria = PromotionCriteria::for_transition(TemporalLevel::Immediate).unwrap();
        let now = Utc::now();
        let base = aged_memory(Duration::hours(48), 3, 3, 2, 0.5);
        assert!(criteria.qualifies(&base, now));

        let mut few_retrievals = base.clone();
        few_retrievals.retrieval_count = 2;
        assert!(!criteria.qualifies(&few_retrievals, now));

        let mut bad_ratio = base.clone();
        bad_ratio.negative_outcomes = 5;
        assert!(!criteria.qualifies(&bad_ratio, now));

        let mut faint = base.clone();
        faint.base_salience = 0.4;
        assert!(!criteria.qualifies(&faint, now));
    }

    #[test]
    fn test_zero_outcome_memory_blocked_by_neutral_ratio() {
        let now = Utc::now();
        // strong on every axis except it has no recorded outcomes: the
        // neutral 0.5 ratio sits below every transition's ratio threshold
        let m = aged_memory(Duration::hours(1000), 50, 0, 0, 0.9);

        for from in [
            TemporalLevel::Immediate,
            TemporalLevel::Situational,
            TemporalLevel::Seasonal,
        ] {
            let criteria = PromotionCriteria::for_transition(from).unwrap();
            assert!(!criteria.qualifies(&m, now));
        }

        // a single positive outcome tips the first transition open
        let mut seen_once = m.clone();
        seen_once.positive_outcomes = 1;
        let first = PromotionCriteria::for_transition(TemporalLevel::Immediate).unwrap();
        assert!(first.qualifies(&seen_once, now));
    }

    #[test]
    fn test_priority_score_caps_components() {
        let criteria = PromotionCriteria::for_transition(TemporalLevel::Immediate).unwrap();
        let now = Utc::now();
        // far past every threshold: every component caps at 1.0
        let overachiever = aged_memory(Duration::days(30), 100, 50, 0, 1.0);
        let score = criteria.priority_score(&overachiever, now);
        assert!((score - 1.0).abs() < 1e-6);

        let barely = aged_memory(Duration::hours(24), 3, 3, 2, 0.5);
        assert!(criteria.priority_score(&barely, now) <= score);
    }

    #[test]
    fn test_identity_has_no_transition() {
        assert!(PromotionCriteria::for_transition(TemporalLevel::Identity).is_none());
    }
}
