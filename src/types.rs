//! Core types for Mnemon

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MnemonError, Result};

/// Unique identifier for a memory
pub type MemoryId = Uuid;

/// Unique identifier for a decision trace
pub type TraceId = Uuid;

/// Unique identifier for a retrieval (links a result set to later decisions)
pub type RetrievalId = Uuid;

/// Temporal tier of a memory
///
/// Tiers are ordered by durability: a memory starts at `Immediate` and is
/// promoted upward by the lifecycle engine as positive evidence accumulates.
/// Typical lifetimes are guidance only and never enforced.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TemporalLevel {
    /// Session-scoped, typical lifetime 1 day (default for new memories)
    #[default]
    Immediate,
    /// Project-scoped, typical lifetime 14 days
    Situational,
    /// Recurring, typical lifetime 90 days
    Seasonal,
    /// Identity-level, typical lifetime 365 days
    Identity,
}

impl TemporalLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalLevel::Immediate => "immediate",
            TemporalLevel::Situational => "situational",
            TemporalLevel::Seasonal => "seasonal",
            TemporalLevel::Identity => "identity",
        }
    }

    /// Typical lifetime in days (guidance only)
    pub fn typical_lifetime_days(&self) -> i64 {
        match self {
            TemporalLevel::Immediate => 1,
            TemporalLevel::Situational => 14,
            TemporalLevel::Seasonal => 90,
            TemporalLevel::Identity => 365,
        }
    }

    /// The next, more durable tier (None at the top)
    pub fn next(&self) -> Option<TemporalLevel> {
        match self {
            TemporalLevel::Immediate => Some(TemporalLevel::Situational),
            TemporalLevel::Situational => Some(TemporalLevel::Seasonal),
            TemporalLevel::Seasonal => Some(TemporalLevel::Identity),
            TemporalLevel::Identity => None,
        }
    }

    /// All tiers, lowest first
    pub fn all() -> [TemporalLevel; 4] {
        [
            TemporalLevel::Immediate,
            TemporalLevel::Situational,
            TemporalLevel::Seasonal,
            TemporalLevel::Identity,
        ]
    }
}

impl std::fmt::Display for TemporalLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TemporalLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "immediate" => Ok(TemporalLevel::Immediate),
            "situational" => Ok(TemporalLevel::Situational),
            "seasonal" => Ok(TemporalLevel::Seasonal),
            "identity" => Ok(TemporalLevel::Identity),
            _ => Err(format!("Unknown temporal level: {}", s)),
        }
    }
}

/// Content classification of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Fact,
    Preference,
    Event,
    Goal,
    Observation,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Fact => "fact",
            ContentKind::Preference => "preference",
            ContentKind::Event => "event",
            ContentKind::Goal => "goal",
            ContentKind::Observation => "observation",
        }
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fact" => Ok(ContentKind::Fact),
            "preference" => Ok(ContentKind::Preference),
            "event" => Ok(ContentKind::Event),
            "goal" => Ok(ContentKind::Goal),
            "observation" => Ok(ContentKind::Observation),
            _ => Err(format!("Unknown content kind: {}", s)),
        }
    }
}

/// One stored unit of context
///
/// Memories are copy-on-write values: every state change goes through a
/// `with_*`/`promoted_to` builder that derives a new version. The storage
/// collaborator may persist a transition as an in-place update as long as it
/// applies exactly the same field changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,
    /// Owning user
    pub user_id: String,
    /// Main content of the memory
    pub content: String,
    /// Content classification
    #[serde(default)]
    pub kind: ContentKind,
    /// Temporal tier
    #[serde(default)]
    pub level: TemporalLevel,
    /// Start of the validity window
    pub valid_from: DateTime<Utc>,
    /// End of the validity window (None = open-ended)
    pub valid_until: Option<DateTime<Utc>>,
    /// Importance assigned at creation (0.0 - 1.0)
    pub base_salience: f32,
    /// Signed adjustment accumulated from observed outcomes
    #[serde(default)]
    pub outcome_adjustment: f32,
    /// Times this memory appeared in a retrieval result
    #[serde(default)]
    pub retrieval_count: i64,
    /// Times this memory backed a tracked decision
    #[serde(default)]
    pub decision_count: i64,
    /// Outcomes that raised this memory's salience
    #[serde(default)]
    pub positive_outcomes: i64,
    /// Outcomes that lowered this memory's salience
    #[serde(default)]
    pub negative_outcomes: i64,
    /// Tier this memory was last promoted from (set only by the lifecycle engine)
    pub promoted_from_level: Option<TemporalLevel>,
    /// When the last promotion happened (set only by the lifecycle engine)
    pub promotion_timestamp: Option<DateTime<Utc>>,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
}

impl Memory {
    /// Create a new Immediate-tier memory valid from now
    ///
    /// `base_salience` is clamped into [0.0, 1.0].
    pub fn new(
        user_id: impl Into<String>,
        content: impl Into<String>,
        kind: ContentKind,
        base_salience: f32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            content: content.into(),
            kind,
            level: TemporalLevel::Immediate,
            valid_from: now,
            valid_until: None,
            base_salience: base_salience.clamp(0.0, 1.0),
            outcome_adjustment: 0.0,
            retrieval_count: 0,
            decision_count: 0,
            positive_outcomes: 0,
            negative_outcomes: 0,
            promoted_from_level: None,
            promotion_timestamp: None,
            created_at: now,
        }
    }

    /// Effective salience: `clamp(base + outcome_adjustment, 0, 1)`
    pub fn effective_salience(&self) -> f32 {
        (self.base_salience + self.outcome_adjustment).clamp(0.0, 1.0)
    }

    /// Whether `at` falls inside the half-open validity window
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        if at < self.valid_from {
            return false;
        }
        match self.valid_until {
            Some(until) => at < until,
            None => true,
        }
    }

    /// Age in hours at `now`
    pub fn age_hours(&self, now: DateTime<Utc>) -> f32 {
        (now - self.created_at).num_seconds().max(0) as f32 / 3600.0
    }

    /// Share of recorded outcomes that were positive; 0.5 when none recorded
    pub fn positive_ratio(&self) -> f32 {
        let total = self.positive_outcomes + self.negative_outcomes;
        if total == 0 {
            0.5
        } else {
            self.positive_outcomes as f32 / total as f32
        }
    }

    /// Derive a version with a salience delta folded into the adjustment
    ///
    /// The adjustment is a plain commutative sum so that concurrent deltas
    /// can be applied as atomic increments by the storage collaborator;
    /// clamping into [0, 1] happens at read time in `effective_salience`.
    pub fn with_salience_delta(&self, delta: f32) -> Self {
        let mut next = self.clone();
        next.outcome_adjustment = self.outcome_adjustment + delta;
        match delta.partial_cmp(&0.0) {
            Some(std::cmp::Ordering::Greater) => next.positive_outcomes += 1,
            Some(std::cmp::Ordering::Less) => next.negative_outcomes += 1,
            _ => {}
        }
        next
    }

    /// Derive a version promoted to `target`, recording provenance
    pub fn promoted_to(&self, target: TemporalLevel, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.promoted_from_level = Some(self.level);
        next.level = target;
        next.promotion_timestamp = Some(at);
        next
    }

    /// Derive a version with a different validity window
    pub fn with_validity(&self, from: DateTime<Utc>, until: Option<DateTime<Utc>>) -> Self {
        let mut next = self.clone();
        next.valid_from = from;
        next.valid_until = until;
        next
    }
}

/// Ranking source feeding the fusion engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankSource {
    Vector,
    Keyword,
    Salience,
    Recency,
}

impl RankSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankSource::Vector => "vector",
            RankSource::Keyword => "keyword",
            RankSource::Salience => "salience",
            RankSource::Recency => "recency",
        }
    }

    /// Default fusion weight for this source
    pub fn default_weight(&self) -> f32 {
        match self {
            RankSource::Vector => 1.0,
            RankSource::Keyword => 0.8,
            RankSource::Salience => 0.6,
            RankSource::Recency => 0.4,
        }
    }
}

impl std::fmt::Display for RankSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrieval request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    /// User whose memories are searched
    pub user_id: String,
    /// Free-text query
    pub query: String,
    /// Maximum number of fused results
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Restrict to these tiers (None = all)
    pub temporal_levels: Option<Vec<TemporalLevel>>,
    /// Minimum effective salience
    #[serde(default)]
    pub min_salience: f32,
    /// Include memories outside their validity window
    #[serde(default)]
    pub include_expired: bool,
}

fn default_limit() -> usize {
    10
}

impl RetrievalRequest {
    pub fn new(user_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            query: query.into(),
            limit: default_limit(),
            temporal_levels: None,
            min_salience: 0.0,
            include_expired: false,
        }
    }
}

/// Input for creating a decision trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTraceInput {
    /// Owning user
    pub user_id: String,
    /// Conversation session the decision belongs to
    pub session_id: String,
    /// Retrieval that produced the memories (for audit, not re-scored)
    pub retrieval_id: Option<RetrievalId>,
    /// Exact memories used and their scores as retrieved
    pub memory_scores: HashMap<MemoryId, f32>,
    /// Kind of decision (e.g. "code_edit", "tool_choice")
    pub decision_kind: String,
    /// Short human-readable summary; must not carry free-form PII
    pub summary: String,
    /// Caller confidence in the decision (0.0 - 1.0)
    pub confidence: f32,
    /// Number of alternatives the caller considered
    #[serde(default)]
    pub alternatives_considered: u32,
}

impl CreateTraceInput {
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(MnemonError::Validation("user_id is empty".into()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(MnemonError::Validation(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        for score in self.memory_scores.values() {
            if !score.is_finite() || *score < 0.0 {
                return Err(MnemonError::Validation(
                    "memory scores must be finite and non-negative".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Immutable record of "this decision used these memories"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTrace {
    /// Unique identifier
    pub id: TraceId,
    /// Owning user
    pub user_id: String,
    /// Conversation session
    pub session_id: String,
    /// Retrieval that produced the snapshot, when known
    pub retrieval_id: Option<RetrievalId>,
    /// Score snapshot at decision time; never recomputed
    pub memory_scores: HashMap<MemoryId, f32>,
    /// Kind of decision
    pub decision_kind: String,
    /// Short human-readable summary
    pub summary: String,
    /// Caller confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Number of alternatives considered
    pub alternatives_considered: u32,
    /// When the trace was created
    pub created_at: DateTime<Utc>,
    /// Whether an outcome has been recorded (terminal)
    #[serde(default)]
    pub outcome_observed: bool,
    /// Observed quality (-1.0 - 1.0)
    pub outcome_quality: Option<f32>,
    /// How the outcome was detected
    pub outcome_signal: Option<String>,
    /// When the outcome was observed
    pub outcome_at: Option<DateTime<Utc>>,
    /// Contribution fraction per memory, filled when the outcome lands
    #[serde(default)]
    pub attributions: HashMap<MemoryId, f32>,
}

impl DecisionTrace {
    /// Build a new trace in the Created state
    pub fn from_input(input: CreateTraceInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            session_id: input.session_id,
            retrieval_id: input.retrieval_id,
            memory_scores: input.memory_scores,
            decision_kind: input.decision_kind,
            summary: input.summary,
            confidence: input.confidence,
            alternatives_considered: input.alternatives_considered,
            created_at: Utc::now(),
            outcome_observed: false,
            outcome_quality: None,
            outcome_signal: None,
            outcome_at: None,
            attributions: HashMap::new(),
        }
    }

    /// Derive the terminal OutcomeObserved version
    pub fn with_outcome(&self, outcome: &Outcome, attributions: HashMap<MemoryId, f32>) -> Self {
        let mut next = self.clone();
        next.outcome_observed = true;
        next.outcome_quality = Some(outcome.quality);
        next.outcome_signal = Some(outcome.signal.clone());
        next.outcome_at = Some(outcome.observed_at);
        next.attributions = attributions;
        next
    }
}

/// Observed outcome of a decision (transient input)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    /// Trace the outcome belongs to
    pub trace_id: TraceId,
    /// Quality of the outcome (-1.0 = harmful, 1.0 = ideal)
    pub quality: f32,
    /// How the outcome was detected (e.g. "tests_passed", "user_revert")
    pub signal: String,
    /// Optional free-text feedback
    pub feedback: Option<String>,
    /// When the outcome was observed
    pub observed_at: DateTime<Utc>,
}

impl Outcome {
    pub fn new(trace_id: TraceId, quality: f32, signal: impl Into<String>) -> Self {
        Self {
            trace_id,
            quality,
            signal: signal.into(),
            feedback: None,
            observed_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.quality) || !self.quality.is_finite() {
            return Err(MnemonError::Validation(format!(
                "outcome quality {} outside [-1, 1]",
                self.quality
            )));
        }
        Ok(())
    }
}

/// Why a salience delta was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    PositiveOutcome,
    NegativeOutcome,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::PositiveOutcome => "positive_outcome",
            AdjustmentReason::NegativeOutcome => "negative_outcome",
        }
    }
}

/// One bounded salience delta attributed back to a memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalienceUpdate {
    /// Memory receiving the delta
    pub memory_id: MemoryId,
    /// Trace whose outcome produced it
    pub trace_id: TraceId,
    /// Signed delta, bounded to [-0.1, 0.1] per outcome
    pub delta: f32,
    /// Reason tag
    pub reason: AdjustmentReason,
}
