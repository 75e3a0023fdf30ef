//! Retrieval service: concurrent multi-source ranking plus rank fusion
//!
//! Up to four ranking sources run in parallel against the storage
//! collaborator, each bounded by its own timeout. A source that times out,
//! errors, or is unsupported by the backend is dropped and logged; retrieval
//! as a whole succeeds with whatever survives, down to an empty result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::{MnemonError, Result};
use crate::events::{publish_best_effort, DomainEvent, EventPublisher, NoopPublisher};
use crate::fusion::{fuse, FusedMemory, FusionConfig, RankedList, DEFAULT_RRF_K};
use crate::storage::{MemoryFilter, MemoryStore};
use crate::types::{MemoryId, RankSource, RetrievalId, RetrievalRequest};

/// Per-source fusion weights
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourceWeights {
    pub vector: f32,
    pub keyword: f32,
    pub salience: f32,
    pub recency: f32,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            vector: RankSource::Vector.default_weight(),
            keyword: RankSource::Keyword.default_weight(),
            salience: RankSource::Salience.default_weight(),
            recency: RankSource::Recency.default_weight(),
        }
    }
}

/// Configuration for the retrieval service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Timeout applied to each ranking source independently
    pub source_timeout: Duration,
    /// Each source fetches `limit * overfetch_factor` rows before fusion
    pub overfetch_factor: usize,
    /// RRF constant
    pub rrf_k: f32,
    /// Per-source fusion weights
    pub weights: SourceWeights,
    /// Recency raw score is `1 / (1 + age_hours / half_life)`
    pub recency_half_life_hours: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            source_timeout: Duration::from_secs(2),
            overfetch_factor: 3,
            rrf_k: DEFAULT_RRF_K,
            weights: SourceWeights::default(),
            recency_half_life_hours: 168.0,
        }
    }
}

/// One fused, limit-truncated retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Freshly generated id linking this result to later decision traces
    pub retrieval_id: RetrievalId,
    /// The query as received
    pub query: String,
    /// Fused ranked memories with per-source provenance
    pub memories: Vec<FusedMemory>,
    /// Sources that contributed at least one ranking
    pub sources: Vec<RankSource>,
    /// Wall-clock latency of the whole fan-out + fusion
    pub latency_ms: f64,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    /// Ids of the returned memories, fused order
    pub fn memory_ids(&self) -> Vec<MemoryId> {
        self.memories.iter().map(|f| f.memory.id).collect()
    }

    /// Fused score per memory id, the snapshot a decision trace records
    pub fn score_map(&self) -> HashMap<MemoryId, f32> {
        self.memories
            .iter()
            .map(|f| (f.memory.id, f.fused_score))
            .collect()
    }
}

/// The retrieval service
///
/// Collaborators are injected; there are no process-wide clients. The
/// embedder is optional: without one the vector source is skipped entirely,
/// which is a configuration, not an error.
pub struct RetrievalService {
    store: Arc<dyn MemoryStore>,
    embedder: Option<Arc<dyn Embedder>>,
    events: Arc<dyn EventPublisher>,
    config: RetrievalConfig,
}

impl RetrievalService {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            embedder: None,
            events: Arc::new(NoopPublisher),
            config: RetrievalConfig::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the fan-out, fuse, truncate, and hand back a ranked result
    ///
    /// An empty result is a successful result; the only hard failures are
    /// malformed requests.
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResult> {
        if request.limit == 0 {
            return Err(MnemonError::Validation("limit must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&request.min_salience) {
            return Err(MnemonError::Validation(format!(
                "min_salience {} outside [0, 1]",
                request.min_salience
            )));
        }

        let started = std::time::Instant::now();
        let now = Utc::now();
        let filter = MemoryFilter {
            user_id: request.user_id.clone(),
            levels: request.temporal_levels.clone(),
            min_salience: request.min_salience,
            include_expired: request.include_expired,
            now,
        };
        let fetch = request.limit * self.config.overfetch_factor;

        let (vector, keyword, salience, recency) = tokio::join!(
            self.vector_source(&filter, &request.query, fetch),
            self.keyword_source(&filter, &request.query, fetch),
            self.salience_source(&filter, fetch),
            self.recency_source(&filter, fetch, now),
        );

        let lists: Vec<RankedList> = [vector, keyword, salience, recency]
            .into_iter()
            .flatten()
            .filter(|list| !list.entries.is_empty())
            .collect();
        let sources: Vec<RankSource> = lists.iter().map(|l| l.source).collect();

        let fused = fuse(
            &lists,
            &FusionConfig {
                k: self.config.rrf_k,
                limit: Some(request.limit),
            },
        );

        let result = RetrievalResult {
            retrieval_id: Uuid::new_v4(),
            query: request.query.clone(),
            memories: fused,
            sources,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        };

        tracing::debug!(
            user_id = %request.user_id,
            retrieval_id = %result.retrieval_id,
            returned = result.memories.len(),
            sources = ?result.sources,
            latency_ms = result.latency_ms,
            "retrieval complete"
        );
        publish_best_effort(
            self.events.as_ref(),
            DomainEvent::retrieval_performed(
                &request.user_id,
                result.retrieval_id,
                result.memories.len(),
            ),
        );

        Ok(result)
    }

    async fn vector_source(
        &self,
        filter: &MemoryFilter,
        query: &str,
        fetch: usize,
    ) -> Option<RankedList> {
        let embedder = self.embedder.as_ref()?;
        let ranked = self
            .bounded(RankSource::Vector, async {
                let embedding = embedder.embed(query).await?;
                self.store.rank_by_vector(filter, &embedding, fetch).await
            })
            .await?;
        Some(RankedList::from_ordered(
            RankSource::Vector,
            self.config.weights.vector,
            ranked.into_iter().map(|(m, s)| (m, Some(s))).collect(),
        ))
    }

    async fn keyword_source(
        &self,
        filter: &MemoryFilter,
        query: &str,
        fetch: usize,
    ) -> Option<RankedList> {
        let ranked = self
            .bounded(RankSource::Keyword, self.store.rank_by_keyword(filter, query, fetch))
            .await?;
        Some(RankedList::from_ordered(
            RankSource::Keyword,
            self.config.weights.keyword,
            ranked.into_iter().map(|(m, s)| (m, Some(s))).collect(),
        ))
    }

    async fn salience_source(&self, filter: &MemoryFilter, fetch: usize) -> Option<RankedList> {
        let ranked = self
            .bounded(RankSource::Salience, self.store.rank_by_salience(filter, fetch))
            .await?;
        Some(RankedList::from_ordered(
            RankSource::Salience,
            self.config.weights.salience,
            ranked
                .into_iter()
                .map(|m| {
                    let salience = m.effective_salience();
                    (m, Some(salience))
                })
                .collect(),
        ))
    }

    async fn recency_source(
        &self,
        filter: &MemoryFilter,
        fetch: usize,
        now: DateTime<Utc>,
    ) -> Option<RankedList> {
        let ranked = self
            .bounded(RankSource::Recency, self.store.rank_by_recency(filter, fetch))
            .await?;
        let half_life = self.config.recency_half_life_hours;
        Some(RankedList::from_ordered(
            RankSource::Recency,
            self.config.weights.recency,
            ranked
                .into_iter()
                .map(|m| {
                    let raw = 1.0 / (1.0 + m.age_hours(now) / half_life);
                    (m, Some(raw))
                })
                .collect(),
        ))
    }

    /// Run one source under its timeout; any failure drops the source
    async fn bounded<T>(
        &self,
        source: RankSource,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.config.source_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            // unsupported/unavailable is expected degradation, not a fault
            Ok(Err(err)) if err.is_degradable() => {
                tracing::debug!(%source, %err, "ranking source not available, dropping");
                None
            }
            Ok(Err(err)) => {
                tracing::warn!(%source, %err, "ranking source failed, dropping");
                None
            }
            Err(_) => {
                tracing::warn!(%source, timeout = ?self.config.source_timeout, "ranking source timed out, dropping");
                None
            }
        }
    }
}
