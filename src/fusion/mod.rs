//! Reciprocal Rank Fusion over multiple ranking sources
//!
//! Each source contributes `weight / (k + rank)` per appearance of a memory;
//! contributions sum per memory id and the fused list is sorted by that sum.
//! Rank-based fusion is robust to sources whose raw scores live on
//! incomparable scales (cosine similarity vs BM25-style relevance vs plain
//! orderings), which is exactly the situation the retrieval service is in.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Memory, MemoryId, RankSource};

/// RRF constant `k`. Higher values flatten the difference between top and
/// lower ranks; 60 is the value from the original RRF paper.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Configuration for rank fusion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// RRF constant (k parameter)
    pub k: f32,
    /// Truncate the fused list to this many entries (None = keep all)
    pub limit: Option<usize>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_RRF_K,
            limit: None,
        }
    }
}

/// One entry of a per-source ranking
#[derive(Debug, Clone)]
pub struct RankedEntry {
    pub memory: Memory,
    /// 1-based rank within the source
    pub rank: usize,
    /// The source's native score, when it has one
    pub raw_score: Option<f32>,
}

/// A complete ranking from one source, with its fusion weight
#[derive(Debug, Clone)]
pub struct RankedList {
    pub source: RankSource,
    pub weight: f32,
    pub entries: Vec<RankedEntry>,
}

impl RankedList {
    /// Build a ranked list from memories already ordered best-first
    pub fn from_ordered(
        source: RankSource,
        weight: f32,
        ordered: Vec<(Memory, Option<f32>)>,
    ) -> Self {
        let entries = ordered
            .into_iter()
            .enumerate()
            .map(|(i, (memory, raw_score))| RankedEntry {
                memory,
                rank: i + 1,
                raw_score,
            })
            .collect();
        Self {
            source,
            weight,
            entries,
        }
    }
}

/// A memory in the fused output, with full per-source provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedMemory {
    pub memory: Memory,
    /// Summed RRF score across sources
    pub fused_score: f32,
    /// 1-based rank in the fused list
    pub rank: usize,
    /// Rank this memory held in each source it appeared in
    pub source_ranks: HashMap<RankSource, usize>,
    /// Native score per source, where the source had one
    pub source_scores: HashMap<RankSource, f32>,
}

impl FusedMemory {
    /// The single source that contributed most to the fused score
    pub fn dominant_source(&self) -> Option<RankSource> {
        self.source_ranks
            .iter()
            .min_by_key(|(_, rank)| **rank)
            .map(|(source, _)| *source)
    }
}

/// Fuse per-source rankings into one list
///
/// Deterministic: ties on fused score break by memory id, so repeated calls
/// over the same inputs produce byte-identical output. Every memory present
/// in at least one input list appears in the output with a positive score.
pub fn fuse(lists: &[RankedList], config: &FusionConfig) -> Vec<FusedMemory> {
    struct Accum {
        memory: Memory,
        score: f32,
        source_ranks: HashMap<RankSource, usize>,
        source_scores: HashMap<RankSource, f32>,
    }

    let mut by_id: HashMap<MemoryId, Accum> = HashMap::new();

    for list in lists {
        for entry in &list.entries {
            let contribution = list.weight / (config.k + entry.rank as f32);
            let accum = by_id
                .entry(entry.memory.id)
                .or_insert_with(|| Accum {
                    memory: entry.memory.clone(),
                    score: 0.0,
                    source_ranks: HashMap::new(),
                    source_scores: HashMap::new(),
                });
            accum.score += contribution;
            accum.source_ranks.insert(list.source, entry.rank);
            if let Some(raw) = entry.raw_score {
                accum.source_scores.insert(list.source, raw);
            }
        }
    }

    let mut fused: Vec<Accum> = by_id.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });

    if let Some(limit) = config.limit {
        fused.truncate(limit);
    }

    fused
        .into_iter()
        .enumerate()
        .map(|(i, accum)| FusedMemory {
            memory: accum.memory,
            fused_score: accum.score,
            rank: i + 1,
            source_ranks: accum.source_ranks,
            source_scores: accum.source_scores,
        })
        .collect()
}
