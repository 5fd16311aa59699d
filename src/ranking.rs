//! Composite Ranking Engine
//!
//! Hybrid retrieval over a single owner's memories:
//! 1. Vector branch - semantic candidates scored with a six-factor
//!    composite (similarity, recency, frequency, importance, confidence,
//!    contextual entity overlap)
//! 2. Lexical branch - independent keyword-ranked search
//! 3. Merge - memories in both branches blend 0.7×vector + 0.3×lexical;
//!    single-branch memories keep their branch score
//!
//! The two branches fan out concurrently and merge deterministically once
//! both complete. Access tracking on returned ids is best-effort: a
//! failure there is logged, never surfaced to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use tracing::{debug, warn};

use crate::constants::{
    ACCESS_DECAY_RATE, CANDIDATE_MULTIPLIER, LEXICAL_MERGE_WEIGHT, MIN_SEARCH_CONFIDENCE,
    RECENCY_DECAY_RATE, VECTOR_MERGE_WEIGHT, WEIGHT_CONFIDENCE, WEIGHT_CONTEXT, WEIGHT_FREQUENCY,
    WEIGHT_IMPORTANCE, WEIGHT_RECENCY, WEIGHT_SIMILARITY,
};
use crate::errors::{CoreError, Result};
use crate::providers::EmbeddingProvider;
use crate::store::FactStore;
use crate::types::{Memory, MemoryId, ScoredMemory};

/// Weights for the six composite ranking factors
///
/// Defaults sum to 1.0 so composite scores stay in [0, 1] before the
/// merge step.
#[derive(Debug, Clone)]
pub struct RankingWeights {
    pub similarity: f32,
    pub recency: f32,
    pub frequency: f32,
    pub importance: f32,
    pub confidence: f32,
    pub context: f32,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            similarity: WEIGHT_SIMILARITY,
            recency: WEIGHT_RECENCY,
            frequency: WEIGHT_FREQUENCY,
            importance: WEIGHT_IMPORTANCE,
            confidence: WEIGHT_CONFIDENCE,
            context: WEIGHT_CONTEXT,
        }
    }
}

/// Intermediate merge slot keyed by memory id
struct MergeSlot {
    content: String,
    created_at: DateTime<Utc>,
    vector_score: Option<f32>,
    lexical_score: Option<f32>,
}

/// Hybrid retrieval engine with composite scoring
pub struct RankingEngine {
    store: Arc<dyn FactStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    weights: RankingWeights,
}

impl RankingEngine {
    pub fn new(store: Arc<dyn FactStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            weights: RankingWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: RankingWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Top-`limit` memories for a query, best first
    ///
    /// An embedding provider failure fails the whole call; there is no
    /// local fallback. An empty corpus yields an empty list, not an error.
    pub async fn search(
        &self,
        owner_id: &str,
        query: &str,
        limit: usize,
        context_entities: &[String],
    ) -> Result<Vec<ScoredMemory>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).await?;
        let candidate_limit = limit * CANDIDATE_MULTIPLIER;

        // Fan out both branches, merge once both complete
        let (vector_result, lexical_result) = tokio::join!(
            self.store
                .vector_search(owner_id, &query_vector, candidate_limit, MIN_SEARCH_CONFIDENCE),
            self.store.lexical_search(owner_id, query, candidate_limit),
        );
        let vector_candidates = vector_result?;
        let lexical_candidates = lexical_result?;

        let now = Utc::now();
        let max_access_count = vector_candidates
            .iter()
            .map(|(m, _)| m.access_count)
            .max()
            .unwrap_or(0);

        let mut slots: HashMap<MemoryId, MergeSlot> = HashMap::new();

        for (memory, similarity) in &vector_candidates {
            let score = self.composite_score(
                memory,
                *similarity,
                max_access_count,
                context_entities,
                now,
            );
            slots.insert(
                memory.id,
                MergeSlot {
                    content: memory.content.clone(),
                    created_at: memory.created_at,
                    vector_score: Some(score),
                    lexical_score: None,
                },
            );
        }

        for (memory, score) in &lexical_candidates {
            slots
                .entry(memory.id)
                .and_modify(|slot| slot.lexical_score = Some(*score))
                .or_insert_with(|| MergeSlot {
                    content: memory.content.clone(),
                    created_at: memory.created_at,
                    vector_score: None,
                    lexical_score: Some(*score),
                });
        }

        let mut merged: Vec<(MemoryId, MergeSlot, f32)> = slots
            .into_iter()
            .map(|(id, slot)| {
                let score = match (slot.vector_score, slot.lexical_score) {
                    (Some(v), Some(l)) => VECTOR_MERGE_WEIGHT * v + LEXICAL_MERGE_WEIGHT * l,
                    (Some(v), None) => v,
                    (None, Some(l)) => l,
                    (None, None) => 0.0,
                };
                (id, slot, score)
            })
            .collect();

        // Deterministic ordering: score, then newer created_at, then id
        merged.sort_by(|a, b| {
            OrderedFloat(b.2)
                .cmp(&OrderedFloat(a.2))
                .then(b.1.created_at.cmp(&a.1.created_at))
                .then(a.0.cmp(&b.0))
        });
        merged.truncate(limit);

        let results: Vec<ScoredMemory> = merged
            .into_iter()
            .map(|(id, slot, score)| ScoredMemory {
                id,
                content: slot.content,
                score,
            })
            .collect();

        // Best-effort access tracking; a failed write never fails the search
        for result in &results {
            if let Err(err) = self.store.record_access(owner_id, &result.id, now).await {
                warn!(memory_id = %result.id, error = %err, "access tracking failed");
            }
        }

        debug!(
            owner_id,
            returned = results.len(),
            vector_candidates = vector_candidates.len(),
            lexical_candidates = lexical_candidates.len(),
            "hybrid search complete"
        );
        Ok(results)
    }

    /// `search` with a deadline that aborts both in-flight branches together
    pub async fn search_with_timeout(
        &self,
        owner_id: &str,
        query: &str,
        limit: usize,
        context_entities: &[String],
        deadline: Duration,
    ) -> Result<Vec<ScoredMemory>> {
        tokio::time::timeout(deadline, self.search(owner_id, query, limit, context_entities))
            .await
            .map_err(|_| CoreError::Timeout(deadline.as_millis() as u64))?
    }

    /// Weighted blend of the six ranking factors for one candidate
    ///
    /// `max_access_count` is the batch maximum used to normalize the
    /// frequency factor; zero means no candidate has ever been accessed
    /// and the factor contributes nothing.
    pub fn composite_score(
        &self,
        memory: &Memory,
        similarity: f32,
        max_access_count: u32,
        context_entities: &[String],
        now: DateTime<Utc>,
    ) -> f32 {
        let recency = (-RECENCY_DECAY_RATE * memory.days_since_created(now)).exp() as f32;

        let frequency = if max_access_count == 0 || memory.access_count == 0 {
            0.0
        } else {
            let normalized = ((1.0 + memory.access_count as f64).ln()
                / (1.0 + max_access_count as f64).ln()) as f32;
            let staleness = (-ACCESS_DECAY_RATE * memory.days_since_accessed(now)).exp() as f32;
            normalized * staleness
        };

        let context_boost = context_overlap(context_entities, &memory.extensions.detected_entities);

        self.weights.similarity * similarity
            + self.weights.recency * recency
            + self.weights.frequency * frequency
            + self.weights.importance * memory.importance()
            + self.weights.confidence * memory.confidence_score
            + self.weights.context * context_boost
    }
}

/// Fraction of context entities that textually overlap the memory's
/// tagged entities (case-insensitive, substring in either direction)
fn context_overlap(context_entities: &[String], detected: &[String]) -> f32 {
    if context_entities.is_empty() || detected.is_empty() {
        return 0.0;
    }
    let detected_lower: Vec<String> = detected.iter().map(|d| d.to_lowercase()).collect();
    let matched = context_entities
        .iter()
        .filter(|c| {
            let c = c.to_lowercase();
            detected_lower
                .iter()
                .any(|d| d.contains(&c) || c.contains(d))
        })
        .count();
    matched as f32 / context_entities.len() as f32
}
