//! Confidence Decay Manager
//!
//! Periodic aging of facts: confidence decays exponentially with days
//! since last access, important memories keep a protected floor, and
//! memories that fall below the archive threshold are soft-deleted with
//! their content retained.
//!
//! Passes are idempotent: each write stamps the memory with the decay
//! time, the next pass only ages the interval since then, and deltas
//! under the write threshold are skipped entirely. Re-running a pass
//! moments later changes nothing.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::constants::{
    ARCHIVE_THRESHOLD, ARCHIVED_REASON_LOW_CONFIDENCE, CONFIDENCE_DECAY_RATE,
    DECAY_MIN_CONFIDENCE, DECAY_WRITE_THRESHOLD, IMPORTANCE_PROTECTED, PROTECTED_CONFIDENCE_FLOOR,
};
use crate::errors::Result;
use crate::store::{update_with_retry, FactStore};
use crate::types::{days_between, Memory, MemoryPatch};

/// Aggregate outcome of one decay pass
///
/// Per-owner failures are isolated and counted; they never abort the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecayStats {
    pub owners_processed: usize,
    pub owners_failed: usize,
    pub memories_examined: usize,
    pub memories_updated: usize,
    pub memories_archived: usize,
}

impl DecayStats {
    fn absorb(&mut self, other: &DecayStats) {
        self.memories_examined += other.memories_examined;
        self.memories_updated += other.memories_updated;
        self.memories_archived += other.memories_archived;
    }
}

/// Decay the confidence of a memory by days since last access
///
/// Pure function so the curve is testable in isolation:
/// - monotonically non-increasing in `days`
/// - never exceeds the pre-decay confidence
/// - floors at 0.3 when importance exceeds 0.7
///
/// This is the one place the curve is computed; the manager calls it with
/// its configured rate.
pub fn decayed_confidence(
    confidence: f32,
    importance: f32,
    days_since_access: f64,
    decay_rate: f64,
) -> f32 {
    let decayed = confidence * (-decay_rate * days_since_access.max(0.0)).exp() as f32;
    if importance > IMPORTANCE_PROTECTED {
        // The floor never raises confidence above its pre-decay value
        decayed.max(PROTECTED_CONFIDENCE_FLOOR.min(confidence))
    } else {
        decayed
    }
}

/// Batch manager that ages and archives memories across all owners
pub struct DecayManager {
    store: Arc<dyn FactStore>,
    decay_rate: f64,
}

impl DecayManager {
    pub fn new(store: Arc<dyn FactStore>) -> Self {
        Self {
            store,
            decay_rate: CONFIDENCE_DECAY_RATE,
        }
    }

    pub fn with_decay_rate(mut self, rate: f64) -> Self {
        self.decay_rate = rate;
        self
    }

    /// Run one decay pass over every owner in the store
    pub async fn decay_pass(&self) -> DecayStats {
        let mut stats = DecayStats::default();

        let owners = match self.store.list_owners().await {
            Ok(owners) => owners,
            Err(err) => {
                warn!(error = %err, "decay pass could not enumerate owners");
                return stats;
            }
        };

        for owner_id in owners {
            match self.decay_owner(&owner_id).await {
                Ok(owner_stats) => {
                    stats.owners_processed += 1;
                    stats.absorb(&owner_stats);
                }
                Err(err) => {
                    stats.owners_failed += 1;
                    warn!(owner_id, error = %err, "decay failed for owner, skipping");
                }
            }
        }

        info!(
            owners = stats.owners_processed,
            failed = stats.owners_failed,
            updated = stats.memories_updated,
            archived = stats.memories_archived,
            "decay pass complete"
        );
        stats
    }

    async fn decay_owner(&self, owner_id: &str) -> Result<DecayStats> {
        let mut stats = DecayStats::default();
        let now = Utc::now();

        for memory in self.store.list_memories(owner_id).await? {
            stats.memories_examined += 1;

            // The patch is recomputed from the freshest read on every retry,
            // so a concurrent write cannot be clobbered with stale numbers.
            let after_decay =
                update_with_retry(self.store.as_ref(), owner_id, &memory.id, |current| {
                    if current.deleted || current.confidence_score <= DECAY_MIN_CONFIDENCE {
                        return None;
                    }
                    // Decay resumes from the later of last access and last
                    // decay. Successive passes then multiply into the same
                    // curve one big pass would produce, instead of re-applying
                    // the full elapsed time to an already-decayed value.
                    let anchor = match current.last_decayed_at {
                        Some(decayed_at) => decayed_at.max(current.last_accessed_at),
                        None => current.last_accessed_at,
                    };
                    let new_confidence = decayed_confidence(
                        current.confidence_score,
                        current.importance(),
                        days_between(anchor, now),
                        self.decay_rate,
                    );

                    // Sub-threshold deltas are skipped to avoid write
                    // amplification; a rerun moments later is a no-op
                    if (new_confidence - current.confidence_score).abs() <= DECAY_WRITE_THRESHOLD {
                        return None;
                    }
                    Some(MemoryPatch {
                        confidence_score: Some(new_confidence),
                        last_decayed_at: Some(now),
                        ..Default::default()
                    })
                })
                .await?;

            let Some(after_decay) = after_decay else {
                continue; // memory vanished between list and update
            };
            if after_decay.revision != memory.revision {
                stats.memories_updated += 1;
            }

            let effective = after_decay.confidence_score;
            if effective < ARCHIVE_THRESHOLD && !after_decay.deleted {
                self.archive(owner_id, &memory).await?;
                stats.memories_archived += 1;
                debug!(memory_id = %memory.id, confidence = effective, "archived low-confidence memory");
            }
        }

        Ok(stats)
    }

    /// Soft delete: the content is retained, only visibility changes
    async fn archive(&self, owner_id: &str, memory: &Memory) -> Result<()> {
        update_with_retry(self.store.as_ref(), owner_id, &memory.id, |current| {
            if current.deleted {
                return None;
            }
            let mut extensions = current.extensions.clone();
            extensions.archived_reason = Some(ARCHIVED_REASON_LOW_CONFIDENCE.to_string());
            extensions.archived_at = Some(Utc::now());
            Some(MemoryPatch {
                deleted: Some(true),
                extensions: Some(extensions),
                ..Default::default()
            })
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decay_monotonic_in_days() {
        let mut previous = decayed_confidence(1.0, 0.5, 0.0, CONFIDENCE_DECAY_RATE);
        for days in 1..365 {
            let current = decayed_confidence(1.0, 0.5, days as f64, CONFIDENCE_DECAY_RATE);
            assert!(current <= previous, "confidence rose at day {days}");
            previous = current;
        }
    }

    #[test]
    fn test_decay_never_exceeds_input() {
        assert!(decayed_confidence(0.8, 0.5, 0.0, CONFIDENCE_DECAY_RATE) <= 0.8);
        assert!(decayed_confidence(0.8, 0.9, 1000.0, CONFIDENCE_DECAY_RATE) <= 0.8);
        // Negative elapsed time clamps to zero decay
        assert!(decayed_confidence(0.8, 0.5, -5.0, CONFIDENCE_DECAY_RATE) <= 0.8);
    }

    #[test]
    fn test_protected_floor() {
        // Importance above the protection threshold floors at 0.3
        let floored = decayed_confidence(1.0, 0.8, 10_000.0, CONFIDENCE_DECAY_RATE);
        assert!((floored - PROTECTED_CONFIDENCE_FLOOR).abs() < 1e-6);

        // Unprotected memories decay below the floor
        let unprotected = decayed_confidence(1.0, 0.5, 10_000.0, CONFIDENCE_DECAY_RATE);
        assert!(unprotected < PROTECTED_CONFIDENCE_FLOOR);
    }

    #[test]
    fn test_floor_does_not_raise_low_confidence() {
        // A protected memory already below the floor stays where it is
        let result = decayed_confidence(0.2, 0.9, 0.0, CONFIDENCE_DECAY_RATE);
        assert!(result <= 0.2);
    }

    #[test]
    fn test_rate_parameter_drives_the_curve() {
        // Ten days at rate 0.1 decays by e^-1
        let fast = decayed_confidence(1.0, 0.5, 10.0, 0.1);
        assert!((fast - (-1.0f64).exp() as f32).abs() < 1e-4);

        let slow = decayed_confidence(1.0, 0.5, 10.0, CONFIDENCE_DECAY_RATE);
        assert!(slow > fast);
    }
}
