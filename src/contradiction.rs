//! Contradiction Detector
//!
//! Cross-checks a new fact against the owner's recent memories through
//! the reasoning provider, then resolves confirmed conflicts by adjusting
//! metadata and confidence. Resolution never deletes content.
//!
//! Provider output is untrusted: findings with out-of-range candidate
//! indices are filtered out individually, and an unparseable response
//! degrades to "no contradictions" instead of failing the batch.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::constants::{
    CONTRADICTION_CANDIDATE_LIMIT, CONTRADICTION_WINDOW_DAYS, PROGRESSION_MARKERS,
    SUPERSEDED_CONFIDENCE,
};
use crate::errors::Result;
use crate::providers::{extract_json, ReasoningProvider};
use crate::store::{update_with_retry, FactStore};
use crate::types::{Memory, MemoryId, MemoryPatch};

/// How a confirmed contradiction is reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMode {
    /// The new fact supersedes the old one (life moved on): the existing
    /// memory's confidence is forced down and both sides are cross-tagged
    TemporalUpdate,
    /// Genuinely conflicting facts: both are cross-tagged, neither
    /// confidence nor deletion changes
    ContradictionNoted,
}

/// One detected conflict between the new content and an existing memory
#[derive(Debug, Clone)]
pub struct ContradictionFinding {
    pub existing_memory_id: MemoryId,
    pub existing_content: String,
    pub reason: String,
    pub severity: String,
    pub temporal_progression: bool,
}

/// Result of a detection run
#[derive(Debug, Clone, Default)]
pub struct ContradictionReport {
    pub has_contradictions: bool,
    pub contradictions: Vec<ContradictionFinding>,
}

/// Raw provider finding before index validation
#[derive(Debug, Deserialize)]
struct RawFinding {
    index: i64,
    reason: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    temporal_progression: bool,
}

/// Detects and resolves contradictions between an owner's facts
pub struct ContradictionDetector {
    store: Arc<dyn FactStore>,
    reasoner: Arc<dyn ReasoningProvider>,
}

impl ContradictionDetector {
    pub fn new(store: Arc<dyn FactStore>, reasoner: Arc<dyn ReasoningProvider>) -> Self {
        Self { store, reasoner }
    }

    /// Compare `new_content` against the owner's recent memories
    ///
    /// Returns immediately without a provider call when there are no
    /// candidates. A provider error propagates; a malformed response
    /// degrades to an empty report.
    pub async fn detect(
        &self,
        owner_id: &str,
        new_content: &str,
        exclude: Option<&MemoryId>,
    ) -> Result<ContradictionReport> {
        let since = Utc::now() - Duration::days(CONTRADICTION_WINDOW_DAYS);
        let candidates = self
            .store
            .recent_memories(owner_id, since, CONTRADICTION_CANDIDATE_LIMIT, exclude)
            .await?;

        if candidates.is_empty() {
            return Ok(ContradictionReport::default());
        }

        let prompt = build_detection_prompt(new_content, &candidates);
        let response = self.reasoner.complete(&prompt).await?;
        let contradictions = parse_findings(&response, &candidates);

        Ok(ContradictionReport {
            has_contradictions: !contradictions.is_empty(),
            contradictions,
        })
    }

    /// Reconcile a confirmed contradiction between two memories
    ///
    /// Safe to call repeatedly: cross-reference fields are overwritten,
    /// not appended, so an already-resolved pair is a no-op. A missing
    /// memory on either side is logged and skipped, never an error.
    pub async fn resolve(
        &self,
        owner_id: &str,
        new_id: &MemoryId,
        existing_id: &MemoryId,
        mode: ResolutionMode,
    ) -> Result<()> {
        match mode {
            ResolutionMode::TemporalUpdate => {
                let new_ref = *new_id;
                let existing = update_with_retry(self.store.as_ref(), owner_id, existing_id, |m| {
                    let already_superseded = m.extensions.superseded_by == Some(new_ref)
                        && (m.confidence_score - SUPERSEDED_CONFIDENCE).abs() < f32::EPSILON;
                    if already_superseded {
                        return None;
                    }
                    let mut extensions = m.extensions.clone();
                    extensions.superseded_by = Some(new_ref);
                    Some(MemoryPatch {
                        confidence_score: Some(SUPERSEDED_CONFIDENCE),
                        extensions: Some(extensions),
                        ..Default::default()
                    })
                })
                .await?;
                if existing.is_none() {
                    warn!(memory_id = %existing_id, "temporal update target missing, skipping");
                    return Ok(());
                }

                let existing_ref = *existing_id;
                let newer = update_with_retry(self.store.as_ref(), owner_id, new_id, |m| {
                    if m.extensions.supersedes == Some(existing_ref) {
                        return None;
                    }
                    let mut extensions = m.extensions.clone();
                    extensions.supersedes = Some(existing_ref);
                    Some(MemoryPatch {
                        extensions: Some(extensions),
                        ..Default::default()
                    })
                })
                .await?;
                if newer.is_none() {
                    warn!(memory_id = %new_id, "superseding memory missing, skipping");
                }
            }
            ResolutionMode::ContradictionNoted => {
                self.tag_contradiction(owner_id, existing_id, new_id, Direction::ContradictedBy)
                    .await?;
                self.tag_contradiction(owner_id, new_id, existing_id, Direction::Contradicts)
                    .await?;
            }
        }

        debug!(
            owner_id,
            new = %new_id,
            existing = %existing_id,
            ?mode,
            "contradiction resolved"
        );
        Ok(())
    }

    async fn tag_contradiction(
        &self,
        owner_id: &str,
        target: &MemoryId,
        reference: &MemoryId,
        direction: Direction,
    ) -> Result<()> {
        let reference = *reference;
        let result = update_with_retry(self.store.as_ref(), owner_id, target, |m| {
            let set = match direction {
                Direction::Contradicts => &m.extensions.contradicts,
                Direction::ContradictedBy => &m.extensions.contradicted_by,
            };
            if set.contains(&reference) {
                return None;
            }
            let mut extensions = m.extensions.clone();
            match direction {
                Direction::Contradicts => extensions.contradicts.push(reference),
                Direction::ContradictedBy => extensions.contradicted_by.push(reference),
            }
            Some(MemoryPatch {
                extensions: Some(extensions),
                ..Default::default()
            })
        })
        .await?;

        if result.is_none() {
            warn!(memory_id = %target, "contradiction tag target missing, skipping");
        }
        Ok(())
    }

    /// Heuristic mode choice: progression language in either text suggests
    /// a temporal update rather than a genuine conflict
    pub fn suggest_mode(new_content: &str, existing_content: &str) -> ResolutionMode {
        if has_progression_language(new_content) || has_progression_language(existing_content) {
            ResolutionMode::TemporalUpdate
        } else {
            ResolutionMode::ContradictionNoted
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Contradicts,
    ContradictedBy,
}

fn has_progression_language(text: &str) -> bool {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    PROGRESSION_MARKERS.iter().any(|marker| {
        if marker.contains(' ') {
            lower.contains(marker)
        } else {
            words.contains(marker)
        }
    })
}

/// Candidate list is indexed so the provider can reference memories by
/// position instead of echoing ids back
fn build_detection_prompt(new_content: &str, candidates: &[Memory]) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(
        "Compare the new statement against each existing memory and report \
         contradictions.\n\nNew statement:\n",
    );
    prompt.push_str(new_content);
    prompt.push_str("\n\nExisting memories:\n");
    for (index, memory) in candidates.iter().enumerate() {
        prompt.push_str(&format!("{index}. {}\n", memory.content));
    }
    prompt.push_str(
        "\nRespond with a JSON array, one entry per contradicting memory: \
         [{\"index\": <memory number>, \"reason\": \"...\", \
         \"severity\": \"low|medium|high\", \"temporal_progression\": true|false}]\n\
         Respond with [] if nothing contradicts.",
    );
    prompt
}

/// Parse and validate provider findings against the candidate batch
///
/// Invalid entries are discarded individually; an unparseable payload
/// yields an empty list.
fn parse_findings(response: &str, candidates: &[Memory]) -> Vec<ContradictionFinding> {
    let Some(value) = extract_json(response) else {
        warn!("contradiction response carried no JSON payload, treating as no result");
        return Vec::new();
    };

    let raw: Vec<RawFinding> = match serde_json::from_value(value) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(error = %err, "contradiction response failed to deserialize, treating as no result");
            return Vec::new();
        }
    };

    raw.into_iter()
        .filter_map(|finding| {
            let index = usize::try_from(finding.index).ok()?;
            let candidate = candidates.get(index);
            if candidate.is_none() {
                warn!(index = finding.index, "discarding out-of-range contradiction index");
            }
            let candidate = candidate?;
            Some(ContradictionFinding {
                existing_memory_id: candidate.id,
                existing_content: candidate.content.clone(),
                reason: finding.reason,
                severity: finding.severity,
                temporal_progression: finding.temporal_progression,
            })
        })
        .collect()
}
