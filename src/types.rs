//! Type definitions for the memory engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::DEFAULT_IMPORTANCE;

/// Unique identifier for memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)] // Serialize as plain UUID string, not array
pub struct MemoryId(pub Uuid);

impl MemoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for entity links
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub Uuid);

impl LinkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed extension fields for a memory
///
/// Replaces the untyped ad hoc metadata blob of earlier designs with an
/// explicit structure. All cross-reference fields are overwritten, never
/// appended, so repeated contradiction resolution stays idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryExtensions {
    /// Owner-assigned importance in [0, 1]
    #[serde(default = "default_importance")]
    pub importance: f32,

    /// Entity names tagged on this memory by the extraction pipeline
    #[serde(default)]
    pub detected_entities: Vec<String>,

    /// Set when a newer memory superseded this one (temporal update)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<MemoryId>,

    /// Set on the newer memory of a temporal update pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<MemoryId>,

    /// Memories this one contradicts (deduplicated)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contradicts: Vec<MemoryId>,

    /// Memories contradicting this one (deduplicated)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contradicted_by: Vec<MemoryId>,

    /// Why this memory was soft-archived, if it was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_reason: Option<String>,

    /// When this memory was soft-archived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

fn default_importance() -> f32 {
    DEFAULT_IMPORTANCE
}

impl Default for MemoryExtensions {
    fn default() -> Self {
        Self {
            importance: DEFAULT_IMPORTANCE,
            detected_entities: Vec::new(),
            superseded_by: None,
            supersedes: None,
            contradicts: Vec::new(),
            contradicted_by: Vec::new(),
            archived_reason: None,
            archived_at: None,
        }
    }
}

/// A single stored fact owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub owner_id: String,
    pub content: String,

    /// Free-form kind tag ("preference", "event", ...)
    pub kind: String,

    pub extensions: MemoryExtensions,

    /// Decaying [0, 1] measure of how alive this memory is
    pub confidence_score: f32,

    /// How many times retrieval has surfaced this memory
    pub access_count: u32,

    pub last_accessed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,

    /// When the decay pass last aged this memory; decay resumes from the
    /// later of this and `last_accessed_at` so passes compose instead of
    /// compounding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_decayed_at: Option<DateTime<Utc>>,

    /// Event time, when it differs from creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,

    /// Soft-delete flag; deleted memories are excluded from all retrieval
    /// and reasoning
    pub deleted: bool,

    /// Optimistic versioning counter, incremented on every checked update
    pub revision: u64,
}

impl Memory {
    pub fn new(owner_id: &str, content: &str, kind: &str) -> Self {
        let now = Utc::now();
        Self {
            id: MemoryId::new(),
            owner_id: owner_id.to_string(),
            content: content.to_string(),
            kind: kind.to_string(),
            extensions: MemoryExtensions::default(),
            confidence_score: 1.0,
            access_count: 0,
            last_accessed_at: now,
            created_at: now,
            last_decayed_at: None,
            recorded_at: None,
            deleted: false,
            revision: 0,
        }
    }

    pub fn importance(&self) -> f32 {
        self.extensions.importance
    }

    /// Days since creation, clamped at zero for clock skew
    pub fn days_since_created(&self, now: DateTime<Utc>) -> f64 {
        days_between(self.created_at, now)
    }

    /// Days since the last retrieval touched this memory
    pub fn days_since_accessed(&self, now: DateTime<Utc>) -> f64 {
        days_between(self.last_accessed_at, now)
    }
}

/// Fractional days from `earlier` to `now`, never negative
pub fn days_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let secs = (now - earlier).num_milliseconds() as f64 / 1000.0;
    (secs / 86_400.0).max(0.0)
}

/// Partial update applied through a revision-checked store write
///
/// Only the populated fields change; `confidence_score` is clamped to
/// [0, 1] by the store on write.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub confidence_score: Option<f32>,
    pub deleted: Option<bool>,
    pub extensions: Option<MemoryExtensions>,
    pub last_decayed_at: Option<DateTime<Utc>>,
}

impl MemoryPatch {
    pub fn is_empty(&self) -> bool {
        self.confidence_score.is_none()
            && self.deleted.is_none()
            && self.extensions.is_none()
            && self.last_decayed_at.is_none()
    }
}

/// A ranked retrieval result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub id: MemoryId,
    pub content: String,
    pub score: f32,
}

/// A named thing extracted from memories, scoped per owner
///
/// Names are unique per owner with case-insensitive lookup. Entities are
/// never deleted, they only accumulate links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub owner_id: String,
    pub name: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(owner_id: &str, name: &str, kind: &str) -> Self {
        Self {
            id: EntityId::new(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            kind: kind.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle status of an entity link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Active,
    Historical,
}

/// A directed, labeled edge between two entities ("triplet")
///
/// Subject and object always belong to the same owner as the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityLink {
    pub id: LinkId,
    pub owner_id: String,
    pub subject_id: EntityId,

    /// Absent for unary attributes ("John is on vacation")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<EntityId>,

    /// Predicate string ("works with", "is behind schedule", ...)
    pub role: String,

    /// The memory this link was extracted from, when traceable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_memory: Option<MemoryId>,

    pub status: LinkStatus,
    pub created_at: DateTime<Utc>,
}

impl EntityLink {
    pub fn new(owner_id: &str, subject_id: EntityId, object_id: Option<EntityId>, role: &str) -> Self {
        Self {
            id: LinkId::new(),
            owner_id: owner_id.to_string(),
            subject_id,
            object_id,
            role: role.to_string(),
            source_memory: None,
            status: LinkStatus::Active,
            created_at: Utc::now(),
        }
    }

    /// The endpoint opposite `entity_id`, if this link touches it at all
    pub fn other_endpoint(&self, entity_id: &EntityId) -> Option<EntityId> {
        if self.subject_id == *entity_id {
            self.object_id
        } else if self.object_id == Some(*entity_id) {
            Some(self.subject_id)
        } else {
            None
        }
    }
}

/// An entity link with both endpoint names resolved for presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipView {
    pub link: EntityLink,
    pub subject_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_name: Option<String>,
}

/// A per-entity derived bundle cached lazily because it is expensive
/// to compute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedInsight {
    /// None for the uncached empty shell returned on unknown entities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,

    pub entity_name: String,

    /// Graph snapshot, present only when the caller asked for it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<Vec<RelationshipView>>,

    /// Timeline narrative, present only when the caller asked for it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<String>,

    pub cached_at: DateTime<Utc>,
}

impl CachedInsight {
    /// Empty shell for an entity the owner has never mentioned
    pub fn empty_shell(entity_name: &str) -> Self {
        Self {
            entity_id: None,
            entity_name: entity_name.to_string(),
            graph: None,
            timeline: None,
            cached_at: Utc::now(),
        }
    }
}

/// Usage counters behind the popularity query that feeds pre-warming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUsage {
    pub entity_name: String,
    pub count: u64,
    pub last_used: DateTime<Utc>,
}
