//! Documented constants for the memory engine
//!
//! All tunable parameters in one place. Centralizing constants prevents
//! magic numbers scattered through the scoring and decay code and makes
//! tuning easier.

// =============================================================================
// COMPOSITE RANKING WEIGHTS
// The six factors must sum to 1.0 so composite scores stay comparable
// across queries.
// =============================================================================

/// Weight for raw vector similarity in the composite score
pub const WEIGHT_SIMILARITY: f32 = 0.35;

/// Weight for recency (`exp(-0.05 × days_since_created)`)
pub const WEIGHT_RECENCY: f32 = 0.20;

/// Weight for access frequency, normalized against the batch maximum
pub const WEIGHT_FREQUENCY: f32 = 0.15;

/// Weight for the owner-assigned importance of a memory
pub const WEIGHT_IMPORTANCE: f32 = 0.15;

/// Weight for the current confidence score
pub const WEIGHT_CONFIDENCE: f32 = 0.10;

/// Weight for contextual entity overlap with the caller's context
pub const WEIGHT_CONTEXT: f32 = 0.05;

/// Exponential rate for the recency factor (per day since creation)
pub const RECENCY_DECAY_RATE: f64 = 0.05;

/// Exponential rate for the access-staleness factor (per day since access)
pub const ACCESS_DECAY_RATE: f64 = 0.05;

/// Vector-branch candidate multiplier
///
/// When searching for N results the vector branch fetches N × this many
/// candidates, then the composite score filters down to N.
pub const CANDIDATE_MULTIPLIER: usize = 3;

/// Minimum confidence for a memory to be a retrieval candidate
///
/// Memories below this are effectively forgotten for search purposes even
/// before the decay pass archives them.
pub const MIN_SEARCH_CONFIDENCE: f32 = 0.2;

/// Merge weight for the vector branch when a memory appears in both branches
pub const VECTOR_MERGE_WEIGHT: f32 = 0.7;

/// Merge weight for the lexical branch when a memory appears in both branches
pub const LEXICAL_MERGE_WEIGHT: f32 = 0.3;

/// Default importance when a memory carries none
pub const DEFAULT_IMPORTANCE: f32 = 0.5;

// =============================================================================
// CONFIDENCE DECAY
// =============================================================================

/// Exponential decay rate for confidence (per day since last access)
pub const CONFIDENCE_DECAY_RATE: f64 = 0.01;

/// Memories at or below this confidence are skipped by the decay pass
pub const DECAY_MIN_CONFIDENCE: f32 = 0.1;

/// Minimum confidence delta worth persisting
///
/// Skipping smaller deltas avoids write amplification and makes the decay
/// pass idempotent over short intervals.
pub const DECAY_WRITE_THRESHOLD: f32 = 0.05;

/// Importance above which a memory is protected from deep decay
pub const IMPORTANCE_PROTECTED: f32 = 0.7;

/// Confidence floor for protected (importance > 0.7) memories
pub const PROTECTED_CONFIDENCE_FLOOR: f32 = 0.3;

/// Memories below this confidence are soft-archived after decay
pub const ARCHIVE_THRESHOLD: f32 = 0.15;

/// Archival reason recorded on soft-deleted low-confidence memories
pub const ARCHIVED_REASON_LOW_CONFIDENCE: &str = "low_confidence";

// =============================================================================
// CONTRADICTION DETECTION
// =============================================================================

/// How far back to look for contradiction candidates (days)
pub const CONTRADICTION_WINDOW_DAYS: i64 = 90;

/// Maximum number of candidate memories sent to the reasoning provider
pub const CONTRADICTION_CANDIDATE_LIMIT: usize = 50;

/// Confidence forced onto a memory superseded by a temporal update
pub const SUPERSEDED_CONFIDENCE: f32 = 0.3;

/// Progression language suggesting a temporal update rather than a
/// genuine contradiction
pub const PROGRESSION_MARKERS: &[&str] =
    &["was", "now", "promoted", "previously", "used to", "became"];

// =============================================================================
// KNOWLEDGE GRAPH
// =============================================================================

/// Weight for the distinct-relationship-type component of link strength
pub const STRENGTH_TYPE_WEIGHT: f32 = 0.3;

/// Weight for the recency-decayed component of link strength
pub const STRENGTH_RECENCY_WEIGHT: f32 = 0.7;

/// Distinct role count at which the type component saturates
pub const STRENGTH_TYPE_SATURATION: f32 = 3.0;

/// Recency decay scale for links (days): each link contributes
/// `exp(-days / 30)` to the strength sum
pub const LINK_RECENCY_DECAY_DAYS: f64 = 30.0;

/// Strength decay applied to hops past first-degree connections in
/// intent-driven path building
pub const EXTENDED_HOP_DECAY: f32 = 0.7;

/// Path-length scale for the final re-rank: `exp(-len / 5)`
pub const PATH_LENGTH_DECAY: f32 = 5.0;

/// Base strength for an edge whose role matches expertise language
pub const EXPERTISE_ROLE_STRENGTH: f32 = 1.0;

/// Base strength for any other edge in intent-driven path building
pub const GENERIC_ROLE_STRENGTH: f32 = 0.6;

/// Role keywords that indicate expertise or capability
pub const EXPERTISE_KEYWORDS: &[&str] = &[
    "knows",
    "expert",
    "skilled",
    "specializes",
    "experienced",
    "works on",
    "built",
    "maintains",
    "teaches",
    "leads",
];

// =============================================================================
// INSIGHT CACHE
// =============================================================================

/// Time-to-live for cached insights (seconds)
pub const INSIGHT_TTL_SECS: u64 = 3600;

/// Time-to-live for per-entity usage counters (seconds)
pub const USAGE_TTL_SECS: u64 = 7 * 24 * 3600;

/// Minimum usage count for an entity to be considered popular
pub const POPULARITY_MIN_MENTIONS: u64 = 2;

// =============================================================================
// WRITE COORDINATION
// =============================================================================

/// Retry budget for revision-checked updates that hit a conflict
pub const UPDATE_RETRY_LIMIT: usize = 3;

/// Default timeout applied by `search_with_timeout` (milliseconds)
pub const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 5000;
