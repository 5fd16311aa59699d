//! Engram Library
//!
//! Personal-memory retrieval and reasoning engine for a single owner's facts.
//!
//! # Key Features
//! - Hybrid retrieval (vector + lexical) with multi-factor composite ranking
//! - Confidence decay ("forgetting") with soft archival of stale facts
//! - Contradiction detection and resolution between stored facts
//! - Knowledge-graph reasoning (paths, strength, centrality, clustering)
//! - Lazy, TTL-bound insight cache with popularity tracking
//!
//! # Architecture
//! The engines hold no state of their own; they operate against injected
//! handles for the fact store, the key-value cache, and the embedding /
//! reasoning providers. Storage formats and the HTTP surface live outside
//! this crate; the [`store::FactStore`] and [`providers`] traits are the
//! boundary.

pub mod config;
pub mod constants;
pub mod contradiction;
pub mod decay;
pub mod errors;
pub mod graph;
pub mod insights;
pub mod providers;
pub mod ranking;
pub mod similarity;
pub mod store;
pub mod tracing_setup;
pub mod types;

// Re-export dependencies to ensure tests/benchmarks use the same version
pub use chrono;
pub use uuid;

pub use errors::{CoreError, Result};
pub use types::{
    CachedInsight, Entity, EntityId, EntityLink, EntityUsage, LinkId, LinkStatus, Memory,
    MemoryExtensions, MemoryId, MemoryPatch, ScoredMemory,
};
