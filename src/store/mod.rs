//! Storage interfaces
//!
//! The fact store and the key-value cache are external substrates; the
//! engines only consume the traits below. An embedded in-memory reference
//! implementation ships in [`in_memory`] for tests and single-process
//! deployments.
//!
//! # Owner scoping
//! Every query is owner-scoped at the trait level. Cross-owner leakage is
//! a correctness violation, not a tuning issue.
//!
//! # Invariants enforced by implementations
//! - Deleted memories never come back from any query method
//! - `confidence_score` is clamped to [0, 1] on every write
//! - `update_memory` rejects writes whose expected revision is stale

pub mod in_memory;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::constants::UPDATE_RETRY_LIMIT;
use crate::errors::{CoreError, Result};
use crate::types::{Entity, EntityId, EntityLink, LinkId, Memory, MemoryId, MemoryPatch};

pub use in_memory::{InMemoryFactStore, InMemoryKvCache};

/// Owner-scoped store of memories, entities, and links
#[async_trait]
pub trait FactStore: Send + Sync {
    // -- memories ------------------------------------------------------------

    /// Insert a memory together with its embedding (1:1 once ingestion
    /// completes)
    async fn insert_memory(&self, memory: Memory, embedding: Vec<f32>) -> Result<()>;

    async fn get_memory(&self, owner_id: &str, id: &MemoryId) -> Result<Option<Memory>>;

    /// Vector-ranked query over non-deleted memories with confidence above
    /// `min_confidence`, most similar first
    async fn vector_search(
        &self,
        owner_id: &str,
        query: &[f32],
        limit: usize,
        min_confidence: f32,
    ) -> Result<Vec<(Memory, f32)>>;

    /// Lexical ranked-text query over non-deleted memories, best match first
    async fn lexical_search(
        &self,
        owner_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(Memory, f32)>>;

    /// Non-deleted memories created since `since`, newest first
    async fn recent_memories(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
        limit: usize,
        exclude: Option<&MemoryId>,
    ) -> Result<Vec<Memory>>;

    /// All non-deleted memories for an owner (decay pass input)
    async fn list_memories(&self, owner_id: &str) -> Result<Vec<Memory>>;

    /// Atomic access tracking: bump `access_count`, set `last_accessed_at`.
    /// Does not touch the revision counter; it guards field updates, not
    /// counters.
    async fn record_access(&self, owner_id: &str, id: &MemoryId, at: DateTime<Utc>) -> Result<()>;

    /// Revision-checked field update; fails with `Conflict` when
    /// `expected_revision` is stale. Returns the updated memory.
    async fn update_memory(
        &self,
        owner_id: &str,
        id: &MemoryId,
        expected_revision: u64,
        patch: MemoryPatch,
    ) -> Result<Memory>;

    /// All owner ids known to the store (batch job input)
    async fn list_owners(&self) -> Result<Vec<String>>;

    // -- entities ------------------------------------------------------------

    /// Insert or update by (owner, lower-cased name); returns the id the
    /// name resolves to
    async fn upsert_entity(&self, entity: Entity) -> Result<EntityId>;

    async fn get_entity(&self, owner_id: &str, id: &EntityId) -> Result<Option<Entity>>;

    /// Case-insensitive name lookup within the owner
    async fn find_entity_by_name(&self, owner_id: &str, name: &str) -> Result<Option<Entity>>;

    async fn list_entities(&self, owner_id: &str) -> Result<Vec<Entity>>;

    // -- links ---------------------------------------------------------------

    async fn add_link(&self, link: EntityLink) -> Result<LinkId>;

    /// Links where the entity is subject or object
    async fn links_for_entity(
        &self,
        owner_id: &str,
        entity_id: &EntityId,
    ) -> Result<Vec<EntityLink>>;

    /// Every link for the owner in one round trip (adjacency index input)
    async fn all_links(&self, owner_id: &str) -> Result<Vec<EntityLink>>;
}

/// Get/set-with-TTL cache with hash counters and key enumeration
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Increment a hash field, refreshing the hash TTL; returns the new value
    async fn hash_increment(&self, key: &str, field: &str, by: i64, ttl: Duration) -> Result<i64>;

    /// Set a hash field, refreshing the hash TTL
    async fn hash_set(&self, key: &str, field: &str, value: String, ttl: Duration) -> Result<()>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// All live keys starting with `prefix`
    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Read-modify-write with optimistic versioning
///
/// Re-reads the memory and re-applies `build_patch` on each conflict, up
/// to the retry budget. `build_patch` returning None means the memory is
/// already in the desired state and no write is issued. This is what
/// makes repeated contradiction resolution and decay passes idempotent.
///
/// Returns the final memory, or None when the id does not exist.
pub async fn update_with_retry<F>(
    store: &dyn FactStore,
    owner_id: &str,
    id: &MemoryId,
    build_patch: F,
) -> Result<Option<Memory>>
where
    F: Fn(&Memory) -> Option<MemoryPatch> + Send + Sync,
{
    for attempt in 0..UPDATE_RETRY_LIMIT {
        let Some(current) = store.get_memory(owner_id, id).await? else {
            return Ok(None);
        };

        let Some(patch) = build_patch(&current) else {
            return Ok(Some(current));
        };

        match store
            .update_memory(owner_id, id, current.revision, patch)
            .await
        {
            Ok(updated) => return Ok(Some(updated)),
            Err(err) if err.is_conflict() => {
                debug!(memory_id = %id, attempt, "revision conflict, retrying update");
            }
            Err(err) => return Err(err),
        }
    }

    Err(CoreError::Storage(format!(
        "update of memory {id} exhausted {UPDATE_RETRY_LIMIT} retries"
    )))
}
