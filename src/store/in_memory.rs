//! Embedded in-memory reference implementation of the storage traits
//!
//! Backs the test suites and single-process deployments. Query semantics
//! (deleted filtering, confidence clamping, deterministic ordering,
//! revision checks) match what any production substrate must provide.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use rust_stemmers::{Algorithm, Stemmer};

use crate::errors::{CoreError, Result};
use crate::similarity::cosine_similarity;
use crate::store::{FactStore, KvCache};
use crate::types::{Entity, EntityId, EntityLink, LinkId, Memory, MemoryId, MemoryPatch};

#[derive(Default)]
struct OwnerShard {
    memories: HashMap<MemoryId, Memory>,
    embeddings: HashMap<MemoryId, Vec<f32>>,
    entities: HashMap<EntityId, Entity>,
    /// Lower-cased name → entity id (case-insensitive lookup)
    name_index: HashMap<String, EntityId>,
    links: Vec<EntityLink>,
}

/// In-memory fact store, sharded per owner
pub struct InMemoryFactStore {
    shards: RwLock<HashMap<String, OwnerShard>>,
    stemmer: Stemmer,
}

impl InMemoryFactStore {
    pub fn new() -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    fn stem_tokens(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| self.stemmer.stem(w).to_string())
            .collect()
    }

    /// Deterministic candidate ordering: score desc, then newer created_at,
    /// then id. The secondary key resolves score ties so repeated searches
    /// return stable results.
    fn sort_scored(results: &mut [(Memory, f32)]) {
        results.sort_by(|a, b| {
            OrderedFloat(b.1)
                .cmp(&OrderedFloat(a.1))
                .then(b.0.created_at.cmp(&a.0.created_at))
                .then(a.0.id.cmp(&b.0.id))
        });
    }
}

impl Default for InMemoryFactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FactStore for InMemoryFactStore {
    async fn insert_memory(&self, mut memory: Memory, embedding: Vec<f32>) -> Result<()> {
        memory.confidence_score = memory.confidence_score.clamp(0.0, 1.0);
        let mut shards = self.shards.write();
        let shard = shards.entry(memory.owner_id.clone()).or_default();
        shard.embeddings.insert(memory.id, embedding);
        shard.memories.insert(memory.id, memory);
        Ok(())
    }

    async fn get_memory(&self, owner_id: &str, id: &MemoryId) -> Result<Option<Memory>> {
        let shards = self.shards.read();
        Ok(shards
            .get(owner_id)
            .and_then(|shard| shard.memories.get(id))
            .cloned())
    }

    async fn vector_search(
        &self,
        owner_id: &str,
        query: &[f32],
        limit: usize,
        min_confidence: f32,
    ) -> Result<Vec<(Memory, f32)>> {
        let shards = self.shards.read();
        let Some(shard) = shards.get(owner_id) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<(Memory, f32)> = shard
            .memories
            .values()
            .filter(|m| !m.deleted && m.confidence_score > min_confidence)
            .filter_map(|m| {
                let embedding = shard.embeddings.get(&m.id)?;
                Some((m.clone(), cosine_similarity(query, embedding)))
            })
            .collect();

        Self::sort_scored(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn lexical_search(
        &self,
        owner_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(Memory, f32)>> {
        let query_tokens: HashSet<String> = self.stem_tokens(query).into_iter().collect();
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let shards = self.shards.read();
        let Some(shard) = shards.get(owner_id) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<(Memory, f32)> = shard
            .memories
            .values()
            .filter(|m| !m.deleted)
            .filter_map(|m| {
                let content_tokens: HashSet<String> =
                    self.stem_tokens(&m.content).into_iter().collect();
                let overlap = query_tokens.intersection(&content_tokens).count();
                if overlap == 0 {
                    return None;
                }
                let score = overlap as f32 / query_tokens.len() as f32;
                Some((m.clone(), score))
            })
            .collect();

        Self::sort_scored(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn recent_memories(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
        limit: usize,
        exclude: Option<&MemoryId>,
    ) -> Result<Vec<Memory>> {
        let shards = self.shards.read();
        let Some(shard) = shards.get(owner_id) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<Memory> = shard
            .memories
            .values()
            .filter(|m| !m.deleted && m.created_at >= since && Some(&m.id) != exclude)
            .cloned()
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        results.truncate(limit);
        Ok(results)
    }

    async fn list_memories(&self, owner_id: &str) -> Result<Vec<Memory>> {
        let shards = self.shards.read();
        let Some(shard) = shards.get(owner_id) else {
            return Ok(Vec::new());
        };
        let mut results: Vec<Memory> = shard
            .memories
            .values()
            .filter(|m| !m.deleted)
            .cloned()
            .collect();
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(results)
    }

    async fn record_access(&self, owner_id: &str, id: &MemoryId, at: DateTime<Utc>) -> Result<()> {
        let mut shards = self.shards.write();
        let memory = shards
            .get_mut(owner_id)
            .and_then(|shard| shard.memories.get_mut(id))
            .ok_or_else(|| CoreError::not_found("memory", id.to_string()))?;
        memory.access_count += 1;
        memory.last_accessed_at = at;
        Ok(())
    }

    async fn update_memory(
        &self,
        owner_id: &str,
        id: &MemoryId,
        expected_revision: u64,
        patch: MemoryPatch,
    ) -> Result<Memory> {
        let mut shards = self.shards.write();
        let memory = shards
            .get_mut(owner_id)
            .and_then(|shard| shard.memories.get_mut(id))
            .ok_or_else(|| CoreError::not_found("memory", id.to_string()))?;

        if memory.revision != expected_revision {
            return Err(CoreError::Conflict {
                id: id.to_string(),
                expected: expected_revision,
                found: memory.revision,
            });
        }

        if let Some(confidence) = patch.confidence_score {
            memory.confidence_score = confidence.clamp(0.0, 1.0);
        }
        if let Some(deleted) = patch.deleted {
            memory.deleted = deleted;
        }
        if let Some(extensions) = patch.extensions {
            memory.extensions = extensions;
        }
        if let Some(at) = patch.last_decayed_at {
            memory.last_decayed_at = Some(at);
        }
        memory.revision += 1;
        Ok(memory.clone())
    }

    async fn list_owners(&self) -> Result<Vec<String>> {
        let shards = self.shards.read();
        let mut owners: Vec<String> = shards.keys().cloned().collect();
        owners.sort();
        Ok(owners)
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<EntityId> {
        let mut shards = self.shards.write();
        let shard = shards.entry(entity.owner_id.clone()).or_default();
        let key = entity.name.to_lowercase();

        if let Some(existing_id) = shard.name_index.get(&key) {
            let existing_id = *existing_id;
            if let Some(existing) = shard.entities.get_mut(&existing_id) {
                existing.kind = entity.kind;
            }
            return Ok(existing_id);
        }

        let id = entity.id;
        shard.name_index.insert(key, id);
        shard.entities.insert(id, entity);
        Ok(id)
    }

    async fn get_entity(&self, owner_id: &str, id: &EntityId) -> Result<Option<Entity>> {
        let shards = self.shards.read();
        Ok(shards
            .get(owner_id)
            .and_then(|shard| shard.entities.get(id))
            .cloned())
    }

    async fn find_entity_by_name(&self, owner_id: &str, name: &str) -> Result<Option<Entity>> {
        let shards = self.shards.read();
        Ok(shards.get(owner_id).and_then(|shard| {
            let id = shard.name_index.get(&name.to_lowercase())?;
            shard.entities.get(id).cloned()
        }))
    }

    async fn list_entities(&self, owner_id: &str) -> Result<Vec<Entity>> {
        let shards = self.shards.read();
        let Some(shard) = shards.get(owner_id) else {
            return Ok(Vec::new());
        };
        let mut entities: Vec<Entity> = shard.entities.values().cloned().collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }

    async fn add_link(&self, link: EntityLink) -> Result<LinkId> {
        let mut shards = self.shards.write();
        let shard = shards.entry(link.owner_id.clone()).or_default();

        // Both endpoints must belong to the link's owner
        if !shard.entities.contains_key(&link.subject_id) {
            return Err(CoreError::not_found("entity", link.subject_id.to_string()));
        }
        if let Some(object_id) = &link.object_id {
            if !shard.entities.contains_key(object_id) {
                return Err(CoreError::not_found("entity", object_id.to_string()));
            }
        }

        let id = link.id;
        shard.links.push(link);
        Ok(id)
    }

    async fn links_for_entity(
        &self,
        owner_id: &str,
        entity_id: &EntityId,
    ) -> Result<Vec<EntityLink>> {
        let shards = self.shards.read();
        let Some(shard) = shards.get(owner_id) else {
            return Ok(Vec::new());
        };
        Ok(shard
            .links
            .iter()
            .filter(|l| l.subject_id == *entity_id || l.object_id == Some(*entity_id))
            .cloned()
            .collect())
    }

    async fn all_links(&self, owner_id: &str) -> Result<Vec<EntityLink>> {
        let shards = self.shards.read();
        Ok(shards
            .get(owner_id)
            .map(|shard| shard.links.clone())
            .unwrap_or_default())
    }
}

type ExpiringValue = (String, Option<Instant>);
type ExpiringHash = (HashMap<String, String>, Option<Instant>);

/// In-memory key-value cache with TTL expiry checked on read
pub struct InMemoryKvCache {
    entries: DashMap<String, ExpiringValue>,
    hashes: DashMap<String, ExpiringHash>,
}

impl InMemoryKvCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hashes: DashMap::new(),
        }
    }

    fn live(deadline: &Option<Instant>) -> bool {
        deadline.map(|d| Instant::now() < d).unwrap_or(true)
    }
}

impl Default for InMemoryKvCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvCache for InMemoryKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        // The read guard must drop before the expired-key removal below
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if Self::live(&entry.1) {
                    return Ok(Some(entry.0.clone()));
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), (value, Some(Instant::now() + ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        self.hashes.remove(key);
        Ok(())
    }

    async fn hash_increment(&self, key: &str, field: &str, by: i64, ttl: Duration) -> Result<i64> {
        let mut entry = self
            .hashes
            .entry(key.to_string())
            .or_insert_with(|| (HashMap::new(), None));
        if !Self::live(&entry.1) {
            entry.0.clear();
        }
        let value = entry.0.entry(field.to_string()).or_insert_with(|| "0".to_string());
        let current: i64 = value.parse().unwrap_or(0);
        let next = current + by;
        *value = next.to_string();
        entry.1 = Some(Instant::now() + ttl);
        Ok(next)
    }

    async fn hash_set(&self, key: &str, field: &str, value: String, ttl: Duration) -> Result<()> {
        let mut entry = self
            .hashes
            .entry(key.to_string())
            .or_insert_with(|| (HashMap::new(), None));
        if !Self::live(&entry.1) {
            entry.0.clear();
        }
        entry.0.insert(field.to_string(), value);
        entry.1 = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let expired = match self.hashes.get(key) {
            Some(entry) => {
                if Self::live(&entry.1) {
                    return Ok(entry.0.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.hashes.remove(key);
        }
        Ok(HashMap::new())
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && Self::live(&e.value().1))
            .map(|e| e.key().clone())
            .chain(
                self.hashes
                    .iter()
                    .filter(|e| e.key().starts_with(prefix) && Self::live(&e.value().1))
                    .map(|e| e.key().clone()),
            )
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Memory;

    #[tokio::test]
    async fn test_revision_conflict() {
        let store = InMemoryFactStore::new();
        let memory = Memory::new("alice", "fact", "note");
        let id = memory.id;
        store.insert_memory(memory, vec![1.0]).await.unwrap();

        let patch = MemoryPatch {
            confidence_score: Some(0.5),
            ..Default::default()
        };
        store.update_memory("alice", &id, 0, patch.clone()).await.unwrap();

        // Stale revision must be rejected
        let err = store.update_memory("alice", &id, 0, patch).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_confidence_clamped_on_write() {
        let store = InMemoryFactStore::new();
        let memory = Memory::new("alice", "fact", "note");
        let id = memory.id;
        store.insert_memory(memory, vec![1.0]).await.unwrap();

        let patch = MemoryPatch {
            confidence_score: Some(1.7),
            ..Default::default()
        };
        let updated = store.update_memory("alice", &id, 0, patch).await.unwrap();
        assert_eq!(updated.confidence_score, 1.0);
    }

    #[tokio::test]
    async fn test_deleted_excluded_from_queries() {
        let store = InMemoryFactStore::new();
        let memory = Memory::new("alice", "forgotten fact", "note");
        let id = memory.id;
        store.insert_memory(memory, vec![1.0, 0.0]).await.unwrap();

        let patch = MemoryPatch {
            deleted: Some(true),
            ..Default::default()
        };
        store.update_memory("alice", &id, 0, patch).await.unwrap();

        assert!(store
            .vector_search("alice", &[1.0, 0.0], 10, 0.0)
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .lexical_search("alice", "forgotten", 10)
            .await
            .unwrap()
            .is_empty());
        assert!(store.list_memories("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entity_name_lookup_case_insensitive() {
        let store = InMemoryFactStore::new();
        let entity = Entity::new("alice", "Project Alpha", "project");
        let id = store.upsert_entity(entity).await.unwrap();

        let found = store
            .find_entity_by_name("alice", "project alpha")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
        assert!(store
            .find_entity_by_name("bob", "project alpha")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_kv_ttl_expiry() {
        let cache = InMemoryKvCache::new();
        cache
            .set_with_ttl("k", "v".to_string(), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hash_counters() {
        let cache = InMemoryKvCache::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(cache.hash_increment("h", "count", 1, ttl).await.unwrap(), 1);
        assert_eq!(cache.hash_increment("h", "count", 1, ttl).await.unwrap(), 2);

        let all = cache.hash_get_all("h").await.unwrap();
        assert_eq!(all.get("count"), Some(&"2".to_string()));

        let keys = cache.scan_keys("h").await.unwrap();
        assert_eq!(keys, vec!["h".to_string()]);
    }
}
