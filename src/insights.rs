//! Insight Cache
//!
//! Lazily computed, TTL-bounded per-entity insight bundles (graph
//! snapshot plus timeline narrative) with usage tracking behind a
//! popularity query. The cache is strictly an optimization layer: every
//! failure path degrades to recomputation, never to an error for the
//! caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::constants::{INSIGHT_TTL_SECS, POPULARITY_MIN_MENTIONS, USAGE_TTL_SECS};
use crate::errors::Result;
use crate::graph::{GraphReasoner, RelationshipFilters};
use crate::providers::TimelineBuilder;
use crate::store::{FactStore, KvCache};
use crate::types::{CachedInsight, EntityUsage};

/// What the caller wants computed into the insight bundle
///
/// Both parts are lazy; an insight with neither requested is just an
/// existence check with usage tracking.
#[derive(Debug, Clone, Copy)]
pub struct InsightRequest {
    pub include_graph: bool,
    pub include_timeline: bool,
}

impl Default for InsightRequest {
    fn default() -> Self {
        Self {
            include_graph: true,
            include_timeline: true,
        }
    }
}

/// TTL cache over expensive per-entity insight computation
pub struct InsightCache {
    store: Arc<dyn FactStore>,
    cache: Arc<dyn KvCache>,
    reasoner: Arc<GraphReasoner>,
    timeline: Arc<dyn TimelineBuilder>,
    insight_ttl: Duration,
    usage_ttl: Duration,
}

impl InsightCache {
    pub fn new(
        store: Arc<dyn FactStore>,
        cache: Arc<dyn KvCache>,
        reasoner: Arc<GraphReasoner>,
        timeline: Arc<dyn TimelineBuilder>,
    ) -> Self {
        Self {
            store,
            cache,
            reasoner,
            timeline,
            insight_ttl: Duration::from_secs(INSIGHT_TTL_SECS),
            usage_ttl: Duration::from_secs(USAGE_TTL_SECS),
        }
    }

    pub fn with_ttls(mut self, insight_ttl: Duration, usage_ttl: Duration) -> Self {
        self.insight_ttl = insight_ttl;
        self.usage_ttl = usage_ttl;
        self
    }

    /// Cached insight for an entity, or None on miss
    ///
    /// A corrupt cache entry is deleted and treated as a miss so the next
    /// compute repairs it.
    pub async fn get(&self, owner_id: &str, entity_name: &str) -> Result<Option<CachedInsight>> {
        let key = insight_key(owner_id, entity_name);
        let Some(raw) = self.cache.get(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<CachedInsight>(&raw) {
            Ok(insight) => Ok(Some(insight)),
            Err(err) => {
                warn!(key, error = %err, "corrupt cached insight, evicting");
                self.cache.delete(&key).await?;
                Ok(None)
            }
        }
    }

    /// Cache hit, or compute, cache, and return
    ///
    /// An unknown entity returns an empty shell that is NOT cached, so
    /// the entity becomes visible as soon as it is first mentioned. A
    /// timeline failure degrades to an insight without a timeline; the
    /// rest of the bundle still caches.
    pub async fn get_or_compute(
        &self,
        owner_id: &str,
        entity_name: &str,
        request: InsightRequest,
    ) -> Result<CachedInsight> {
        if let Some(hit) = self.get(owner_id, entity_name).await? {
            self.track_usage(owner_id, entity_name).await;
            return Ok(hit);
        }

        let insight = self.compute(owner_id, entity_name, request).await?;

        if insight.entity_id.is_some() {
            let key = insight_key(owner_id, entity_name);
            let payload = serde_json::to_string(&insight)?;
            self.cache.set_with_ttl(&key, payload, self.insight_ttl).await?;
            self.track_usage(owner_id, entity_name).await;
        }

        Ok(insight)
    }

    async fn compute(
        &self,
        owner_id: &str,
        entity_name: &str,
        request: InsightRequest,
    ) -> Result<CachedInsight> {
        let Some(entity) = self.store.find_entity_by_name(owner_id, entity_name).await? else {
            debug!(owner_id, entity_name, "insight requested for unknown entity");
            return Ok(CachedInsight::empty_shell(entity_name));
        };

        let graph = if request.include_graph {
            Some(
                self.reasoner
                    .relationships(owner_id, &entity.id, &RelationshipFilters::default())
                    .await?,
            )
        } else {
            None
        };

        let timeline = if request.include_timeline {
            match self.timeline.build_timeline(owner_id, &entity.name).await {
                Ok(narrative) => Some(narrative),
                Err(err) => {
                    warn!(owner_id, entity_name, error = %err, "timeline build failed, degrading");
                    None
                }
            }
        } else {
            None
        };

        Ok(CachedInsight {
            entity_id: Some(entity.id),
            entity_name: entity.name,
            graph,
            timeline,
            cached_at: Utc::now(),
        })
    }

    /// Drop the cached bundle so the next read recomputes
    pub async fn invalidate(&self, owner_id: &str, entity_name: &str) -> Result<()> {
        self.cache.delete(&insight_key(owner_id, entity_name)).await
    }

    /// Entities the owner keeps asking about, most used first
    ///
    /// Only entities with at least two recorded mentions qualify; a
    /// single lookup is noise, not popularity. A corrupt usage hash is
    /// skipped, never fatal.
    pub async fn popular_entities(&self, owner_id: &str, limit: usize) -> Result<Vec<EntityUsage>> {
        let prefix = usage_prefix(owner_id);
        let keys = self.cache.scan_keys(&prefix).await?;

        let mut usages: Vec<EntityUsage> = Vec::new();
        for key in keys {
            let fields = match self.cache.hash_get_all(&key).await {
                Ok(fields) => fields,
                Err(err) => {
                    warn!(key, error = %err, "unreadable usage hash, skipping");
                    continue;
                }
            };

            let Some(count) = fields.get("count").and_then(|v| v.parse::<u64>().ok()) else {
                continue;
            };
            if count < POPULARITY_MIN_MENTIONS {
                continue;
            }
            let last_used = fields
                .get("last_used")
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);

            usages.push(EntityUsage {
                entity_name: key[prefix.len()..].to_string(),
                count,
                last_used,
            });
        }

        usages.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(b.last_used.cmp(&a.last_used))
                .then_with(|| a.entity_name.cmp(&b.entity_name))
        });
        usages.truncate(limit);
        Ok(usages)
    }

    /// Best-effort usage bump; a cache failure never fails the lookup
    async fn track_usage(&self, owner_id: &str, entity_name: &str) {
        let key = usage_key(owner_id, entity_name);
        if let Err(err) = self.cache.hash_increment(&key, "count", 1, self.usage_ttl).await {
            warn!(key, error = %err, "usage counter increment failed");
            return;
        }
        let now = Utc::now().to_rfc3339();
        if let Err(err) = self.cache.hash_set(&key, "last_used", now, self.usage_ttl).await {
            warn!(key, error = %err, "usage timestamp write failed");
        }
    }
}

fn insight_key(owner_id: &str, entity_name: &str) -> String {
    format!("insight:{owner_id}:{}", entity_name.to_lowercase())
}

fn usage_key(owner_id: &str, entity_name: &str) -> String {
    format!("{}{}", usage_prefix(owner_id), entity_name.to_lowercase())
}

fn usage_prefix(owner_id: &str) -> String {
    format!("usage:{owner_id}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_owner_scoped_and_case_folded() {
        assert_eq!(insight_key("alice", "Project Alpha"), "insight:alice:project alpha");
        assert_eq!(usage_key("alice", "John"), "usage:alice:john");
        assert_ne!(insight_key("alice", "John"), insight_key("bob", "John"));
    }
}
