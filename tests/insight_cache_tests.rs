//! Insight cache integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use engram::errors::{CoreError, Result};
use engram::graph::GraphReasoner;
use engram::insights::{InsightCache, InsightRequest};
use engram::providers::TimelineBuilder;
use engram::store::{FactStore, InMemoryFactStore, InMemoryKvCache};
use engram::types::{Entity, EntityLink};

/// Counts timeline builds so tests can verify cache laziness
struct CountingTimeline {
    calls: AtomicUsize,
}

impl CountingTimeline {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimelineBuilder for CountingTimeline {
    async fn build_timeline(&self, _owner_id: &str, entity_name: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Timeline for {entity_name}"))
    }
}

struct FailingTimeline;

#[async_trait]
impl TimelineBuilder for FailingTimeline {
    async fn build_timeline(&self, _owner_id: &str, _entity_name: &str) -> Result<String> {
        Err(CoreError::Provider("timeline service down".to_string()))
    }
}

async fn seeded_store() -> Arc<InMemoryFactStore> {
    let store = Arc::new(InMemoryFactStore::new());
    let project = store
        .upsert_entity(Entity::new("alice", "Project Alpha", "project"))
        .await
        .unwrap();
    let john = store
        .upsert_entity(Entity::new("alice", "John", "person"))
        .await
        .unwrap();
    store
        .add_link(EntityLink::new("alice", john, Some(project), "works on"))
        .await
        .unwrap();
    store
}

fn build_cache(
    store: Arc<InMemoryFactStore>,
    timeline: Arc<dyn TimelineBuilder>,
) -> InsightCache {
    let reasoner = Arc::new(GraphReasoner::new(store.clone()));
    InsightCache::new(store, Arc::new(InMemoryKvCache::new()), reasoner, timeline)
}

#[tokio::test]
async fn test_computed_insight_round_trips_through_cache() {
    let store = seeded_store().await;
    let cache = build_cache(store, Arc::new(CountingTimeline::new()));

    let computed = cache
        .get_or_compute("alice", "Project Alpha", InsightRequest::default())
        .await
        .unwrap();
    assert!(computed.entity_id.is_some());
    assert_eq!(computed.entity_name, "Project Alpha");
    assert_eq!(computed.graph.as_ref().map(|g| g.len()), Some(1));
    assert_eq!(computed.timeline.as_deref(), Some("Timeline for Project Alpha"));

    // The cached copy deserializes back to the exact same bundle
    let cached = cache.get("alice", "project alpha").await.unwrap().unwrap();
    assert_eq!(cached, computed);
}

#[tokio::test]
async fn test_cache_hit_skips_recomputation() {
    let store = seeded_store().await;
    let timeline = Arc::new(CountingTimeline::new());
    let cache = build_cache(store, timeline.clone());

    cache
        .get_or_compute("alice", "Project Alpha", InsightRequest::default())
        .await
        .unwrap();
    cache
        .get_or_compute("alice", "Project Alpha", InsightRequest::default())
        .await
        .unwrap();

    assert_eq!(timeline.call_count(), 1);
}

#[tokio::test]
async fn test_nothing_requested_nothing_computed() {
    let store = seeded_store().await;
    let timeline = Arc::new(CountingTimeline::new());
    let cache = build_cache(store, timeline.clone());

    let insight = cache
        .get_or_compute(
            "alice",
            "Project Alpha",
            InsightRequest {
                include_graph: false,
                include_timeline: false,
            },
        )
        .await
        .unwrap();

    assert!(insight.graph.is_none());
    assert!(insight.timeline.is_none());
    assert_eq!(timeline.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_entity_shell_is_not_cached() {
    let store = seeded_store().await;
    let cache = build_cache(store, Arc::new(CountingTimeline::new()));

    let shell = cache
        .get_or_compute("alice", "Ghost Project", InsightRequest::default())
        .await
        .unwrap();
    assert!(shell.entity_id.is_none());
    assert_eq!(shell.entity_name, "Ghost Project");

    // Once the entity exists it must be computable immediately
    assert!(cache.get("alice", "Ghost Project").await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalidate_forces_recompute() {
    let store = seeded_store().await;
    let timeline = Arc::new(CountingTimeline::new());
    let cache = build_cache(store, timeline.clone());

    cache
        .get_or_compute("alice", "Project Alpha", InsightRequest::default())
        .await
        .unwrap();
    cache.invalidate("alice", "Project Alpha").await.unwrap();
    assert!(cache.get("alice", "Project Alpha").await.unwrap().is_none());

    cache
        .get_or_compute("alice", "Project Alpha", InsightRequest::default())
        .await
        .unwrap();
    assert_eq!(timeline.call_count(), 2);
}

#[tokio::test]
async fn test_timeline_failure_degrades_gracefully() {
    let store = seeded_store().await;
    let cache = build_cache(store, Arc::new(FailingTimeline));

    let insight = cache
        .get_or_compute("alice", "Project Alpha", InsightRequest::default())
        .await
        .unwrap();

    assert!(insight.timeline.is_none());
    assert_eq!(insight.graph.as_ref().map(|g| g.len()), Some(1));
}

#[tokio::test]
async fn test_popularity_requires_repeat_mentions() {
    let store = seeded_store().await;
    let cache = build_cache(store, Arc::new(CountingTimeline::new()));

    cache
        .get_or_compute("alice", "Project Alpha", InsightRequest::default())
        .await
        .unwrap();
    // One mention is noise, not popularity
    assert!(cache.popular_entities("alice", 10).await.unwrap().is_empty());

    cache
        .get_or_compute("alice", "Project Alpha", InsightRequest::default())
        .await
        .unwrap();
    let popular = cache.popular_entities("alice", 10).await.unwrap();
    assert_eq!(popular.len(), 1);
    assert_eq!(popular[0].entity_name, "project alpha");
    assert_eq!(popular[0].count, 2);
}

#[tokio::test]
async fn test_popularity_is_owner_scoped() {
    let store = seeded_store().await;
    let cache = build_cache(store, Arc::new(CountingTimeline::new()));

    for _ in 0..3 {
        cache
            .get_or_compute("alice", "Project Alpha", InsightRequest::default())
            .await
            .unwrap();
    }

    assert!(cache.popular_entities("bob", 10).await.unwrap().is_empty());
}
