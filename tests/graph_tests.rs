//! Knowledge graph reasoning integration tests

use std::sync::Arc;

use engram::graph::{classify_intent, GraphReasoner, QueryIntent, RelationshipFilters};
use engram::store::{FactStore, InMemoryFactStore};
use engram::types::{Entity, EntityId, EntityLink};

struct TestGraph {
    store: Arc<InMemoryFactStore>,
    reasoner: GraphReasoner,
    john: EntityId,
    sarah: EntityId,
    project: EntityId,
    kubernetes: EntityId,
}

async fn entity(store: &InMemoryFactStore, owner: &str, name: &str, kind: &str) -> EntityId {
    store.upsert_entity(Entity::new(owner, name, kind)).await.unwrap()
}

async fn link(
    store: &InMemoryFactStore,
    owner: &str,
    subject: EntityId,
    object: Option<EntityId>,
    role: &str,
) {
    store
        .add_link(EntityLink::new(owner, subject, object, role))
        .await
        .unwrap();
}

/// John "works on" Project Alpha, John "works with" Sarah,
/// Sarah "is an expert in" Kubernetes, Project Alpha "is behind schedule"
async fn setup_graph() -> TestGraph {
    let store = Arc::new(InMemoryFactStore::new());
    let john = entity(&store, "alice", "John", "person").await;
    let sarah = entity(&store, "alice", "Sarah", "person").await;
    let project = entity(&store, "alice", "Project Alpha", "project").await;
    let kubernetes = entity(&store, "alice", "Kubernetes", "technology").await;

    link(&store, "alice", john, Some(project), "works on").await;
    link(&store, "alice", john, Some(sarah), "works with").await;
    link(&store, "alice", sarah, Some(kubernetes), "is an expert in").await;
    link(&store, "alice", project, None, "is behind schedule").await;

    let reasoner = GraphReasoner::new(store.clone());
    TestGraph {
        store,
        reasoner,
        john,
        sarah,
        project,
        kubernetes,
    }
}

#[tokio::test]
async fn test_relationships_resolve_names() {
    let g = setup_graph().await;
    let views = g
        .reasoner
        .relationships("alice", &g.john, &RelationshipFilters::default())
        .await
        .unwrap();

    assert_eq!(views.len(), 2);
    assert!(views.iter().any(|v| {
        v.subject_name == "John" && v.object_name.as_deref() == Some("Project Alpha")
    }));
    assert!(views
        .iter()
        .any(|v| v.object_name.as_deref() == Some("Sarah") && v.link.role == "works with"));
}

#[tokio::test]
async fn test_unary_relationship_has_no_object() {
    let g = setup_graph().await;
    let views = g
        .reasoner
        .relationships("alice", &g.project, &RelationshipFilters::default())
        .await
        .unwrap();

    let unary = views
        .iter()
        .find(|v| v.link.role == "is behind schedule")
        .unwrap();
    assert_eq!(unary.subject_name, "Project Alpha");
    assert!(unary.object_name.is_none());
}

#[tokio::test]
async fn test_relationships_role_filter() {
    let g = setup_graph().await;
    let filters = RelationshipFilters {
        role_in: Some(vec!["WORKS WITH".to_string()]),
        ..Default::default()
    };
    let views = g.reasoner.relationships("alice", &g.john, &filters).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].link.role, "works with");
}

#[tokio::test]
async fn test_relationships_unknown_entity_is_empty() {
    let g = setup_graph().await;
    let views = g
        .reasoner
        .relationships("alice", &EntityId::new(), &RelationshipFilters::default())
        .await
        .unwrap();
    assert!(views.is_empty());
}

#[tokio::test]
async fn test_shortest_path_direct_and_transitive() {
    let g = setup_graph().await;

    let direct = g
        .reasoner
        .shortest_path("alice", &g.john, &g.project, 5)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(direct, vec![g.john, g.project]);

    // John reaches Kubernetes only through Sarah
    let transitive = g
        .reasoner
        .shortest_path("alice", &g.john, &g.kubernetes, 5)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transitive, vec![g.john, g.sarah, g.kubernetes]);
}

#[tokio::test]
async fn test_shortest_path_respects_depth_bound() {
    let g = setup_graph().await;
    let path = g
        .reasoner
        .shortest_path("alice", &g.john, &g.kubernetes, 1)
        .await
        .unwrap();
    assert!(path.is_none());
}

#[tokio::test]
async fn test_shortest_path_unreachable_is_none() {
    let g = setup_graph().await;
    let island = entity(&g.store, "alice", "Island", "place").await;

    let path = g
        .reasoner
        .shortest_path("alice", &g.john, &island, 10)
        .await
        .unwrap();
    assert!(path.is_none());

    // An entity trivially reaches itself
    let self_path = g
        .reasoner
        .shortest_path("alice", &island, &island, 10)
        .await
        .unwrap();
    assert_eq!(self_path, Some(vec![island]));
}

#[tokio::test]
async fn test_all_paths_shortest_first() {
    let store = Arc::new(InMemoryFactStore::new());
    let a = entity(&store, "alice", "A", "node").await;
    let b = entity(&store, "alice", "B", "node").await;
    let c = entity(&store, "alice", "C", "node").await;
    link(&store, "alice", a, Some(b), "knows").await;
    link(&store, "alice", a, Some(c), "knows").await;
    link(&store, "alice", c, Some(b), "knows").await;

    let reasoner = GraphReasoner::new(store);
    let paths = reasoner.all_paths("alice", &a, &b, 4, 10).await.unwrap();

    assert_eq!(paths.len(), 2);
    assert_eq!(paths[0].entities, vec![a, b]);
    assert_eq!(paths[1].entities, vec![a, c, b]);
    assert!(paths[0].strength > paths[1].strength);
}

#[tokio::test]
async fn test_relationship_strength() {
    let g = setup_graph().await;

    let connected = g
        .reasoner
        .relationship_strength("alice", &g.john, &g.sarah)
        .await
        .unwrap();
    // One distinct role, created just now: 0.3 × (1/3) + 0.7 × ~1.0
    assert!((connected - 0.8).abs() < 0.01);

    let unrelated = g
        .reasoner
        .relationship_strength("alice", &g.john, &g.kubernetes)
        .await
        .unwrap();
    assert_eq!(unrelated, 0.0);
}

#[tokio::test]
async fn test_strength_grows_with_role_diversity() {
    let g = setup_graph().await;
    let base = g
        .reasoner
        .relationship_strength("alice", &g.john, &g.sarah)
        .await
        .unwrap();

    link(&g.store, "alice", g.john, Some(g.sarah), "mentors").await;
    let richer = g
        .reasoner
        .relationship_strength("alice", &g.john, &g.sarah)
        .await
        .unwrap();

    assert!(richer > base);
    assert!(richer <= 1.0);
}

#[tokio::test]
async fn test_central_entities_by_degree() {
    let g = setup_graph().await;
    let ranked = g.reasoner.central_entities("alice", 10).await.unwrap();

    assert_eq!(ranked.len(), 4);
    // John, Project Alpha, and Sarah all carry two links; Kubernetes one
    assert_eq!(ranked[0].1, 2);
    assert_eq!(ranked[3].0.name, "Kubernetes");
    assert_eq!(ranked[3].1, 1);
}

#[tokio::test]
async fn test_clusters_split_components() {
    let g = setup_graph().await;
    entity(&g.store, "alice", "Island", "place").await;

    let clusters = g.reasoner.clusters("alice").await.unwrap();
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].len(), 4);
    assert_eq!(clusters[1].len(), 1);
}

#[tokio::test]
async fn test_cross_owner_isolation() {
    let g = setup_graph().await;
    assert!(g.reasoner.clusters("bob").await.unwrap().is_empty());
    assert!(g
        .reasoner
        .shortest_path("bob", &g.john, &g.sarah, 5)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_intent_classification() {
    assert_eq!(
        classify_intent("Who can help me with the migration?"),
        QueryIntent::WhoCanHelp
    );
    assert_eq!(classify_intent("Who knows about Kubernetes?"), QueryIntent::WhoKnows);
    assert_eq!(
        classify_intent("How are John and Sarah related?"),
        QueryIntent::RelationshipBetween
    );
    assert_eq!(classify_intent("Tell me about the offsite"), QueryIntent::General);
}

#[tokio::test]
async fn test_reasoning_paths_surface_the_expert() {
    let g = setup_graph().await;
    let paths = g
        .reasoner
        .reasoning_paths("alice", "Who can help with Kubernetes?", 5)
        .await
        .unwrap();

    assert!(!paths.is_empty());
    assert_eq!(paths[0].intent, QueryIntent::WhoCanHelp);
    // The expertise edge to Sarah wins
    assert!(paths[0].entity_names.contains(&"Sarah".to_string()));
    assert!(paths[0].roles.iter().any(|r| r.contains("expert")));
}

#[tokio::test]
async fn test_reasoning_paths_between_two_entities() {
    let g = setup_graph().await;
    let paths = g
        .reasoner
        .reasoning_paths("alice", "What is the relationship between John and Sarah?", 5)
        .await
        .unwrap();

    assert!(!paths.is_empty());
    assert_eq!(paths[0].intent, QueryIntent::RelationshipBetween);
    let endpoints = (paths[0].entities[0], *paths[0].entities.last().unwrap());
    assert!(endpoints == (g.john, g.sarah) || endpoints == (g.sarah, g.john));
    assert_eq!(paths[0].roles, vec!["works with".to_string()]);
}

#[tokio::test]
async fn test_reasoning_paths_without_known_entities() {
    let g = setup_graph().await;
    let paths = g
        .reasoner
        .reasoning_paths("alice", "what happened at the offsite", 5)
        .await
        .unwrap();
    assert!(paths.is_empty());
}
