//! Knowledge Graph Reasoner
//!
//! Path search, relationship strength, centrality, and clustering over an
//! owner's entity links, plus query-intent driven path strategies for
//! natural-language relationship questions.
//!
//! Traversal-heavy operations build an in-memory adjacency index from a
//! single link fetch instead of issuing one relationship query per
//! visited node. Every operation is owner-scoped; a missing start or end
//! entity yields an empty result, never an error.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use tracing::debug;

use crate::constants::{
    EXPERTISE_KEYWORDS, EXPERTISE_ROLE_STRENGTH, EXTENDED_HOP_DECAY, GENERIC_ROLE_STRENGTH,
    LINK_RECENCY_DECAY_DAYS, PATH_LENGTH_DECAY, STRENGTH_RECENCY_WEIGHT, STRENGTH_TYPE_SATURATION,
    STRENGTH_TYPE_WEIGHT,
};
use crate::errors::Result;
use crate::store::FactStore;
use crate::types::{days_between, Entity, EntityId, EntityLink, LinkStatus, RelationshipView};

/// Filters for the relationship listing
#[derive(Debug, Clone, Default)]
pub struct RelationshipFilters {
    /// Keep only links whose role matches one of these (case-insensitive)
    pub role_in: Option<Vec<String>>,
    /// Keep only links created at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Keep only links with `Active` status
    pub only_active: bool,
    /// Truncate the result
    pub limit: Option<usize>,
}

/// A path through the graph with its heuristic strength
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedPath {
    pub entities: Vec<EntityId>,
    /// 1 / path length in edges
    pub strength: f32,
}

/// Coarse classification of a relationship question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    WhoCanHelp,
    RelationshipBetween,
    WhoKnows,
    General,
}

/// A re-ranked reasoning path answering a natural-language query
#[derive(Debug, Clone)]
pub struct ReasoningPath {
    pub entities: Vec<EntityId>,
    pub entity_names: Vec<String>,
    pub roles: Vec<String>,
    /// Final score after keyword and length re-ranking
    pub strength: f32,
    pub intent: QueryIntent,
}

/// Undirected adjacency over an owner's links, built once per operation
///
/// Neighbor lists are sorted by entity id so both traversal order and the
/// "first found" shortest path are deterministic.
struct AdjacencyIndex {
    ids: Vec<EntityId>,
    index_of: HashMap<EntityId, usize>,
    /// Per node: (neighbor node index, link index), sorted by neighbor id
    neighbors: Vec<Vec<(usize, usize)>>,
    links: Vec<EntityLink>,
}

impl AdjacencyIndex {
    fn build(entity_ids: impl IntoIterator<Item = EntityId>, links: Vec<EntityLink>) -> Self {
        let mut ids: Vec<EntityId> = entity_ids.into_iter().collect();
        for link in &links {
            ids.push(link.subject_id);
            if let Some(object_id) = link.object_id {
                ids.push(object_id);
            }
        }
        ids.sort();
        ids.dedup();

        let index_of: HashMap<EntityId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut neighbors: Vec<Vec<(usize, usize)>> = vec![Vec::new(); ids.len()];
        for (link_idx, link) in links.iter().enumerate() {
            let Some(object_id) = link.object_id else {
                continue; // unary links have no traversable endpoint
            };
            let a = index_of[&link.subject_id];
            let b = index_of[&object_id];
            neighbors[a].push((b, link_idx));
            if a != b {
                neighbors[b].push((a, link_idx));
            }
        }
        for list in &mut neighbors {
            list.sort_by(|x, y| {
                ids[x.0]
                    .cmp(&ids[y.0])
                    .then(links[x.1].id.0.cmp(&links[y.1].id.0))
            });
        }

        Self {
            ids,
            index_of,
            neighbors,
            links,
        }
    }

    fn node(&self, id: &EntityId) -> Option<usize> {
        self.index_of.get(id).copied()
    }
}

/// Relationship reasoning over an owner's entity graph
pub struct GraphReasoner {
    store: Arc<dyn FactStore>,
}

impl GraphReasoner {
    pub fn new(store: Arc<dyn FactStore>) -> Self {
        Self { store }
    }

    /// Edges where the entity is subject or object, names resolved
    pub async fn relationships(
        &self,
        owner_id: &str,
        entity_id: &EntityId,
        filters: &RelationshipFilters,
    ) -> Result<Vec<RelationshipView>> {
        if self.store.get_entity(owner_id, entity_id).await?.is_none() {
            return Ok(Vec::new());
        }

        let mut links = self.store.links_for_entity(owner_id, entity_id).await?;

        if let Some(roles) = &filters.role_in {
            let roles: HashSet<String> = roles.iter().map(|r| r.to_lowercase()).collect();
            links.retain(|l| roles.contains(&l.role.to_lowercase()));
        }
        if let Some(since) = filters.since {
            links.retain(|l| l.created_at >= since);
        }
        if filters.only_active {
            links.retain(|l| l.status == LinkStatus::Active);
        }

        links.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.0.cmp(&b.id.0)));
        if let Some(limit) = filters.limit {
            links.truncate(limit);
        }

        let mut names: HashMap<EntityId, String> = HashMap::new();
        let mut views = Vec::with_capacity(links.len());
        for link in links {
            let Some(subject_name) = self.resolve_name(owner_id, &link.subject_id, &mut names).await?
            else {
                continue; // dangling endpoint, skip the edge
            };
            let object_name = match &link.object_id {
                Some(object_id) => self.resolve_name(owner_id, object_id, &mut names).await?,
                None => None,
            };
            views.push(RelationshipView {
                link,
                subject_name,
                object_name,
            });
        }
        Ok(views)
    }

    async fn resolve_name(
        &self,
        owner_id: &str,
        entity_id: &EntityId,
        cache: &mut HashMap<EntityId, String>,
    ) -> Result<Option<String>> {
        if let Some(name) = cache.get(entity_id) {
            return Ok(Some(name.clone()));
        }
        match self.store.get_entity(owner_id, entity_id).await? {
            Some(entity) => {
                cache.insert(*entity_id, entity.name.clone());
                Ok(Some(entity.name))
            }
            None => Ok(None),
        }
    }

    /// Breadth-first shortest path, at most `max_depth` edges long
    ///
    /// Returns the first path found at the minimal depth. Ties between
    /// equal-length paths break deterministically because neighbors are
    /// visited in entity-id order. None when no path exists within the
    /// depth bound or either endpoint is unknown.
    pub async fn shortest_path(
        &self,
        owner_id: &str,
        start: &EntityId,
        end: &EntityId,
        max_depth: usize,
    ) -> Result<Option<Vec<EntityId>>> {
        let links = self.store.all_links(owner_id).await?;
        let index = AdjacencyIndex::build([], links);

        let (Some(start_node), Some(end_node)) = (index.node(start), index.node(end)) else {
            // Entities with no links can still trivially reach themselves
            if start == end && self.store.get_entity(owner_id, start).await?.is_some() {
                return Ok(Some(vec![*start]));
            }
            return Ok(None);
        };

        if start_node == end_node {
            return Ok(Some(vec![*start]));
        }

        let mut parent: HashMap<usize, usize> = HashMap::new();
        let mut visited = HashSet::from([start_node]);
        let mut queue = VecDeque::from([(start_node, 0usize)]);

        while let Some((node, depth)) = queue.pop_front() {
            if depth == max_depth {
                continue;
            }
            for &(next, _link) in &index.neighbors[node] {
                if !visited.insert(next) {
                    continue;
                }
                parent.insert(next, node);
                if next == end_node {
                    let mut path = vec![index.ids[next]];
                    let mut cursor = next;
                    while let Some(&prev) = parent.get(&cursor) {
                        path.push(index.ids[prev]);
                        cursor = prev;
                    }
                    path.reverse();
                    return Ok(Some(path));
                }
                queue.push_back((next, depth + 1));
            }
        }

        Ok(None)
    }

    /// Depth-first enumeration of simple paths, bounded by depth and count
    ///
    /// Each path is weighted `1 / length`; results come back strongest
    /// (shortest) first.
    pub async fn all_paths(
        &self,
        owner_id: &str,
        start: &EntityId,
        end: &EntityId,
        max_depth: usize,
        max_paths: usize,
    ) -> Result<Vec<WeightedPath>> {
        let links = self.store.all_links(owner_id).await?;
        let index = AdjacencyIndex::build([], links);

        let (Some(start_node), Some(end_node)) = (index.node(start), index.node(end)) else {
            return Ok(Vec::new());
        };
        if max_depth == 0 || max_paths == 0 {
            return Ok(Vec::new());
        }

        let mut paths: Vec<WeightedPath> = Vec::new();
        let mut trail = vec![start_node];
        let mut on_trail = HashSet::from([start_node]);
        collect_paths(
            &index,
            end_node,
            max_depth,
            max_paths,
            &mut trail,
            &mut on_trail,
            &mut paths,
        );

        paths.sort_by(|a, b| {
            OrderedFloat(b.strength)
                .cmp(&OrderedFloat(a.strength))
                .then_with(|| a.entities.cmp(&b.entities))
        });
        Ok(paths)
    }

    /// Heuristic [0, 1] strength of the tie between two entities
    ///
    /// Blends relationship diversity (distinct roles, saturating at 3)
    /// with a recency-decayed sum over every connecting link. No link
    /// means zero.
    pub async fn relationship_strength(
        &self,
        owner_id: &str,
        a: &EntityId,
        b: &EntityId,
    ) -> Result<f32> {
        let links = self.store.links_for_entity(owner_id, a).await?;
        let connecting: Vec<&EntityLink> = links
            .iter()
            .filter(|l| {
                (l.subject_id == *a && l.object_id == Some(*b))
                    || (l.subject_id == *b && l.object_id == Some(*a))
            })
            .collect();

        if connecting.is_empty() {
            return Ok(0.0);
        }

        let now = Utc::now();
        let distinct_roles: HashSet<String> =
            connecting.iter().map(|l| l.role.to_lowercase()).collect();
        let type_component =
            (distinct_roles.len() as f32 / STRENGTH_TYPE_SATURATION).min(1.0);

        let recency_sum: f64 = connecting
            .iter()
            .map(|l| (-days_between(l.created_at, now) / LINK_RECENCY_DECAY_DAYS).exp())
            .sum();
        let recency_component = (recency_sum as f32).min(1.0);

        let strength =
            STRENGTH_TYPE_WEIGHT * type_component + STRENGTH_RECENCY_WEIGHT * recency_component;
        Ok(strength.min(1.0))
    }

    /// Degree centrality: relationship count per entity, descending
    pub async fn central_entities(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<(Entity, usize)>> {
        let entities = self.store.list_entities(owner_id).await?;
        let links = self.store.all_links(owner_id).await?;

        let mut degrees: HashMap<EntityId, usize> = HashMap::new();
        for link in &links {
            *degrees.entry(link.subject_id).or_default() += 1;
            if let Some(object_id) = link.object_id {
                *degrees.entry(object_id).or_default() += 1;
            }
        }

        let mut ranked: Vec<(Entity, usize)> = entities
            .into_iter()
            .map(|e| {
                let degree = degrees.get(&e.id).copied().unwrap_or(0);
                (e, degree)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name.cmp(&b.0.name)));
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Connected components via breadth-first traversal, largest first
    pub async fn clusters(&self, owner_id: &str) -> Result<Vec<Vec<EntityId>>> {
        let entities = self.store.list_entities(owner_id).await?;
        let links = self.store.all_links(owner_id).await?;
        let index = AdjacencyIndex::build(entities.iter().map(|e| e.id), links);

        let mut visited = vec![false; index.ids.len()];
        let mut components: Vec<Vec<EntityId>> = Vec::new();

        for seed in 0..index.ids.len() {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;
            let mut component = vec![index.ids[seed]];
            let mut queue = VecDeque::from([seed]);
            while let Some(node) = queue.pop_front() {
                for &(next, _) in &index.neighbors[node] {
                    if !visited[next] {
                        visited[next] = true;
                        component.push(index.ids[next]);
                        queue.push_back(next);
                    }
                }
            }
            component.sort();
            components.push(component);
        }

        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));
        Ok(components)
    }

    /// Intent-driven reasoning paths for a natural-language query
    ///
    /// Entities mentioned in the query anchor the search; the classified
    /// intent picks the path-building strategy, and every candidate path
    /// is re-ranked by `strength × (1 + keyword overlap) × exp(-len/5)`.
    /// No recognized entity means no paths, not an error.
    pub async fn reasoning_paths(
        &self,
        owner_id: &str,
        query: &str,
        max_paths: usize,
    ) -> Result<Vec<ReasoningPath>> {
        let entities = self.store.list_entities(owner_id).await?;
        let query_lower = query.to_lowercase();

        let mut focus: Vec<EntityId> = entities
            .iter()
            .filter(|e| query_lower.contains(&e.name.to_lowercase()))
            .map(|e| e.id)
            .collect();
        focus.sort();

        if focus.is_empty() || max_paths == 0 {
            return Ok(Vec::new());
        }

        let names: HashMap<EntityId, String> =
            entities.iter().map(|e| (e.id, e.name.clone())).collect();
        let links = self.store.all_links(owner_id).await?;
        let index = AdjacencyIndex::build(entities.iter().map(|e| e.id), links);
        let intent = classify_intent(query);

        let mut raw_paths: Vec<(Vec<usize>, Vec<usize>, f32)> = Vec::new();
        match intent {
            QueryIntent::RelationshipBetween if focus.len() >= 2 => {
                // Enumerate simple paths between the two mentioned entities
                if let (Some(a), Some(b)) = (index.node(&focus[0]), index.node(&focus[1])) {
                    let mut trail = vec![a];
                    let mut on_trail = HashSet::from([a]);
                    let mut found: Vec<(Vec<usize>, Vec<usize>)> = Vec::new();
                    collect_node_paths(&index, b, 4, max_paths, &mut trail, &mut on_trail, &mut Vec::new(), &mut found);
                    for (nodes, link_idxs) in found {
                        let strength = 1.0 / (nodes.len() - 1) as f32;
                        raw_paths.push((nodes, link_idxs, strength));
                    }
                }
            }
            QueryIntent::WhoCanHelp => {
                // First-degree edges favor expertise roles; one extra hop
                // past first-degree connections decays by 0.7
                for anchor in &focus {
                    let Some(a) = index.node(anchor) else { continue };
                    for &(n1, l1) in &index.neighbors[a] {
                        if n1 == a {
                            continue;
                        }
                        let base1 = role_strength(&index.links[l1].role);
                        raw_paths.push((vec![a, n1], vec![l1], base1));
                        for &(n2, l2) in &index.neighbors[n1] {
                            if n2 == a || n2 == n1 {
                                continue;
                            }
                            let base2 = role_strength(&index.links[l2].role);
                            raw_paths.push((
                                vec![a, n1, n2],
                                vec![l1, l2],
                                base1 * base2 * EXTENDED_HOP_DECAY,
                            ));
                        }
                    }
                }
            }
            _ => {
                // WhoKnows and General: neighborhood enumeration up to two
                // hops, weighted by path length only
                for anchor in &focus {
                    let Some(a) = index.node(anchor) else { continue };
                    for &(n1, l1) in &index.neighbors[a] {
                        if n1 == a {
                            continue;
                        }
                        raw_paths.push((vec![a, n1], vec![l1], 1.0));
                        for &(n2, l2) in &index.neighbors[n1] {
                            if n2 == a || n2 == n1 {
                                continue;
                            }
                            raw_paths.push((vec![a, n1, n2], vec![l1, l2], 0.5));
                        }
                    }
                }
            }
        }

        let query_tokens = keyword_tokens(&query_lower);
        let mut ranked: Vec<ReasoningPath> = raw_paths
            .into_iter()
            .map(|(nodes, link_idxs, strength)| {
                let entity_ids: Vec<EntityId> = nodes.iter().map(|&n| index.ids[n]).collect();
                let entity_names: Vec<String> = entity_ids
                    .iter()
                    .map(|id| names.get(id).cloned().unwrap_or_default())
                    .collect();
                let roles: Vec<String> = link_idxs
                    .iter()
                    .map(|&l| index.links[l].role.clone())
                    .collect();

                let length = link_idxs.len() as f32;
                let boost = keyword_overlap(&query_tokens, &entity_names, &roles);
                let score = strength * (1.0 + boost) * (-length / PATH_LENGTH_DECAY).exp();

                ReasoningPath {
                    entities: entity_ids,
                    entity_names,
                    roles,
                    strength: score,
                    intent,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            OrderedFloat(b.strength)
                .cmp(&OrderedFloat(a.strength))
                .then_with(|| a.entities.cmp(&b.entities))
        });
        ranked.dedup_by(|a, b| a.entities == b.entities);
        ranked.truncate(max_paths);

        debug!(owner_id, ?intent, paths = ranked.len(), "reasoning paths built");
        Ok(ranked)
    }
}

/// Classify a relationship question into a path-building strategy
pub fn classify_intent(query: &str) -> QueryIntent {
    let q = query.to_lowercase();
    if q.contains("who can help") || (q.contains("who") && (q.contains("help") || q.contains("expert"))) {
        QueryIntent::WhoCanHelp
    } else if q.contains("who knows") || (q.contains("who") && q.contains("know")) {
        QueryIntent::WhoKnows
    } else if q.contains("between") || q.contains("relationship") || q.contains("related") || q.contains("connected") {
        QueryIntent::RelationshipBetween
    } else {
        QueryIntent::General
    }
}

fn role_strength(role: &str) -> f32 {
    let role = role.to_lowercase();
    if EXPERTISE_KEYWORDS.iter().any(|k| role.contains(k)) {
        EXPERTISE_ROLE_STRENGTH
    } else {
        GENERIC_ROLE_STRENGTH
    }
}

/// Query tokens worth matching (short function words dropped)
fn keyword_tokens(query_lower: &str) -> Vec<String> {
    query_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_string())
        .collect()
}

/// Fraction of query keywords that appear in the path's names or roles
fn keyword_overlap(query_tokens: &[String], names: &[String], roles: &[String]) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let haystack = names
        .iter()
        .chain(roles.iter())
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let matched = query_tokens.iter().filter(|t| haystack.contains(*t)).count();
    matched as f32 / query_tokens.len() as f32
}

/// DFS helper for `all_paths`
fn collect_paths(
    index: &AdjacencyIndex,
    end: usize,
    max_depth: usize,
    max_paths: usize,
    trail: &mut Vec<usize>,
    on_trail: &mut HashSet<usize>,
    paths: &mut Vec<WeightedPath>,
) {
    if paths.len() >= max_paths {
        return;
    }
    let current = *trail.last().expect("trail never empty");
    if current == end && trail.len() > 1 {
        let length = (trail.len() - 1) as f32;
        paths.push(WeightedPath {
            entities: trail.iter().map(|&n| index.ids[n]).collect(),
            strength: 1.0 / length,
        });
        return;
    }
    if trail.len() - 1 >= max_depth {
        return;
    }
    for &(next, _) in &index.neighbors[current] {
        if on_trail.contains(&next) {
            continue;
        }
        trail.push(next);
        on_trail.insert(next);
        collect_paths(index, end, max_depth, max_paths, trail, on_trail, paths);
        on_trail.remove(&next);
        trail.pop();
    }
}

/// DFS helper that also records the links along each path
#[allow(clippy::too_many_arguments)]
fn collect_node_paths(
    index: &AdjacencyIndex,
    end: usize,
    max_depth: usize,
    max_paths: usize,
    trail: &mut Vec<usize>,
    on_trail: &mut HashSet<usize>,
    link_trail: &mut Vec<usize>,
    found: &mut Vec<(Vec<usize>, Vec<usize>)>,
) {
    if found.len() >= max_paths {
        return;
    }
    let current = *trail.last().expect("trail never empty");
    if current == end && trail.len() > 1 {
        found.push((trail.clone(), link_trail.clone()));
        return;
    }
    if trail.len() - 1 >= max_depth {
        return;
    }
    for &(next, link) in &index.neighbors[current] {
        if on_trail.contains(&next) {
            continue;
        }
        trail.push(next);
        on_trail.insert(next);
        link_trail.push(link);
        collect_node_paths(index, end, max_depth, max_paths, trail, on_trail, link_trail, found);
        link_trail.pop();
        on_trail.remove(&next);
        trail.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_intent() {
        assert_eq!(
            classify_intent("Who can help me with the database migration?"),
            QueryIntent::WhoCanHelp
        );
        assert_eq!(
            classify_intent("Who knows about Kubernetes?"),
            QueryIntent::WhoKnows
        );
        assert_eq!(
            classify_intent("What is the relationship between John and Project Alpha?"),
            QueryIntent::RelationshipBetween
        );
        assert_eq!(classify_intent("Tell me about Sarah"), QueryIntent::General);
    }

    #[test]
    fn test_role_strength_bias() {
        assert_eq!(role_strength("is an expert in Rust"), EXPERTISE_ROLE_STRENGTH);
        assert_eq!(role_strength("works on billing"), EXPERTISE_ROLE_STRENGTH);
        assert_eq!(role_strength("had lunch with"), GENERIC_ROLE_STRENGTH);
    }

    #[test]
    fn test_keyword_overlap() {
        let tokens = keyword_tokens("who knows about kubernetes deployments");
        let names = vec!["Sarah".to_string()];
        let roles = vec!["manages kubernetes clusters".to_string()];
        let overlap = keyword_overlap(&tokens, &names, &roles);
        assert!(overlap > 0.0 && overlap < 1.0);
    }
}
