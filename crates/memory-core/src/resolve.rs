//! Entity resolver (§4.3): create / link / merge newly-extracted
//! entities against existing graph state.
//!
//! Grounded on `crates/memory/src/retrieval.rs`'s weighted-sum-of-factors
//! scoring shape, reused here for candidate scoring instead of memory
//! ranking.

use std::collections::BTreeMap;

use memory_config::EntityResolverConfig;

use crate::error::EngineResult;
use crate::schema::{Edge, EdgeType, Entity, MetadataValue, Node, NodeType};
use crate::storage::{Filters, GraphView, SearchOptions, SearchView, VectorView};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionAction {
    Create,
    Link { target_id: String },
    Merge { target_id: String },
}

#[derive(Debug, Clone)]
pub struct ResolutionDecision {
    pub entity_id: String,
    pub action: ResolutionAction,
    pub score: f32,
}

/// The entity and any edges produced by resolving it, collected so the
/// writer can persist them without re-deriving ids. `original_id` is
/// the id the entity carried before resolution — chunks built during
/// extraction still reference it, so callers need it to translate
/// those references onto the post-resolution id.
#[derive(Debug, Clone)]
pub struct ResolvedEntity {
    pub entity: Entity,
    pub original_id: String,
    pub decision: ResolutionDecision,
    pub link_edge: Option<Edge>,
}

struct Candidate {
    node: Node,
    score: f32,
}

/// Resolves a batch of newly-extracted entities against the graph.
/// Entities resolved earlier in the same batch are visible to later
/// ones so within-batch duplicates merge onto the same id (§4.3's
/// "references in the current batch are updated before persistence").
pub async fn resolve_entities(
    entities: Vec<Entity>,
    vector: &dyn VectorView,
    graph: &dyn GraphView,
    search: &dyn SearchView,
    config: &EntityResolverConfig,
) -> EngineResult<Vec<ResolvedEntity>> {
    let mut resolved = Vec::with_capacity(entities.len());
    let mut batch_aliases: BTreeMap<String, String> = BTreeMap::new();

    for mut entity in entities {
        let original_id = entity.id.clone();

        if let Some(existing) = batch_aliases.get(&canonical_key(&entity)) {
            resolved.push(ResolvedEntity {
                entity: rewritten(entity, existing.clone()),
                original_id,
                decision: ResolutionDecision {
                    entity_id: existing.clone(),
                    action: ResolutionAction::Merge { target_id: existing.clone() },
                    score: 1.0,
                },
                link_edge: None,
            });
            continue;
        }

        let candidates = gather_candidates(&entity, vector, graph, search, config).await?;
        let best = candidates
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score).then_with(|| older_wins(a, b)));

        let decision = match best {
            Some(candidate) if candidate.score >= config.merge_threshold => ResolutionDecision {
                entity_id: candidate.node.id.clone(),
                action: ResolutionAction::Merge { target_id: candidate.node.id.clone() },
                score: candidate.score,
            },
            Some(candidate) if candidate.score >= config.similarity_threshold => ResolutionDecision {
                entity_id: entity.id.clone(),
                action: ResolutionAction::Link { target_id: candidate.node.id.clone() },
                score: candidate.score,
            },
            _ => ResolutionDecision {
                entity_id: entity.id.clone(),
                action: ResolutionAction::Create,
                score: 0.0,
            },
        };

        let link_edge = match &decision.action {
            ResolutionAction::Link { target_id } => Some(resolution_edge(&entity.id, target_id, decision.score)),
            _ => None,
        };

        if let ResolutionAction::Merge { target_id } = &decision.action {
            batch_aliases.insert(canonical_key(&entity), target_id.clone());
            entity = rewritten(entity, target_id.clone());
        }

        resolved.push(ResolvedEntity { entity, original_id, decision, link_edge });
    }

    Ok(resolved)
}

fn canonical_key(entity: &Entity) -> String {
    format!("{:?}:{}", entity.entity_type, normalize_name(&entity.name))
}

fn rewritten(mut entity: Entity, target_id: String) -> Entity {
    entity.id = target_id;
    entity
}

/// Edge id for a resolution link, derived from the unordered pair so
/// repeated resolutions of the same pair are idempotent (§4.3).
fn resolution_edge(new_id: &str, existing_id: &str, score: f32) -> Edge {
    let mut properties = BTreeMap::new();
    properties.insert("link_type".to_string(), MetadataValue::String("entity_resolution".to_string()));
    properties.insert("created_by".to_string(), MetadataValue::String("entity_resolver".to_string()));
    Edge {
        id: Edge::undirected_id(new_id, existing_id, EdgeType::RelatedTo),
        from: new_id.to_string(),
        to: existing_id.to_string(),
        edge_type: EdgeType::RelatedTo,
        weight: score,
        properties,
        created_at: chrono::Utc::now(),
    }
}

async fn gather_candidates(
    entity: &Entity,
    vector: &dyn VectorView,
    graph: &dyn GraphView,
    search: &dyn SearchView,
    config: &EntityResolverConfig,
) -> EngineResult<Vec<Candidate>> {
    let entity_nodes = graph.find_nodes_by_type(NodeType::Entity).await?;

    let node_candidates: Vec<&Node> = if let Some(embedding) = &entity.embedding {
        let hits = vector.search(embedding, config.max_candidates, &Filters::new()).await?;
        let hit_ids: std::collections::HashSet<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        entity_nodes.iter().filter(|n| hit_ids.contains(n.id.as_str())).collect()
    } else {
        let opts = SearchOptions {
            limit: config.max_candidates,
            ..SearchOptions::default()
        };
        let hits = search.search(&entity.name, &opts).await?;
        let hit_ids: std::collections::HashSet<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        entity_nodes.iter().filter(|n| hit_ids.contains(n.id.as_str())).collect()
    };

    let mut scored = Vec::new();
    for node in node_candidates.into_iter().take(config.max_candidates) {
        if let Some(score) = score_candidate(entity, node, config) {
            scored.push(Candidate { node: node.clone(), score });
        }
    }
    Ok(scored)
}

fn score_candidate(entity: &Entity, node: &Node, config: &EntityResolverConfig) -> Option<f32> {
    let vector_score = match (&entity.embedding, &node.embedding) {
        (Some(a), Some(b)) => a.cosine_similarity(b).map(|s| (s + 1.0) / 2.0),
        _ => None,
    };

    let node_name = match node.properties.get("name") {
        Some(MetadataValue::String(s)) => s.clone(),
        _ => return None,
    };
    let name_score = name_similarity(&entity.name, &node_name);

    let type_match = matches!(node.properties.get("entity_type"), Some(MetadataValue::String(t)) if *t == format!("{:?}", entity.entity_type));
    let type_score = if type_match { 1.0 } else { 0.0 };

    let (weighted_sum, weight_total) = match vector_score {
        Some(v) => (
            v * config.vector_weight + name_score * config.name_weight + type_score * config.type_weight,
            config.vector_weight + config.name_weight + config.type_weight,
        ),
        None => (
            name_score * config.name_weight + type_score * config.type_weight,
            config.name_weight + config.type_weight,
        ),
    };

    if weight_total <= 0.0 {
        return None;
    }
    Some((weighted_sum / weight_total).clamp(0.0, 1.0))
}

fn normalize_name(name: &str) -> String {
    name.to_lowercase().chars().filter(|c| c.is_alphanumeric() || c.is_whitespace()).collect()
}

/// Normalized string similarity over lowercased, punctuation-stripped
/// names — token-Jaccard, which tolerates word reordering.
fn name_similarity(a: &str, b: &str) -> f32 {
    let na = normalize_name(a);
    let nb = normalize_name(b);
    if na == nb {
        return 1.0;
    }
    let ta: std::collections::BTreeSet<&str> = na.split_whitespace().collect();
    let tb: std::collections::BTreeSet<&str> = nb.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    intersection as f32 / union as f32
}

/// Ties broken by candidate `created_at` ascending (older wins), per
/// §4.3. `max_by` picks the greatest, so the older candidate must
/// compare as greater — hence the reversed comparison.
fn older_wins(a: &Candidate, b: &Candidate) -> std::cmp::Ordering {
    b.node.created_at.cmp(&a.node.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::{MockGraphView, MockSearchView, MockVectorView};
    use chrono::Utc;

    fn entity(name: &str) -> Entity {
        Entity {
            id: format!("new_{name}"),
            name: name.to_string(),
            entity_type: crate::schema::EntityType::Person,
            confidence: 0.7,
            source: "s".to_string(),
            created_at: Utc::now(),
            properties: BTreeMap::new(),
            embedding: None,
        }
    }

    #[tokio::test]
    async fn creates_new_when_no_candidates() {
        let vector = MockVectorView::default();
        let graph = MockGraphView::default();
        let search = MockSearchView::default();
        let config = EntityResolverConfig::default();

        let resolved = resolve_entities(vec![entity("Jane Doe")], &vector, &graph, &search, &config).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].decision.action, ResolutionAction::Create);
    }

    #[tokio::test]
    async fn merges_duplicates_within_same_batch() {
        let vector = MockVectorView::default();
        let graph = MockGraphView::default();
        let search = MockSearchView::default();
        let config = EntityResolverConfig::default();

        let resolved = resolve_entities(vec![entity("Jane Doe"), entity("Jane Doe")], &vector, &graph, &search, &config)
            .await
            .unwrap();
        assert_eq!(resolved[0].entity.id, resolved[1].entity.id);
    }

    #[tokio::test]
    async fn keyword_fallback_links_existing_entity_by_indexed_name() {
        let vector = MockVectorView::default();
        let graph = MockGraphView::default();
        let search = MockSearchView::default();
        let config = EntityResolverConfig::default();

        let existing = Node {
            id: "ent_jane".to_string(),
            node_type: NodeType::Entity,
            properties: BTreeMap::from([
                ("name".to_string(), MetadataValue::String("Jane Doe".to_string())),
                ("entity_type".to_string(), MetadataValue::String(format!("{:?}", crate::schema::EntityType::Person))),
            ]),
            embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        graph.create_node(existing.clone()).await.unwrap();
        search
            .index(crate::storage::SearchDoc {
                id: "ent_jane".to_string(),
                text: "Jane Doe".to_string(),
                fields: Filters::new(),
            })
            .await
            .unwrap();

        let resolved = resolve_entities(vec![entity("Jane Doe")], &vector, &graph, &search, &config).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_ne!(resolved[0].decision.action, ResolutionAction::Create);
    }
}
