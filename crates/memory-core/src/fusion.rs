//! Result fuser (§4.8): Reciprocal-Rank Fusion across per-method
//! ranked lists.
//!
//! Grounded on `other_examples/7702b1da_neur0map-yinx__src-retrieval-hybrid.rs.rs`'s
//! `reciprocal_rank_fusion` free function + config struct shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use memory_config::FusionConfig;

use crate::retrieval::{FusionInput, FusionItem};

#[derive(Debug, Clone)]
pub struct FusedItem {
    pub id: String,
    pub content: String,
    pub source: String,
    pub rrf_score: f32,
    pub weighted_score: f32,
    pub final_score: f32,
    pub rank: usize,
    pub source_methods: Vec<String>,
    pub method_scores: BTreeMap<String, f32>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct FusionStats {
    pub methods: Vec<String>,
    pub per_method_counts: BTreeMap<String, usize>,
    pub pairwise_overlap: BTreeMap<(String, String), usize>,
    pub non_default_weights: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FusionResponse {
    pub items: Vec<FusedItem>,
    pub stats: FusionStats,
}

/// Runs the full §4.8 algorithm: validate inputs, normalize per-method
/// scores, accumulate RRF, compute the weighted/combined score, then
/// filter, sort, and truncate.
pub fn fuse(inputs: Vec<FusionInput>, config: &FusionConfig) -> FusionResponse {
    let inputs: Vec<FusionInput> = inputs.into_iter().filter(|i| !i.method.is_empty()).collect();
    if inputs.is_empty() {
        return FusionResponse::default();
    }

    let method_weight = |method: &str| -> f32 {
        match method {
            "vector" => non_zero(config.vector_weight),
            "keyword" => non_zero(config.keyword_weight),
            "graph" => non_zero(config.graph_weight),
            _ => 1.0,
        }
    };

    let normalized_inputs: Vec<FusionInput> = inputs
        .into_iter()
        .map(|input| {
            let mut input = input;
            if config.normalize_scores {
                normalize_in_place(&mut input.results);
            }
            input
        })
        .collect();

    let mut rrf_scores: BTreeMap<String, f32> = BTreeMap::new();
    let mut source_methods: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut method_scores: BTreeMap<String, BTreeMap<String, f32>> = BTreeMap::new();
    let mut items_by_id: BTreeMap<String, FusionItem> = BTreeMap::new();

    for input in &normalized_inputs {
        for (idx, item) in input.results.iter().enumerate() {
            let rank = idx + 1;
            *rrf_scores.entry(item.id.clone()).or_insert(0.0) += 1.0 / (config.rrf_constant + rank as f32);
            source_methods.entry(item.id.clone()).or_default().push(input.method.clone());
            method_scores.entry(item.id.clone()).or_default().insert(input.method.clone(), item.score);
            items_by_id.entry(item.id.clone()).or_insert_with(|| item.clone());
        }
    }

    let mut fused: Vec<FusedItem> = rrf_scores
        .into_iter()
        .map(|(id, rrf_score)| {
            let methods = source_methods.remove(&id).unwrap_or_default();
            let scores = method_scores.remove(&id).unwrap_or_default();
            let item = items_by_id.get(&id).cloned().unwrap_or(FusionItem {
                id: id.clone(),
                score: 0.0,
                content: String::new(),
                source: String::new(),
                metadata: BTreeMap::new(),
                created_at: None,
            });

            let weight_sum: f32 = methods.iter().map(|m| method_weight(m)).sum();
            let weighted_score = if weight_sum > 0.0 {
                methods.iter().map(|m| method_weight(m) * scores.get(m).copied().unwrap_or(0.0)).sum::<f32>() / weight_sum
            } else {
                0.0
            };

            let final_score = rrf_score * (1.0 + weighted_score);

            FusedItem {
                id,
                content: item.content,
                source: item.source,
                rrf_score,
                weighted_score,
                final_score,
                rank: 0,
                source_methods: methods,
                method_scores: scores,
                created_at: item.created_at,
            }
        })
        .collect();

    fused.retain(|item| item.final_score >= config.min_score);
    fused.sort_by(|a, b| b.final_score.total_cmp(&a.final_score).then_with(|| b.rrf_score.total_cmp(&a.rrf_score)));
    fused.truncate(config.max_results);
    for (idx, item) in fused.iter_mut().enumerate() {
        item.rank = idx + 1;
    }

    let stats = build_stats(&normalized_inputs, config);

    FusionResponse { items: fused, stats }
}

fn non_zero(weight: f32) -> f32 {
    if weight == 0.0 {
        1.0
    } else {
        weight
    }
}

fn normalize_in_place(results: &mut [FusionItem]) {
    if results.is_empty() {
        return;
    }
    let min = results.iter().map(|r| r.score).fold(f32::INFINITY, f32::min);
    let max = results.iter().map(|r| r.score).fold(f32::NEG_INFINITY, f32::max);
    let span = max - min;
    for item in results.iter_mut() {
        item.score = if span <= f32::EPSILON { 1.0 } else { (item.score - min) / span };
    }
}

fn build_stats(inputs: &[FusionInput], config: &FusionConfig) -> FusionStats {
    let methods: Vec<String> = inputs.iter().map(|i| i.method.clone()).collect();
    let per_method_counts: BTreeMap<String, usize> = inputs.iter().map(|i| (i.method.clone(), i.results.len())).collect();

    let mut pairwise_overlap = BTreeMap::new();
    for i in 0..inputs.len() {
        for j in (i + 1)..inputs.len() {
            let ids_i: std::collections::BTreeSet<&str> = inputs[i].results.iter().map(|r| r.id.as_str()).collect();
            let ids_j: std::collections::BTreeSet<&str> = inputs[j].results.iter().map(|r| r.id.as_str()).collect();
            let overlap = ids_i.intersection(&ids_j).count();
            pairwise_overlap.insert((inputs[i].method.clone(), inputs[j].method.clone()), overlap);
        }
    }

    let non_default_weights = config.vector_weight != 1.0 || config.keyword_weight != 1.0 || config.graph_weight != 1.0;

    FusionStats {
        methods,
        per_method_counts,
        pairwise_overlap,
        non_default_weights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, score: f32) -> FusionItem {
        FusionItem {
            id: id.to_string(),
            score,
            content: String::new(),
            source: String::new(),
            metadata: BTreeMap::new(),
            created_at: None,
        }
    }

    /// S2: V=[A(0.9),B(0.8)], K=[B(0.9),C(0.6)], k=60, unit weights,
    /// normalize_scores=false. Expect RRF A=1/61, B=1/62+1/61, C=1/62,
    /// and fused order B, A, C.
    #[test]
    fn s2_rrf_matches_spec_worked_example() {
        let config = FusionConfig {
            rrf_constant: 60.0,
            vector_weight: 1.0,
            keyword_weight: 1.0,
            graph_weight: 1.0,
            min_score: 0.0,
            max_results: 50,
            normalize_scores: false,
        };
        let vector = FusionInput {
            method: "vector".to_string(),
            results: vec![item("A", 0.9), item("B", 0.8)],
            weight: 1.0,
        };
        let keyword = FusionInput {
            method: "keyword".to_string(),
            results: vec![item("B", 0.9), item("C", 0.6)],
            weight: 1.0,
        };

        let response = fuse(vec![vector, keyword], &config);
        let ids: Vec<&str> = response.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A", "C"]);

        let a = response.items.iter().find(|i| i.id == "A").unwrap();
        let b = response.items.iter().find(|i| i.id == "B").unwrap();
        let c = response.items.iter().find(|i| i.id == "C").unwrap();
        assert!((a.rrf_score - 1.0 / 61.0).abs() < 1e-6);
        assert!((b.rrf_score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-6);
        assert!((c.rrf_score - 1.0 / 62.0).abs() < 1e-6);
    }

    #[test]
    fn p3_final_score_is_never_less_than_rrf_score() {
        let config = FusionConfig::default();
        let vector = FusionInput {
            method: "vector".to_string(),
            results: vec![item("A", 0.5), item("B", 0.2)],
            weight: 1.0,
        };
        let response = fuse(vec![vector], &config);
        for item in &response.items {
            assert!(item.final_score >= item.rrf_score - 1e-6);
        }
    }

    #[test]
    fn ranks_are_a_permutation_of_one_to_n() {
        let config = FusionConfig::default();
        let vector = FusionInput {
            method: "vector".to_string(),
            results: vec![item("A", 0.9), item("B", 0.5), item("C", 0.1)],
            weight: 1.0,
        };
        let response = fuse(vec![vector], &config);
        let mut ranks: Vec<usize> = response.items.iter().map(|i| i.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn empty_inputs_yield_empty_response() {
        let response = fuse(Vec::new(), &FusionConfig::default());
        assert!(response.items.is_empty());
        assert!(response.stats.methods.is_empty());
    }

    #[test]
    fn shared_item_has_two_source_methods_and_two_method_scores() {
        let config = FusionConfig {
            normalize_scores: false,
            ..FusionConfig::default()
        };
        let vector = FusionInput {
            method: "vector".to_string(),
            results: vec![item("A", 0.9)],
            weight: 1.0,
        };
        let keyword = FusionInput {
            method: "keyword".to_string(),
            results: vec![item("A", 0.7)],
            weight: 1.0,
        };
        let response = fuse(vec![vector, keyword], &config);
        let a = response.items.iter().find(|i| i.id == "A").unwrap();
        assert_eq!(a.source_methods.len(), 2);
        assert_eq!(a.method_scores.len(), 2);
    }
}
