//! Evidence assembler (§4.10): turns a ranked result list into
//! self-explaining `Evidence` records, with conflict detection and an
//! optional self-critique summary.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use memory_config::{AssemblyConfig, Verbosity};

use crate::ranking::RankedItem;
use crate::schema::{Evidence, ProvenanceInfo};

#[derive(Debug, Clone, Default)]
pub struct GraphContext {
    pub paths: std::collections::BTreeMap<String, Vec<String>>,
    pub related_entity_counts: std::collections::BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct AssemblyContext {
    pub query: String,
    pub query_terms: Vec<String>,
    pub user_id: Option<String>,
    pub request_time: DateTime<Utc>,
    pub graph_context: GraphContext,
    pub retrieval_method: String,
}

#[derive(Debug, Clone)]
pub struct ConflictInfo {
    pub kind: String,
    pub severity: String,
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssemblyStats {
    pub pre_filter_count: usize,
    pub post_confidence_filter_count: usize,
    pub post_dedup_count: usize,
    pub post_truncate_count: usize,
    pub assembly_time_ms: u64,
    pub confidence_histogram: [usize; 5],
}

#[derive(Debug, Clone, Default)]
pub struct AssemblyResponse {
    pub evidence: Vec<Evidence>,
    pub conflicts: Vec<ConflictInfo>,
    pub self_critique: Option<String>,
    pub stats: AssemblyStats,
}

/// Runs the full §4.10 pipeline: confidence filter, Jaccard dedup,
/// truncate, build each `Evidence`, then conflict detection and an
/// optional self-critique.
pub fn assemble(ranked: Vec<RankedItem>, context: &AssemblyContext, config: &AssemblyConfig) -> AssemblyResponse {
    let started = context.request_time;
    let pre_filter_count = ranked.len();

    let confidence_filtered: Vec<RankedItem> = ranked.into_iter().filter(|item| item.final_score >= config.min_confidence).collect();
    let post_confidence_filter_count = confidence_filtered.len();

    let deduped = dedup_by_similarity(confidence_filtered, config.similarity_threshold);
    let post_dedup_count = deduped.len();

    let mut truncated = deduped;
    truncated.truncate(config.max_evidence_items);
    let post_truncate_count = truncated.len();

    let mut evidence: Vec<Evidence> = truncated
        .into_iter()
        .map(|item| build_evidence(&item, context, config))
        .filter(|e| validate(e, config.max_content_length))
        .collect();
    evidence.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let conflicts = detect_conflicts(&evidence, config.conflict_top_k);
    let self_critique = if config.enable_self_critique { Some(self_critique_summary(&evidence)) } else { None };

    let confidence_histogram = histogram(&evidence);
    let elapsed_ms = Utc::now().signed_duration_since(started).num_milliseconds().max(0) as u64;

    AssemblyResponse {
        evidence,
        conflicts,
        self_critique,
        stats: AssemblyStats {
            pre_filter_count,
            post_confidence_filter_count,
            post_dedup_count,
            post_truncate_count,
            assembly_time_ms: elapsed_ms,
            confidence_histogram,
        },
    }
}

fn dedup_by_similarity(items: Vec<RankedItem>, threshold: f32) -> Vec<RankedItem> {
    let mut kept: Vec<RankedItem> = Vec::new();
    let mut kept_tokens: Vec<BTreeSet<String>> = Vec::new();

    for item in items {
        let tokens = tokenize(&item.content);
        let is_duplicate = kept_tokens.iter().any(|other| jaccard(&tokens, other) >= threshold);
        if !is_duplicate {
            kept_tokens.push(tokens);
            kept.push(item);
        }
    }
    kept
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase().split_whitespace().map(|s| s.to_string()).collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

fn build_evidence(item: &RankedItem, context: &AssemblyContext, config: &AssemblyConfig) -> Evidence {
    let content = truncate_with_ellipsis(&item.content, config.max_content_length);
    let graph_path = context.graph_context.paths.get(&item.id).cloned();
    let related_entity_count = context.graph_context.related_entity_counts.get(&item.id).copied().unwrap_or(0);

    let matched_terms: Vec<&str> = context.query_terms.iter().map(|t| t.as_str()).filter(|term| item.content.to_lowercase().contains(term)).collect();
    let timestamp = item.created_at.unwrap_or(context.request_time);

    let why_selected = build_why_selected(item, &matched_terms, graph_path.as_deref(), related_entity_count, config.verbosity, timestamp, context.request_time);
    let relation_map = build_relation_map(item, context, related_entity_count);

    Evidence {
        content,
        source: item.source.clone(),
        confidence: item.final_score.clamp(0.0, 1.0),
        why_selected,
        relation_map,
        provenance: ProvenanceInfo {
            source: item.source.clone(),
            timestamp,
            version: 1,
            user_id: context.user_id.clone(),
        },
        graph_path,
    }
}

fn truncate_with_ellipsis(content: &str, max_len: usize) -> String {
    if content.chars().count() <= max_len {
        return content.to_string();
    }
    let truncated: String = content.chars().take(max_len.saturating_sub(1)).collect();
    format!("{truncated}…")
}

fn score_band(score: f32) -> &'static str {
    if score >= 0.8 {
        "high"
    } else if score >= 0.5 {
        "moderate"
    } else {
        "low"
    }
}

fn recency_band(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> &'static str {
    let age_days = now.signed_duration_since(timestamp).num_days();
    if age_days <= 7 {
        "recent"
    } else if age_days <= 90 {
        "aging"
    } else {
        "stale"
    }
}

fn build_why_selected(
    item: &RankedItem,
    matched_terms: &[&str],
    graph_path: Option<&[String]>,
    related_entity_count: usize,
    verbosity: Verbosity,
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
) -> String {
    let band = score_band(item.final_score);
    let hops = graph_path.map(|p| p.len()).unwrap_or(0);
    let recency = recency_band(timestamp, now);

    match verbosity {
        Verbosity::Basic => format!("{band} relevance match"),
        Verbosity::Detailed => {
            format!("{band} relevance, {} matched term(s), {related_entity_count} related entit(y/ies), {recency}", matched_terms.len())
        }
        Verbosity::Verbose => {
            let terms = if matched_terms.is_empty() { "none".to_string() } else { matched_terms.join(", ") };
            format!(
                "{band} relevance (score {:.2}); matched terms: {terms}; {hops} graph hop(s); {related_entity_count} related entit(y/ies); source trust {:.2}; quality {:.2}; {recency}",
                item.final_score, item.factors.authority, item.factors.quality
            )
        }
    }
}

fn build_relation_map(item: &RankedItem, context: &AssemblyContext, related_entity_count: usize) -> std::collections::BTreeMap<String, String> {
    let mut map = std::collections::BTreeMap::new();
    if !context.query.is_empty() {
        map.insert(context.query.clone(), "query_entity".to_string());
    }
    if related_entity_count > 0 {
        map.insert(format!("related:{}", item.id), "related_entity".to_string());
    }
    map.insert(item.source.clone(), "source".to_string());
    map.insert(context.retrieval_method.clone(), "category".to_string());
    map
}

fn detect_conflicts(evidence: &[Evidence], top_k: usize) -> Vec<ConflictInfo> {
    let bounded = &evidence[..evidence.len().min(top_k)];
    let mut conflicts = Vec::new();
    for i in 0..bounded.len() {
        for j in (i + 1)..bounded.len() {
            let a = &bounded[i];
            let b = &bounded[j];
            if a.source != b.source && (a.confidence - b.confidence).abs() > 0.5 {
                conflicts.push(ConflictInfo {
                    kind: "confidence_mismatch".to_string(),
                    severity: "medium".to_string(),
                    left: a.source.clone(),
                    right: b.source.clone(),
                });
            }
        }
    }
    conflicts
}

fn self_critique_summary(evidence: &[Evidence]) -> String {
    if evidence.is_empty() {
        return "No evidence survived filtering for this query.".to_string();
    }
    let mean: f32 = evidence.iter().map(|e| e.confidence).sum::<f32>() / evidence.len() as f32;
    if mean >= 0.75 {
        "High confidence: evidence strongly supports the answer.".to_string()
    } else if mean >= 0.5 {
        "Moderate confidence: evidence is supportive but not conclusive.".to_string()
    } else {
        "Low confidence: evidence is sparse or weakly relevant.".to_string()
    }
}

fn histogram(evidence: &[Evidence]) -> [usize; 5] {
    let mut bins = [0usize; 5];
    for e in evidence {
        let idx = ((e.confidence.clamp(0.0, 1.0) / 0.2) as usize).min(4);
        bins[idx] += 1;
    }
    bins
}

fn validate(evidence: &Evidence, max_content_length: usize) -> bool {
    !evidence.content.is_empty()
        && !evidence.source.is_empty()
        && (0.0..=1.0).contains(&evidence.confidence)
        && evidence.content.chars().count() <= max_content_length
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::FactorScores;

    fn ranked(id: &str, content: &str, source: &str, score: f32) -> RankedItem {
        RankedItem {
            id: id.to_string(),
            content: content.to_string(),
            source: source.to_string(),
            base_score: score,
            factors: FactorScores::default(),
            final_score: score,
            created_at: None,
        }
    }

    fn context() -> AssemblyContext {
        AssemblyContext {
            query: "openai".to_string(),
            query_terms: vec!["openai".to_string()],
            user_id: None,
            request_time: Utc::now(),
            graph_context: GraphContext::default(),
            retrieval_method: "hybrid".to_string(),
        }
    }

    #[test]
    fn low_confidence_items_are_filtered_out() {
        let mut config = AssemblyConfig::default();
        config.min_confidence = 0.5;
        let items = vec![ranked("a", "openai was founded", "news", 0.9), ranked("b", "irrelevant", "news", 0.1)];
        let response = assemble(items, &context(), &config);
        assert_eq!(response.evidence.len(), 1);
        assert_eq!(response.stats.post_confidence_filter_count, 1);
    }

    #[test]
    fn near_duplicate_content_is_deduped() {
        let config = AssemblyConfig::default();
        let items = vec![
            ranked("a", "openai was founded in san francisco", "news", 0.9),
            ranked("b", "openai was founded in san francisco", "blog", 0.8),
        ];
        let response = assemble(items, &context(), &config);
        assert_eq!(response.evidence.len(), 1);
    }

    #[test]
    fn content_beyond_max_length_gets_ellipsis() {
        let mut config = AssemblyConfig::default();
        config.max_content_length = 5;
        let items = vec![ranked("a", "way too long a string", "news", 0.9)];
        let response = assemble(items, &context(), &config);
        assert!(response.evidence[0].content.ends_with('…'));
        assert!(validate(&response.evidence[0], config.max_content_length));
    }

    #[test]
    fn conflicting_confidences_across_sources_are_flagged() {
        let config = AssemblyConfig::default();
        let items = vec![ranked("a", "alpha report one", "source-a", 0.95), ranked("b", "beta report two", "source-b", 0.2)];
        let response = assemble(items, &context(), &config);
        assert_eq!(response.conflicts.len(), 1);
        assert_eq!(response.conflicts[0].kind, "confidence_mismatch");
    }

    #[test]
    fn empty_evidence_yields_no_evidence_self_critique() {
        let config = AssemblyConfig::default();
        let response = assemble(Vec::new(), &context(), &config);
        assert_eq!(response.self_critique.as_deref(), Some("No evidence survived filtering for this query."));
    }

    #[test]
    fn why_selected_reports_recency_band_for_detailed_verbosity() {
        let mut config = AssemblyConfig::default();
        config.verbosity = Verbosity::Detailed;
        let mut item = ranked("a", "openai was founded", "news", 0.9);
        item.created_at = Some(Utc::now() - chrono::Duration::days(400));
        let response = assemble(vec![item], &context(), &config);
        assert!(response.evidence[0].why_selected.contains("stale"));
    }

    #[test]
    fn provenance_timestamp_uses_item_created_at_when_present() {
        let config = AssemblyConfig::default();
        let timestamp = Utc::now() - chrono::Duration::days(3);
        let mut item = ranked("a", "openai was founded", "news", 0.9);
        item.created_at = Some(timestamp);
        let response = assemble(vec![item], &context(), &config);
        assert_eq!(response.evidence[0].provenance.timestamp, timestamp);
    }

    #[test]
    fn histogram_buckets_sum_to_evidence_count() {
        let config = AssemblyConfig::default();
        let items = vec![ranked("a", "one", "src", 0.1), ranked("b", "two items here", "src2", 0.9)];
        let response = assemble(items, &context(), &config);
        let total: usize = response.stats.confidence_histogram.iter().sum();
        assert_eq!(total, response.evidence.len());
    }
}
