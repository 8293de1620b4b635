//! Multi-factor result ranker (§4.9): rescales fused results by
//! relevance, freshness, authority, quality, diversity, and an optional
//! personalization bonus, then applies boosts/penalties.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use memory_config::RankerConfig;

use crate::fusion::FusedItem;

#[derive(Debug, Clone, Default)]
pub struct UserPreferences {
    pub topics: Vec<String>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RankingContext<'a> {
    pub query_terms: &'a [String],
    pub now: DateTime<Utc>,
    pub user_id: Option<String>,
    pub preferences: UserPreferences,
}

#[derive(Debug, Clone, Default)]
pub struct FactorScores {
    pub relevance: f32,
    pub freshness: f32,
    pub authority: f32,
    pub quality: f32,
    pub diversity: f32,
    pub personalization: f32,
}

#[derive(Debug, Clone)]
pub struct RankedItem {
    pub id: String,
    pub content: String,
    pub source: String,
    pub base_score: f32,
    pub factors: FactorScores,
    pub final_score: f32,
    pub created_at: Option<DateTime<Utc>>,
}

/// Applies §4.9's per-item factor scores, a weighted average, then the
/// boost/penalty rules, and returns results sorted descending by final
/// score (ties broken by `base_score`).
pub fn rank(items: Vec<FusedItem>, context: &RankingContext, config: &RankerConfig) -> Vec<RankedItem> {
    let contents: Vec<&str> = items.iter().map(|i| i.content.as_str()).collect();
    let mut ranked: Vec<RankedItem> = items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let relevance = relevance_score(item, context.query_terms);
            let freshness = freshness_score(item, context.now, config.half_life_days);
            let authority = authority_score(item);
            let quality = quality_score(item);
            let diversity = diversity_score(idx, &contents);
            let personalization = personalization_score(item, &context.preferences);

            let factors = FactorScores {
                relevance,
                freshness,
                authority,
                quality,
                diversity,
                personalization,
            };

            let weighted = config.relevance_weight * relevance
                + config.freshness_weight * freshness
                + config.authority_weight * authority
                + config.quality_weight * quality;
            let weight_total = config.relevance_weight + config.freshness_weight + config.authority_weight + config.quality_weight;
            let mut final_score = if weight_total > 0.0 { weighted / weight_total } else { relevance };
            final_score += personalization;

            if final_score >= 0.8 {
                final_score += config.high_score_boost;
            }
            if quality <= 0.3 {
                final_score -= config.quality_penalty;
            }
            final_score = final_score.clamp(0.0, 1.0);

            RankedItem {
                id: item.id.clone(),
                content: item.content.clone(),
                source: item.source.clone(),
                base_score: item.final_score,
                factors,
                final_score,
                created_at: item.created_at,
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score).then_with(|| b.base_score.total_cmp(&a.base_score)));
    ranked
}

fn relevance_score(item: &FusedItem, query_terms: &[String]) -> f32 {
    if query_terms.is_empty() {
        return item.final_score.clamp(0.0, 1.0);
    }

    let content_lower = item.content.to_lowercase();
    let matched = query_terms.iter().filter(|term| content_lower.contains(term.as_str())).count();
    let content_match_bonus = matched as f32 * 0.05;
    let title_match_bonus = if query_terms.iter().any(|term| content_lower.starts_with(term.as_str())) { 0.05 } else { 0.0 };
    let term_coverage = matched as f32 / query_terms.len() as f32 * 0.1;

    (item.final_score + content_match_bonus + title_match_bonus + term_coverage).clamp(0.0, 1.0)
}

/// Exponential decay over the item's age in days; items with no known
/// timestamp (e.g. hydration failed) fall back to the spec's documented
/// neutral default instead of being penalized.
fn freshness_score(item: &FusedItem, now: DateTime<Utc>, half_life_days: f32) -> f32 {
    let Some(created_at) = item.created_at else {
        return 0.5;
    };
    if half_life_days <= 0.0 {
        return 0.5;
    }
    let age_days = now.signed_duration_since(created_at).num_seconds() as f32 / 86_400.0;
    (-age_days.max(0.0) / half_life_days).exp().clamp(0.0, 1.0)
}

fn authority_score(item: &FusedItem) -> f32 {
    let source = item.source.to_lowercase();
    if source.starts_with("official_") || source.starts_with("official-") {
        0.9
    } else if source.starts_with("verified_") || source.starts_with("verified-") {
        0.8
    } else if source.ends_with("_journal") || source.ends_with("_paper") {
        0.7
    } else {
        0.5
    }
}

fn quality_score(item: &FusedItem) -> f32 {
    let len = item.content.chars().count() as f32;
    if len == 0.0 {
        return 0.0;
    }
    if (400.0..=1200.0).contains(&len) {
        return 1.0;
    }
    if len < 400.0 {
        (len / 400.0).clamp(0.0, 1.0)
    } else {
        (1200.0 / len).clamp(0.0, 1.0)
    }
}

fn diversity_score(idx: usize, contents: &[&str]) -> f32 {
    if contents.len() <= 1 {
        return 1.0;
    }
    let this = tokenize(contents[idx]);
    if this.is_empty() {
        return 1.0;
    }

    let mut max_similarity: f32 = 0.0;
    for (j, other) in contents.iter().enumerate() {
        if j >= idx {
            continue;
        }
        let other_tokens = tokenize(other);
        max_similarity = max_similarity.max(jaccard(&this, &other_tokens));
    }
    (1.0 - max_similarity).clamp(0.0, 1.0)
}

fn personalization_score(item: &FusedItem, preferences: &UserPreferences) -> f32 {
    let mut bonus: f32 = 0.0;
    if preferences.sources.iter().any(|s| s.eq_ignore_ascii_case(&item.source)) {
        bonus += 0.05;
    }
    let content_lower = item.content.to_lowercase();
    if preferences.topics.iter().any(|topic| content_lower.contains(&topic.to_lowercase())) {
        bonus += 0.05;
    }
    bonus.min(0.1)
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn item(id: &str, content: &str, source: &str, final_score: f32) -> FusedItem {
        FusedItem {
            id: id.to_string(),
            content: content.to_string(),
            source: source.to_string(),
            rrf_score: final_score,
            weighted_score: 0.0,
            final_score,
            rank: 0,
            source_methods: vec!["vector".to_string()],
            method_scores: BTreeMap::new(),
            created_at: None,
        }
    }

    fn context() -> RankingContext<'static> {
        RankingContext {
            query_terms: &[],
            now: Utc::now(),
            user_id: None,
            preferences: UserPreferences::default(),
        }
    }

    #[test]
    fn empty_query_passes_base_score_through_as_relevance() {
        let items = vec![item("a", "hello world", "news", 0.6)];
        let ranked = rank(items, &context(), &RankerConfig::default());
        assert!((ranked[0].factors.relevance - 0.6).abs() < 1e-6);
    }

    #[test]
    fn official_source_gets_high_authority() {
        let items = vec![item("a", "text", "official_docs", 0.5)];
        let ranked = rank(items, &context(), &RankerConfig::default());
        assert!((ranked[0].factors.authority - 0.9).abs() < 1e-6);
    }

    #[test]
    fn single_item_gets_full_diversity() {
        let items = vec![item("a", "unique text here", "src", 0.5)];
        let ranked = rank(items, &context(), &RankerConfig::default());
        assert_eq!(ranked[0].factors.diversity, 1.0);
    }

    #[test]
    fn identical_content_items_reduce_each_others_diversity() {
        let items = vec![item("a", "same words repeated text", "src", 0.9), item("b", "same words repeated text", "src2", 0.5)];
        let ranked = rank(items, &context(), &RankerConfig::default());
        let second = ranked.iter().find(|r| r.id == "b").unwrap();
        assert!(second.factors.diversity < 1.0);
    }

    #[test]
    fn final_scores_are_always_clamped_into_unit_range() {
        let items = vec![item("a", "x", "official_docs", 1.0), item("b", "", "src", 0.0)];
        let ranked = rank(items, &context(), &RankerConfig::default());
        for r in &ranked {
            assert!((0.0..=1.0).contains(&r.final_score));
        }
    }

    #[test]
    fn sort_order_is_descending_by_final_score() {
        let items = vec![item("a", "low", "src", 0.2), item("b", "high", "official_docs", 0.9)];
        let ranked = rank(items, &context(), &RankerConfig::default());
        assert_eq!(ranked[0].id, "b");
    }

    #[test]
    fn missing_timestamp_falls_back_to_neutral_freshness() {
        let items = vec![item("a", "text", "src", 0.5)];
        let ranked = rank(items, &context(), &RankerConfig::default());
        assert!((ranked[0].factors.freshness - 0.5).abs() < 1e-6);
    }

    #[test]
    fn fresher_item_scores_higher_freshness_than_older_item() {
        let now = Utc::now();
        let mut fresh = item("a", "text", "src", 0.5);
        fresh.created_at = Some(now - chrono::Duration::days(1));
        let mut old = item("b", "text", "src", 0.5);
        old.created_at = Some(now - chrono::Duration::days(365));

        let config = RankerConfig::default();
        let ctx = RankingContext {
            query_terms: &[],
            now,
            user_id: None,
            preferences: UserPreferences::default(),
        };
        let ranked = rank(vec![fresh, old], &ctx, &config);
        let a = ranked.iter().find(|r| r.id == "a").unwrap();
        let b = ranked.iter().find(|r| r.id == "b").unwrap();
        assert!(a.factors.freshness > b.factors.freshness);
    }
}
