//! Query processor (§4.6): normalize and expand a raw query string
//! before retrieval.
//!
//! Grounded on `crates/memory/src/retrieval.rs::tokenize` for stop-word
//! filtering with plain stdlib string handling.

use memory_config::QueryProcessorConfig;

use crate::content::{EntityExtractor, HeuristicEntityExtractor};
use crate::schema::Entity;

#[derive(Debug, Clone)]
pub struct ProcessedQuery {
    pub original: String,
    pub normalized: String,
    pub expanded: Vec<String>,
    pub keywords: Vec<String>,
    pub entities: Vec<Entity>,
    pub filters: std::collections::BTreeMap<String, String>,
}

const SYNONYMS: &[(&str, &str)] = &[
    ("founded", "established"),
    ("works at", "employed by"),
    ("ceo", "chief executive officer"),
    ("org", "organization"),
    ("co", "company"),
];

/// Normalizes (trim, collapse whitespace, strip control chars), then
/// expands into up to `max_expansions` paraphrastic variants
/// (original always variant #0), extracts stop-word-filtered keywords,
/// and extracts entities at a lower confidence floor than the writer
/// uses.
pub async fn process_query(raw: &str, config: &QueryProcessorConfig, filters: std::collections::BTreeMap<String, String>) -> ProcessedQuery {
    let normalized = normalize(raw);

    let mut expanded = vec![normalized.clone()];
    if config.enable_expansion {
        for (from, to) in SYNONYMS {
            if expanded.len() >= config.max_expansions {
                break;
            }
            if normalized.contains(from) {
                expanded.push(normalized.replace(from, to));
            }
        }
        expanded.truncate(config.max_expansions.max(1));
    }

    let keywords = extract_keywords(&normalized, &config.stop_words);

    let extractor = HeuristicEntityExtractor;
    let entities = extractor.extract(raw, "query", 0.3).await;

    ProcessedQuery {
        original: raw.to_string(),
        normalized,
        expanded,
        keywords,
        entities,
        filters,
    }
}

fn normalize(raw: &str) -> String {
    let stripped: String = raw.chars().filter(|c| !c.is_control() || *c == ' ').collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim().to_lowercase()
}

fn extract_keywords(normalized: &str, stop_words: &[String]) -> Vec<String> {
    let stop_set: std::collections::BTreeSet<&str> = stop_words.iter().map(|s| s.as_str()).collect();
    let mut seen = std::collections::BTreeSet::new();
    let mut keywords = Vec::new();
    for word in normalized.split_whitespace() {
        let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if cleaned.is_empty() || stop_set.contains(cleaned.as_str()) {
            continue;
        }
        if seen.insert(cleaned.clone()) {
            keywords.push(cleaned);
        }
    }
    keywords
}
