//! Input sanitization (§6/§7). Applied once at the write and recall
//! boundaries; everything downstream trusts its output.

use memory_config::ValidationConfig;
use regex::Regex;

use crate::error::EngineError;
use crate::schema::MetadataValue;

/// A write request before sanitization. Mirrors §6's abridged
/// `memory_write` input.
pub struct WriteInput<'a> {
    pub content: &'a str,
    pub source: &'a str,
    pub tags: &'a [String],
    pub metadata: &'a std::collections::BTreeMap<String, MetadataValue>,
}

#[derive(Debug)]
pub struct ValidatedWrite {
    pub content: String,
    pub source: String,
}

/// Validates and HTML-escapes `input.content` exactly once. Returns the
/// sanitized content/source pair, or the first `ValidationError`
/// encountered naming the offending field (§7 `ValidationError`).
pub fn validate_write(input: &WriteInput, config: &ValidationConfig) -> Result<ValidatedWrite, EngineError> {
    let char_len = input.content.chars().count();
    if char_len == 0 || char_len > config.max_content_len {
        return Err(EngineError::validation(
            "content",
            format!("length must be in 1..={}", config.max_content_len),
            char_len.to_string(),
        ));
    }
    for pattern in &config.blocked_patterns {
        let re = Regex::new(pattern).map_err(|e| EngineError::Config(format!("invalid blocked_pattern {pattern:?}: {e}")))?;
        if re.is_match(input.content) {
            return Err(EngineError::validation("content", format!("matched blocked pattern {pattern:?}"), input.content.to_string()));
        }
    }

    if input.source.chars().count() > config.max_source_len {
        return Err(EngineError::validation(
            "source",
            format!("length must be <= {}", config.max_source_len),
            input.source.to_string(),
        ));
    }

    if input.tags.len() > config.max_tags {
        return Err(EngineError::validation(
            "tags",
            format!("at most {} tags allowed", config.max_tags),
            input.tags.len().to_string(),
        ));
    }
    for tag in input.tags {
        if tag.chars().count() > config.max_tag_len {
            return Err(EngineError::validation("tags", format!("tag exceeds {} characters", config.max_tag_len), tag.clone()));
        }
    }

    if input.metadata.len() > config.max_metadata_keys {
        return Err(EngineError::validation(
            "metadata",
            format!("at most {} metadata keys allowed", config.max_metadata_keys),
            input.metadata.len().to_string(),
        ));
    }
    for (key, value) in input.metadata {
        if value.byte_len() > config.max_metadata_value_len {
            return Err(EngineError::validation(
                "metadata",
                format!("value for key {key:?} exceeds {} bytes", config.max_metadata_value_len),
                key.clone(),
            ));
        }
    }

    Ok(ValidatedWrite {
        content: html_escape(input.content),
        source: input.source.to_string(),
    })
}

/// A recall request before sanitization. Mirrors §6's `memory_recall`
/// abridged input.
pub struct RecallInput<'a> {
    pub query: &'a str,
    pub max_results: usize,
    pub time_budget_ms: u64,
}

const MAX_TIME_BUDGET_MS: u64 = 30_000;
const MAX_RESULTS_CEILING: usize = 1000;

pub fn validate_recall(input: &RecallInput) -> Result<(), EngineError> {
    if input.query.trim().is_empty() {
        return Err(EngineError::validation("query", "must be non-empty", input.query.to_string()));
    }
    if input.max_results == 0 || input.max_results > MAX_RESULTS_CEILING {
        return Err(EngineError::validation(
            "max_results",
            format!("must be in 1..={MAX_RESULTS_CEILING}"),
            input.max_results.to_string(),
        ));
    }
    if input.time_budget_ms > MAX_TIME_BUDGET_MS {
        return Err(EngineError::validation(
            "time_budget_ms",
            format!("must be <= {MAX_TIME_BUDGET_MS}"),
            input.time_budget_ms.to_string(),
        ));
    }
    Ok(())
}

/// Applied exactly once, after all validation has already run against
/// the raw content — escaping before validation would let an escaped
/// payload slip past the blocked-pattern check.
fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config() -> ValidationConfig {
        ValidationConfig::default()
    }

    #[test]
    fn rejects_empty_content() {
        let input = WriteInput {
            content: "",
            source: "s",
            tags: &[],
            metadata: &BTreeMap::new(),
        };
        let err = validate_write(&input, &config()).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field, .. } if field == "content"));
    }

    #[test]
    fn blocked_pattern_rejects_script_tag() {
        let input = WriteInput {
            content: "<script>bad</script>",
            source: "s",
            tags: &[],
            metadata: &BTreeMap::new(),
        };
        assert!(validate_write(&input, &config()).is_err());
    }

    #[test]
    fn substring_of_ordinary_word_is_not_blocked() {
        let input = WriteInput {
            content: "Discuss metadata: structure",
            source: "s",
            tags: &[],
            metadata: &BTreeMap::new(),
        };
        assert!(validate_write(&input, &config()).is_ok());
    }

    #[test]
    fn html_escape_applied_once() {
        let input = WriteInput {
            content: "A & B",
            source: "s",
            tags: &[],
            metadata: &BTreeMap::new(),
        };
        let out = validate_write(&input, &config()).unwrap();
        assert_eq!(out.content, "A &amp; B");
    }

    #[test]
    fn recall_rejects_blank_query() {
        let input = RecallInput {
            query: "   ",
            max_results: 10,
            time_budget_ms: 1000,
        };
        assert!(validate_recall(&input).is_err());
    }
}
