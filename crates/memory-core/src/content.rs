//! Content processor (§4.2): preprocess → chunk → extract entities →
//! extract claims.
//!
//! Grounded on `crates/memory/src/retrieval.rs::tokenize` for plain
//! stdlib tokenization (no external NLP dependency) and
//! `crates/memory/src/sentiment.rs` for the small heuristic/keyword
//! table style used by the default extractors.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use memory_config::{ChunkStrategy, ContentProcessorConfig};
use sha2::{Digest, Sha256};

use crate::schema::{Chunk, ChunkMetadata, Claim, Entity, EntityType, NumericVector};

#[derive(Debug, Default, Clone)]
pub struct ProcessingStats {
    pub chunks_created: usize,
    pub entities_extracted: usize,
    pub claims_extracted: usize,
    pub preprocessing_applied: bool,
}

pub struct ProcessingResult {
    pub chunks: Vec<Chunk>,
    pub entities: Vec<Entity>,
    pub claims: Vec<Claim>,
    pub stats: ProcessingStats,
}

/// Input text → list of entities/claims, each with a confidence at or
/// above threshold (§4.2: "specified only by their contract"). An
/// implementation may delegate to rules, models, or hybrids.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, text: &str, source: &str, min_confidence: f32) -> Vec<Entity>;
}

#[async_trait]
pub trait ClaimExtractor: Send + Sync {
    async fn extract(&self, text: &str, chunk_id: &str, entities: &[Entity], min_confidence: f32) -> Vec<Claim>;
}

/// Normalizes line endings, whitespace, and a handful of mojibake
/// sequences in the order §4.2 specifies. A no-op when preprocessing is
/// disabled by config.
pub fn preprocess(input: &str, config: &ContentProcessorConfig) -> String {
    if !config.enable_preprocessing {
        return input.to_string();
    }

    let mut text = input.replace("\r\n", "\n").replace('\r', "\n");
    text = text.replace('\t', " ");

    text = collapse_repeated(&text, ' ', 1);
    text = collapse_newlines(&text);
    text = text.trim().to_string();

    for (bad, good) in MOJIBAKE_TABLE {
        text = text.replace(bad, good);
    }
    for (bad, good) in SMART_PUNCTUATION_TABLE {
        text = text.replace(bad, good);
    }

    text = add_space_after_period(&text);
    text = normalize_punctuation_spacing(&text);

    text
}

const MOJIBAKE_TABLE: &[(&str, &str)] = &[
    ("\u{00e2}\u{0080}\u{0099}", "\u{2019}"),
    ("\u{00e2}\u{0080}\u{009c}", "\u{201c}"),
    ("\u{00e2}\u{0080}\u{009d}", "\u{201d}"),
    ("\u{00e2}\u{0080}\u{0093}", "\u{2013}"),
    ("\u{00e2}\u{0080}\u{0094}", "\u{2014}"),
    ("\u{00e2}\u{0080}\u{00a6}", "\u{2026}"),
];

const SMART_PUNCTUATION_TABLE: &[(&str, &str)] = &[
    ("\u{2018}", "'"),
    ("\u{2019}", "'"),
    ("\u{201c}", "\""),
    ("\u{201d}", "\""),
    ("\u{2013}", "-"),
    ("\u{2014}", "-"),
    ("\u{2026}", "..."),
];

fn collapse_repeated(text: &str, ch: char, _min_run: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_was_target = false;
    for c in text.chars() {
        if c == ch {
            if !prev_was_target {
                out.push(c);
            }
            prev_was_target = true;
        } else {
            out.push(c);
            prev_was_target = false;
        }
    }
    out
}

/// Collapses runs of 3+ newlines to exactly two, leaving single and
/// double newlines untouched.
fn collapse_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0usize;
    for c in text.chars() {
        if c == '\n' {
            run += 1;
            if run <= 2 {
                out.push(c);
            }
        } else {
            run = 0;
            out.push(c);
        }
    }
    out
}

fn add_space_after_period(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        out.push(c);
        if c == '.' {
            if let Some(&next) = chars.get(i + 1) {
                if next.is_uppercase() {
                    out.push(' ');
                }
            }
        }
    }
    out
}

fn normalize_punctuation_spacing(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if matches!(c, ',' | ':' | ';') {
            while out.ends_with(' ') {
                out.pop();
            }
            out.push(c);
            if chars.get(i + 1).map(|n| *n != ' ').unwrap_or(false) {
                out.push(' ');
            }
        } else if c == '(' {
            out.push(c);
        } else if c == ')' {
            while out.ends_with(' ') {
                out.pop();
            }
            out.push(c);
        } else {
            out.push(c);
        }
        i += 1;
    }
    out
}

/// Splits `text` into chunks per the configured strategy, each
/// annotated with `{strategy, index, start, end}` (§4.2).
pub fn chunk_text(text: &str, source: &str, config: &ContentProcessorConfig) -> Vec<Chunk> {
    let spans = match config.chunk_strategy {
        ChunkStrategy::Size => chunk_by_size(text, config.max_chunk_size, config.chunk_overlap, "size"),
        ChunkStrategy::Sentence => chunk_by_sentence(text, config),
        ChunkStrategy::Paragraph => chunk_by_paragraph(text, config),
    };

    spans
        .into_iter()
        .enumerate()
        .map(|(index, (content, start, end, strategy))| {
            let id = deterministic_chunk_id(source, index, &content);
            Chunk {
                id,
                content,
                source: source.to_string(),
                entities: Vec::new(),
                claims: Vec::new(),
                metadata: ChunkMetadata {
                    strategy,
                    index,
                    start,
                    end,
                    entity_count: 0,
                    claim_count: 0,
                },
            }
        })
        .collect()
}

fn deterministic_chunk_id(source: &str, index: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    format!("chunk_{}", hex8(&digest))
}

fn hex8(digest: &[u8]) -> String {
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

type Span = (String, usize, usize, String);

fn chunk_by_size(text: &str, max_size: usize, overlap: usize, strategy: &str) -> Vec<Span> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let mut spans = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let mut end = (start + max_size).min(chars.len());
        if end < chars.len() {
            if let Some(break_at) = (start..end).rev().find(|&i| chars[i].is_whitespace()) {
                if break_at > start {
                    end = break_at;
                }
            }
        }
        let content: String = chars[start..end].iter().collect();
        spans.push((content.trim().to_string(), start, end, strategy.to_string()));
        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    spans
}

fn chunk_by_sentence(text: &str, config: &ContentProcessorConfig) -> Vec<Span> {
    let sentences = split_sentences(text);
    pack_spans(&sentences, config, "sentence")
}

fn chunk_by_paragraph(text: &str, config: &ContentProcessorConfig) -> Vec<Span> {
    let paragraphs: Vec<(String, usize, usize)> = split_on_blank_lines(text);
    let mut spans = Vec::new();
    let mut batch: Vec<(String, usize, usize)> = Vec::new();
    let mut batch_len = 0usize;

    for paragraph in paragraphs {
        if paragraph.0.chars().count() > config.max_chunk_size {
            if !batch.is_empty() {
                spans.push(merge_spans(&batch, "paragraph"));
                batch.clear();
                batch_len = 0;
            }
            let sentence_spans = chunk_by_sentence(&paragraph.0, config);
            for (content, s, e, _) in sentence_spans {
                spans.push((content, s + paragraph.1, e + paragraph.1, "paragraph-sentence".to_string()));
            }
            continue;
        }

        let candidate_len = batch_len + paragraph.0.chars().count();
        if !batch.is_empty() && candidate_len > config.max_chunk_size {
            spans.push(merge_spans(&batch, "paragraph"));
            batch.clear();
            batch_len = 0;
        }
        batch_len += paragraph.0.chars().count();
        batch.push(paragraph);
    }
    if !batch.is_empty() {
        spans.push(merge_spans(&batch, "paragraph"));
    }

    spans
}

fn split_on_blank_lines(text: &str) -> Vec<(String, usize, usize)> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut buf = String::new();
    let mut buf_start = 0usize;
    let mut offset = 0usize;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        if line.trim().is_empty() {
            if !buf.trim().is_empty() {
                out.push((buf.trim().to_string(), buf_start, offset));
            }
            buf.clear();
            start = offset + line_len + 1;
            buf_start = start;
        } else {
            if buf.is_empty() {
                buf_start = offset;
            }
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str(line);
        }
        offset += line_len + 1;
    }
    if !buf.trim().is_empty() {
        out.push((buf.trim().to_string(), buf_start, offset.saturating_sub(1)));
    }
    let _ = start;
    out
}

fn split_sentences(text: &str) -> Vec<(String, usize, usize)> {
    let re = sentence_boundary_regex();
    let mut out = Vec::new();
    let mut last = 0usize;
    let char_indices: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let byte_to_char = |byte: usize| char_indices.iter().position(|&b| b == byte).unwrap_or(char_indices.len());

    for m in re.find_iter(text) {
        let end_byte = m.end();
        let sentence = &text[last..end_byte];
        if !sentence.trim().is_empty() {
            out.push((sentence.trim().to_string(), byte_to_char(last), byte_to_char(end_byte)));
        }
        last = end_byte;
    }
    if last < text.len() {
        let sentence = &text[last..];
        if !sentence.trim().is_empty() {
            out.push((sentence.trim().to_string(), byte_to_char(last), text.chars().count()));
        }
    }
    out
}

fn sentence_boundary_regex() -> regex::Regex {
    regex::Regex::new(r"[.!?]\s+").expect("static sentence boundary pattern is valid")
}

fn pack_spans(sentences: &[(String, usize, usize)], config: &ContentProcessorConfig, strategy: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut batch: Vec<(String, usize, usize)> = Vec::new();
    let mut batch_len = 0usize;

    for sentence in sentences {
        if sentence.0.chars().count() > config.max_chunk_size {
            if !batch.is_empty() {
                spans.push(merge_spans(&batch, strategy));
                batch.clear();
                batch_len = 0;
            }
            for oversized in chunk_by_size(&sentence.0, config.max_chunk_size, config.chunk_overlap, strategy) {
                spans.push((oversized.0, oversized.1 + sentence.1, oversized.2 + sentence.1, strategy.to_string()));
            }
            continue;
        }

        let candidate_len = batch_len + sentence.0.chars().count();
        if !batch.is_empty() && candidate_len > config.max_chunk_size {
            spans.push(merge_spans(&batch, strategy));
            batch.clear();
            batch_len = 0;
        }
        batch_len += sentence.0.chars().count();
        batch.push(sentence.clone());
    }
    if !batch.is_empty() {
        spans.push(merge_spans(&batch, strategy));
    }

    spans
}

fn merge_spans(batch: &[(String, usize, usize)], strategy: &str) -> Span {
    let content = batch.iter().map(|(c, _, _)| c.as_str()).collect::<Vec<_>>().join(" ");
    let start = batch.first().map(|(_, s, _)| *s).unwrap_or(0);
    let end = batch.last().map(|(_, _, e)| *e).unwrap_or(0);
    (content, start, end, strategy.to_string())
}

/// Default rule-based entity extractor (§4.11 supplement): a
/// capitalized-span heuristic. Good enough to drive the pipeline and
/// its tests end to end without a model dependency; swap in a real NLP
/// extractor via the `EntityExtractor` trait for production use.
pub struct HeuristicEntityExtractor;

#[async_trait]
impl EntityExtractor for HeuristicEntityExtractor {
    async fn extract(&self, text: &str, source: &str, min_confidence: f32) -> Vec<Entity> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut spans: Vec<Vec<&str>> = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for word in &words {
            let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
            let is_capitalized = trimmed.chars().next().map(|c| c.is_uppercase()).unwrap_or(false);
            if is_capitalized && !trimmed.is_empty() {
                current.push(trimmed);
            } else if !current.is_empty() {
                spans.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            spans.push(current);
        }

        let now = Utc::now();
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::new();
        for span in spans {
            if span.is_empty() {
                continue;
            }
            let name = span.join(" ");
            // Drop single common sentence-starter capitals; a whole-name
            // span of 1+ words surviving here is still a heuristic, not
            // a guarantee, but keeps false positives down.
            if name.chars().count() < 2 {
                continue;
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            let confidence = if span.len() > 1 { 0.7 } else { 0.55 };
            if confidence < min_confidence {
                continue;
            }
            let entity_type = guess_entity_type(&name);
            out.push(Entity {
                id: deterministic_entity_id(entity_type, &name, now),
                name,
                entity_type,
                confidence,
                source: source.to_string(),
                created_at: now,
                properties: BTreeMap::new(),
                embedding: None::<NumericVector>,
            });
        }
        out
    }
}

const ORG_SUFFIXES: &[&str] = &["Inc", "Corp", "LLC", "Ltd", "Foundation", "University"];

fn guess_entity_type(name: &str) -> EntityType {
    if ORG_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        return EntityType::Organization;
    }
    if name.split_whitespace().count() == 2 {
        return EntityType::Person;
    }
    EntityType::Unknown
}

/// Deterministic in `(type, name, time_bucket)` per §4.2, using an
/// hourly bucket so repeated extraction of the same text within an
/// hour does not spuriously recreate entities, while distinct writes
/// far apart in time are free to diverge.
pub fn deterministic_entity_id(entity_type: EntityType, name: &str, at: chrono::DateTime<Utc>) -> String {
    let time_bucket = at.timestamp() / 3600;
    let mut hasher = Sha256::new();
    hasher.update(format!("{entity_type:?}").as_bytes());
    hasher.update(name.to_lowercase().as_bytes());
    hasher.update(time_bucket.to_le_bytes());
    let digest = hasher.finalize();
    format!("ent_{}", hex8(&digest))
}

/// Default rule-based claim extractor (§4.11 supplement): splits on
/// copular ("is"/"was"/"are") and common relational verbs, and emits a
/// claim per sentence containing one, linked to whichever extracted
/// entity the sentence mentions first.
pub struct HeuristicClaimExtractor;

const RELATIONAL_VERBS: &[&str] = &["is", "was", "are", "were", "works at", "founded", "located in", "created"];

#[async_trait]
impl ClaimExtractor for HeuristicClaimExtractor {
    async fn extract(&self, text: &str, chunk_id: &str, entities: &[Entity], min_confidence: f32) -> Vec<Claim> {
        let mut out = Vec::new();
        for sentence in split_sentences(text).into_iter().map(|(s, _, _)| s) {
            let lower = sentence.to_lowercase();
            let Some(verb) = RELATIONAL_VERBS.iter().find(|v| lower.contains(*v)) else {
                continue;
            };
            let subject_entity = entities.iter().find(|e| sentence.contains(&e.name));
            let confidence = if subject_entity.is_some() { 0.65 } else { 0.4 };
            if confidence < min_confidence {
                continue;
            }
            let object = verb_split_object(&sentence, verb);
            out.push(Claim {
                id: uuid::Uuid::new_v4().to_string(),
                statement: sentence.clone(),
                subject_entity_id: subject_entity.map(|e| e.id.clone()),
                predicate: verb.to_string(),
                object,
                confidence,
                supporting_chunk_id: chunk_id.to_string(),
            });
        }
        out
    }
}

fn verb_split_object(sentence: &str, verb: &str) -> Option<String> {
    let lower = sentence.to_lowercase();
    let idx = lower.find(verb)?;
    let after = &sentence[idx + verb.len()..];
    let trimmed = after.trim().trim_end_matches(['.', '!', '?']).trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Runs the full §4.2 pipeline for a single write's content.
pub async fn process(
    content: &str,
    source: &str,
    config: &ContentProcessorConfig,
    entity_extractor: &dyn EntityExtractor,
    claim_extractor: &dyn ClaimExtractor,
) -> ProcessingResult {
    let preprocessed = preprocess(content, config);
    let mut chunks = chunk_text(&preprocessed, source, config);

    let mut all_entities = Vec::new();
    let mut all_claims = Vec::new();

    for chunk in &mut chunks {
        let entities = entity_extractor.extract(&chunk.content, source, config.min_entity_confidence).await;
        let claims = claim_extractor.extract(&chunk.content, &chunk.id, &entities, config.min_claim_confidence).await;

        chunk.entities = entities.iter().map(|e| e.id.clone()).collect();
        chunk.claims = claims.iter().map(|c| c.id.clone()).collect();
        chunk.metadata.entity_count = entities.len();
        chunk.metadata.claim_count = claims.len();

        all_entities.extend(entities);
        all_claims.extend(claims);
    }

    let stats = ProcessingStats {
        chunks_created: chunks.len(),
        entities_extracted: all_entities.len(),
        claims_extracted: all_claims.len(),
        preprocessing_applied: config.enable_preprocessing,
    };

    ProcessingResult {
        chunks,
        entities: all_entities,
        claims: all_claims,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ContentProcessorConfig {
        ContentProcessorConfig::default()
    }

    #[test]
    fn preprocess_normalizes_line_endings_and_whitespace() {
        let input = "line1\r\nline2\t\tindented   spaced";
        let out = preprocess(input, &config());
        assert!(!out.contains('\r'));
        assert!(!out.contains('\t'));
        assert!(!out.contains("  "));
    }

    #[test]
    fn preprocess_collapses_excess_newlines() {
        let input = "a\n\n\n\n\nb";
        let out = preprocess(input, &config());
        assert_eq!(out, "a\n\nb");
    }

    #[test]
    fn size_chunking_breaks_at_whitespace() {
        let text = "a ".repeat(50);
        let mut cfg = config();
        cfg.max_chunk_size = 10;
        cfg.chunk_overlap = 2;
        let chunks = chunk_text(&text, "s", &cfg);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 12);
        }
    }

    #[test]
    fn sentence_chunking_splits_on_punctuation() {
        let text = "John Smith works at OpenAI. OpenAI was founded in 2015.";
        let mut cfg = config();
        cfg.chunk_strategy = ChunkStrategy::Sentence;
        let chunks = chunk_text(text, "s", &cfg);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("John Smith"));
    }

    #[tokio::test]
    async fn heuristic_extractor_finds_multi_word_capitalized_spans() {
        let extractor = HeuristicEntityExtractor;
        let entities = extractor.extract("John Smith works at OpenAI.", "s", 0.5).await;
        assert!(entities.iter().any(|e| e.name == "John Smith"));
        assert!(entities.iter().any(|e| e.name.contains("OpenAI")));
    }

    #[tokio::test]
    async fn heuristic_claim_extractor_links_subject_entity() {
        let entity_extractor = HeuristicEntityExtractor;
        let claim_extractor = HeuristicClaimExtractor;
        let text = "OpenAI was founded in 2015.";
        let entities = entity_extractor.extract(text, "s", 0.5).await;
        let claims = claim_extractor.extract(text, "chunk_1", &entities, 0.3).await;
        assert!(!claims.is_empty());
        assert!(claims[0].subject_entity_id.is_some());
    }

    #[test]
    fn entity_id_is_deterministic_within_time_bucket() {
        let now = Utc::now();
        let a = deterministic_entity_id(EntityType::Person, "John Smith", now);
        let b = deterministic_entity_id(EntityType::Person, "John Smith", now);
        assert_eq!(a, b);
    }
}
