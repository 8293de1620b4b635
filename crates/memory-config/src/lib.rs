//! Configuration schema for the memory engine.
//!
//! A single JSON document, loaded once at process start and treated as
//! immutable afterwards (§9 "global state" design note). Every
//! sub-config rejects unknown fields so a typo in a config file fails
//! fast instead of silently being ignored.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    #[default]
    Size,
    Sentence,
    Paragraph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Basic,
    #[default]
    Detailed,
    Verbose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ContentProcessorConfig {
    pub max_chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunk_strategy: ChunkStrategy,
    pub min_entity_confidence: f32,
    pub min_claim_confidence: f32,
    pub enable_preprocessing: bool,
}

impl Default for ContentProcessorConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            chunk_overlap: 100,
            chunk_strategy: ChunkStrategy::Size,
            min_entity_confidence: 0.5,
            min_claim_confidence: 0.5,
            enable_preprocessing: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EntityResolverConfig {
    pub similarity_threshold: f32,
    pub merge_threshold: f32,
    pub max_candidates: usize,
    pub vector_weight: f32,
    pub name_weight: f32,
    pub type_weight: f32,
}

impl Default for EntityResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
            merge_threshold: 0.92,
            max_candidates: 20,
            vector_weight: 0.5,
            name_weight: 0.35,
            type_weight: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProvenanceConfig {
    pub enable_versioning: bool,
    pub max_version_history: usize,
    pub track_modifications: bool,
    pub enable_integrity_check: bool,
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            enable_versioning: true,
            max_version_history: 20,
            track_modifications: true,
            enable_integrity_check: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QueryProcessorConfig {
    pub max_expansions: usize,
    pub enable_expansion: bool,
    pub stop_words: Vec<String>,
}

impl Default for QueryProcessorConfig {
    fn default() -> Self {
        Self {
            max_expansions: 3,
            enable_expansion: true,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

const DEFAULT_STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "in", "on", "for", "is", "are", "was", "were",
    "be", "been", "with", "that", "this", "it", "at", "by", "as", "from",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetrievalConfig {
    pub max_candidates: usize,
    pub max_depth: usize,
    pub vector_timeout_ms: u64,
    pub graph_timeout_ms: u64,
    pub search_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_candidates: 50,
            max_depth: 2,
            vector_timeout_ms: 2000,
            graph_timeout_ms: 2000,
            search_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FusionConfig {
    pub rrf_constant: f32,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub graph_weight: f32,
    pub min_score: f32,
    pub max_results: usize,
    pub normalize_scores: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_constant: 60.0,
            vector_weight: 1.0,
            keyword_weight: 1.0,
            graph_weight: 1.0,
            min_score: 0.0,
            max_results: 50,
            normalize_scores: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RankerConfig {
    pub relevance_weight: f32,
    pub freshness_weight: f32,
    pub authority_weight: f32,
    pub quality_weight: f32,
    pub half_life_days: f32,
    pub high_score_boost: f32,
    pub quality_penalty: f32,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            relevance_weight: 0.4,
            freshness_weight: 0.2,
            authority_weight: 0.2,
            quality_weight: 0.2,
            half_life_days: 30.0,
            high_score_boost: 0.05,
            quality_penalty: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AssemblyConfig {
    pub min_confidence: f32,
    pub max_evidence_items: usize,
    pub max_content_length: usize,
    pub similarity_threshold: f32,
    pub verbosity: Verbosity,
    pub conflict_top_k: usize,
    pub enable_self_critique: bool,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            max_evidence_items: 20,
            max_content_length: 500,
            similarity_threshold: 0.85,
            verbosity: Verbosity::Detailed,
            conflict_top_k: 100,
            enable_self_critique: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ValidationConfig {
    pub max_content_len: usize,
    pub max_source_len: usize,
    pub max_tags: usize,
    pub max_tag_len: usize,
    pub max_metadata_keys: usize,
    pub max_metadata_value_len: usize,
    pub blocked_patterns: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_content_len: 10_000,
            max_source_len: 200,
            max_tags: 10,
            max_tag_len: 50,
            max_metadata_keys: 20,
            max_metadata_value_len: 500,
            blocked_patterns: DEFAULT_BLOCKED_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    r"(?i)<script\b",
    r"(?i)\bjavascript:",
    r"(?i)\bdata:(text|image|application)/",
    r"(?i)\bvbscript:",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MemoryEngineConfig {
    pub content: ContentProcessorConfig,
    pub resolver: EntityResolverConfig,
    pub provenance: ProvenanceConfig,
    pub query: QueryProcessorConfig,
    pub retrieval: RetrievalConfig,
    pub fusion: FusionConfig,
    pub ranking: RankerConfig,
    pub assembly: AssemblyConfig,
    pub validation: ValidationConfig,
    pub write_timeout_ms: u64,
    pub read_time_budget_ms: u64,
    pub max_read_time_budget_ms: u64,
}

impl Default for MemoryEngineConfig {
    fn default() -> Self {
        Self {
            content: ContentProcessorConfig::default(),
            resolver: EntityResolverConfig::default(),
            provenance: ProvenanceConfig::default(),
            query: QueryProcessorConfig::default(),
            retrieval: RetrievalConfig::default(),
            fusion: FusionConfig::default(),
            ranking: RankerConfig::default(),
            assembly: AssemblyConfig::default(),
            validation: ValidationConfig::default(),
            write_timeout_ms: 30_000,
            read_time_budget_ms: 5_000,
            max_read_time_budget_ms: 30_000,
        }
    }
}

impl MemoryEngineConfig {
    /// Load from a JSON file, falling back to defaults if it does not
    /// exist. Unknown fields in an existing file are a hard parse
    /// error — construction-time only, matching `ConfigError`'s place
    /// in the error taxonomy (§7).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = serde_json::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}
