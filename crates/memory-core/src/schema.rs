//! Core data model (§3): `Chunk`, `Entity`, `Claim`, graph `Node`/`Edge`,
//! `ProvenanceRecord`/`Transformation`, and the read-side `Evidence`
//! record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A closed tagged variant standing in for heterogeneous JSON-like
/// metadata values (§9 design note). Unknown scalar shapes are not
/// representable — callers must coerce into one of these before
/// storage, which is what keeps downstream validation (§4.10, §6)
/// total rather than partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    String(String),
    Number(f64),
    Bool(bool),
    Array(Vec<MetadataValue>),
    Object(BTreeMap<String, MetadataValue>),
    Null,
}

impl MetadataValue {
    /// Render for display/validation purposes. Used by the §6 metadata
    /// value-length validator so it never has to match on variants.
    pub fn to_display_string(&self) -> String {
        match self {
            MetadataValue::String(s) => s.clone(),
            MetadataValue::Number(n) => n.to_string(),
            MetadataValue::Bool(b) => b.to_string(),
            MetadataValue::Null => String::new(),
            MetadataValue::Array(items) => items
                .iter()
                .map(|v| v.to_display_string())
                .collect::<Vec<_>>()
                .join(","),
            MetadataValue::Object(map) => map
                .iter()
                .map(|(k, v)| format!("{k}={}", v.to_display_string()))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.to_display_string().len()
    }

    /// Best-effort coercion from a `serde_json::Value`, used at the
    /// validation boundary (§6) where metadata arrives as arbitrary
    /// JSON.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => MetadataValue::String(s.clone()),
            serde_json::Value::Number(n) => MetadataValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::Bool(b) => MetadataValue::Bool(*b),
            serde_json::Value::Null => MetadataValue::Null,
            serde_json::Value::Array(items) => {
                MetadataValue::Array(items.iter().map(MetadataValue::from_json).collect())
            }
            serde_json::Value::Object(map) => MetadataValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), MetadataValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Canonical embedding representation. §9 requires coercion from any of
/// `[]f32`, `[]f64`, or a generic numeric JSON array into this shape
/// before any similarity computation runs, so dimension mismatches are
/// caught once, here, rather than scattered across call sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericVector(pub Vec<f32>);

impl NumericVector {
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Coerce a `serde_json::Value` into a `NumericVector`. Returns
    /// `None` if the value is not an array of numbers — callers treat
    /// that as "no embedding available", never as a zero vector.
    pub fn coerce(value: &serde_json::Value) -> Option<Self> {
        let arr = value.as_array()?;
        let mut out = Vec::with_capacity(arr.len());
        for item in arr {
            out.push(item.as_f64()? as f32);
        }
        Some(NumericVector(out))
    }

    /// Cosine similarity, clamped to `[-1, 1]`. Returns `None` on
    /// dimension mismatch or a zero-magnitude vector — callers must
    /// skip the candidate rather than treat the result as `0.0`
    /// similarity (§4.1 "must tolerate mismatched-dimension
    /// candidates").
    pub fn cosine_similarity(&self, other: &NumericVector) -> Option<f32> {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return None;
        }
        let dot: f32 = self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum();
        let mag_a: f32 = self.0.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mag_b: f32 = other.0.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag_a == 0.0 || mag_b == 0.0 {
            return None;
        }
        Some((dot / (mag_a * mag_b)).clamp(-1.0, 1.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub strategy: String,
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub entity_count: usize,
    pub claim_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub source: String,
    pub entities: Vec<String>,
    pub claims: Vec<String>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Technology,
    Location,
    Event,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub confidence: f32,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub properties: BTreeMap<String, MetadataValue>,
    pub embedding: Option<NumericVector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub statement: String,
    pub subject_entity_id: Option<String>,
    pub predicate: String,
    pub object: Option<String>,
    pub confidence: f32,
    pub supporting_chunk_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Entity,
    Claim,
    Event,
    Task,
    ConversationTurn,
    Source,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub properties: BTreeMap<String, MetadataValue>,
    pub embedding: Option<NumericVector>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    RelatedTo,
    PartOf,
    Supports,
    Refutes,
    TemporalNext,
    CausedBy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub weight: f32,
    pub properties: BTreeMap<String, MetadataValue>,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    /// Deterministic id for an edge representing an undirected relation
    /// between two nodes, so re-insertion is idempotent (§3 invariant
    /// on edge ids). Directed edges that are inherently asymmetric
    /// (e.g. `CAUSED_BY`) should use `Edge::directed_id` instead.
    pub fn undirected_id(a: &str, b: &str, edge_type: EdgeType) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        format!("edge_{lo}_{hi}_{edge_type:?}")
    }

    pub fn directed_id(from: &str, to: &str, edge_type: EdgeType) -> String {
        format!("edge_{from}_{to}_{edge_type:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationType {
    Chunking,
    Embedding,
    EntityExtraction,
    ClaimExtraction,
    EntityResolution,
    Merge,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transformation {
    pub id: String,
    #[serde(rename = "type")]
    pub transformation_type: TransformationType,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub parameters: BTreeMap<String, MetadataValue>,
    pub input_hash: String,
    pub output_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: String,
    pub memory_id: String,
    pub original_source: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_modified: DateTime<Utc>,
    pub modified_by: String,
    pub version: u32,
    pub parent_versions: Vec<String>,
    pub transformations: Vec<Transformation>,
    pub metadata: BTreeMap<String, MetadataValue>,
    /// SHA-256 hex digest over the canonical serialization of this
    /// record with this field zeroed (empty string). See
    /// `provenance::compute_integrity_hash`.
    pub integrity_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceInfo {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub content: String,
    pub source: String,
    pub confidence: f32,
    pub why_selected: String,
    pub relation_map: BTreeMap<String, String>,
    pub provenance: ProvenanceInfo,
    pub graph_path: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_vector_coerces_from_f64_array() {
        let value = serde_json::json!([0.1, 0.2, 0.3]);
        let vec = NumericVector::coerce(&value).unwrap();
        assert_eq!(vec.dim(), 3);
    }

    #[test]
    fn numeric_vector_rejects_non_array() {
        let value = serde_json::json!("not a vector");
        assert!(NumericVector::coerce(&value).is_none());
    }

    #[test]
    fn cosine_similarity_dimension_mismatch_is_none_not_zero() {
        let a = NumericVector(vec![1.0, 0.0]);
        let b = NumericVector(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.cosine_similarity(&b), None);
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let a = NumericVector(vec![1.0, 2.0, 3.0]);
        let sim = a.cosine_similarity(&a).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn undirected_edge_id_is_order_independent() {
        let a = Edge::undirected_id("n1", "n2", EdgeType::RelatedTo);
        let b = Edge::undirected_id("n2", "n1", EdgeType::RelatedTo);
        assert_eq!(a, b);
    }

    #[test]
    fn metadata_value_display_for_object() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), MetadataValue::Number(1.0));
        let value = MetadataValue::Object(map);
        assert_eq!(value.to_display_string(), "a=1");
    }
}
