//! Provenance tracker (§4.5): a concurrency-safe map guarded by a
//! single reader-writer lock, deterministic ids, and a SHA-256
//! integrity hash recomputed on every update.
//!
//! Grounded on `crates/memory/src/index.rs` (content hashing via
//! `sha2`) and `crates/memory/src/event_log.rs` (atomic
//! write-then-rename persistence) — adapted here to persist the whole
//! provenance map as one JSON document per record rather than a redb
//! table, per §6's "Provenance on-disk form is a JSON record keyed by
//! provenance id".

use std::collections::BTreeMap;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use memory_config::ProvenanceConfig;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::schema::{ProvenanceRecord, Transformation};

pub struct ProvenanceTracker {
    records: RwLock<BTreeMap<String, ProvenanceRecord>>,
    quarantined: RwLock<std::collections::BTreeSet<String>>,
    config: ProvenanceConfig,
    persist_path: Option<PathBuf>,
}

impl ProvenanceTracker {
    pub fn new(config: ProvenanceConfig) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            quarantined: RwLock::new(std::collections::BTreeSet::new()),
            config,
            persist_path: None,
        }
    }

    pub fn with_persistence(config: ProvenanceConfig, path: impl Into<PathBuf>) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            quarantined: RwLock::new(std::collections::BTreeSet::new()),
            config,
            persist_path: Some(path.into()),
        }
    }

    /// Loads a previously persisted provenance document, if one exists
    /// at the configured path. A missing file is not an error — the
    /// tracker simply starts empty.
    pub async fn load(&self) -> EngineResult<()> {
        let Some(path) = &self.persist_path else { return Ok(()) };
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::Other(anyhow::anyhow!("reading provenance store {}: {e}", path.display())))?;
        let loaded: BTreeMap<String, ProvenanceRecord> = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Other(anyhow::anyhow!("parsing provenance store {}: {e}", path.display())))?;
        *self.records.write().await = loaded;
        Ok(())
    }

    /// Deterministically derives a provenance id from `(memory_id,
    /// source)` via SHA-256 truncated to 8 bytes, hex-encoded with a
    /// short prefix (§4.5). `memory_id` itself already folds in the
    /// write's timestamp at one-second granularity (see
    /// `deterministic_memory_id`), so a separate timestamp component
    /// here would only reintroduce the non-determinism it exists to
    /// avoid — two `track()` calls for the same memory and source must
    /// land on the same id regardless of how many microseconds passed
    /// between them.
    pub fn derive_id(memory_id: &str, source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(memory_id.as_bytes());
        hasher.update(source.as_bytes());
        let digest = hasher.finalize();
        format!("prov_{}", digest[..8].iter().map(|b| format!("{b:02x}")).collect::<String>())
    }

    /// Opens a fresh record (version 1) for a new memory. If a record
    /// with the same deterministically-derived id already exists, it is
    /// returned unchanged — this is how S3's idempotent-same-write
    /// scenario produces the same provenance id both times.
    pub async fn track(&self, memory_id: &str, original_source: &str, created_by: &str, timestamp: chrono::DateTime<Utc>) -> ProvenanceRecord {
        let id = Self::derive_id(memory_id, original_source);

        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&id) {
            return existing.clone();
        }

        let mut record = ProvenanceRecord {
            id: id.clone(),
            memory_id: memory_id.to_string(),
            original_source: original_source.to_string(),
            created_at: timestamp,
            created_by: created_by.to_string(),
            last_modified: timestamp,
            modified_by: created_by.to_string(),
            version: 1,
            parent_versions: Vec::new(),
            transformations: Vec::new(),
            metadata: BTreeMap::new(),
            integrity_hash: String::new(),
        };
        record.integrity_hash = compute_integrity_hash(&record);
        records.insert(id, record.clone());
        record
    }

    /// Appends a transformation, advances `version`, and recomputes the
    /// integrity hash (§4.5's "Update").
    pub async fn record_transformation(&self, provenance_id: &str, transformation: Transformation, modified_by: &str) -> EngineResult<ProvenanceRecord> {
        if !self.config.track_modifications {
            return self.get(provenance_id).await;
        }

        let mut records = self.records.write().await;
        let record = records
            .get_mut(provenance_id)
            .ok_or_else(|| EngineError::not_found("provenance_record", provenance_id))?;

        let prev_version = record.version;
        record.transformations.push(transformation);
        record.version += 1;
        record.last_modified = Utc::now();
        record.modified_by = modified_by.to_string();

        if self.config.enable_versioning {
            record.parent_versions.push(format!("{provenance_id}_v{prev_version}"));
            if record.parent_versions.len() > self.config.max_version_history {
                let overflow = record.parent_versions.len() - self.config.max_version_history;
                record.parent_versions.drain(0..overflow);
            }
        }

        record.integrity_hash = compute_integrity_hash(record);
        Ok(record.clone())
    }

    /// Re-verifies the integrity hash on read; a mismatch quarantines
    /// the record (read-only, surfaced via `quarantined_ids`) and
    /// returns `IntegrityViolation` rather than the stale record.
    pub async fn get(&self, provenance_id: &str) -> EngineResult<ProvenanceRecord> {
        let records = self.records.read().await;
        let record = records
            .get(provenance_id)
            .ok_or_else(|| EngineError::not_found("provenance_record", provenance_id))?;

        if !self.config.enable_integrity_check {
            return Ok(record.clone());
        }

        let expected = compute_integrity_hash(record);
        if expected != record.integrity_hash {
            drop(records);
            self.quarantined.write().await.insert(provenance_id.to_string());
            return Err(EngineError::IntegrityViolation {
                provenance_id: provenance_id.to_string(),
            });
        }
        Ok(record.clone())
    }

    /// Returns all provenance records for a given memory id, across
    /// versions, excluding any that are currently quarantined (§4.5
    /// lineage / S6).
    pub async fn get_memory_lineage(&self, memory_id: &str) -> Vec<ProvenanceRecord> {
        let records = self.records.read().await;
        let quarantined = self.quarantined.read().await;
        records
            .values()
            .filter(|r| r.memory_id == memory_id && !quarantined.contains(&r.id))
            .cloned()
            .collect()
    }

    pub async fn quarantined_count(&self) -> usize {
        self.quarantined.read().await.len()
    }

    /// `memory_manage{operation: "pin"}`: marks every non-quarantined
    /// provenance record for `memory_id` as pinned (exempt from
    /// `forget`/`decay`), recomputing the integrity hash. Returns the
    /// number of records touched.
    pub async fn pin(&self, memory_id: &str) -> usize {
        let quarantined = self.quarantined.read().await.clone();
        let mut records = self.records.write().await;
        let mut touched = 0;
        for record in records.values_mut() {
            if record.memory_id != memory_id || quarantined.contains(&record.id) {
                continue;
            }
            record.metadata.insert("pinned".to_string(), crate::schema::MetadataValue::Bool(true));
            record.last_modified = Utc::now();
            record.integrity_hash = compute_integrity_hash(record);
            touched += 1;
        }
        touched
    }

    /// `memory_manage{operation: "forget"}`: removes every
    /// non-pinned, non-quarantined provenance record for `memory_id`.
    /// Pinned records are left untouched — forgetting a pinned memory
    /// is a no-op for that record, not an error. Returns the number of
    /// records removed.
    pub async fn forget(&self, memory_id: &str) -> usize {
        let mut records = self.records.write().await;
        let to_remove: Vec<String> = records
            .values()
            .filter(|r| r.memory_id == memory_id && !is_pinned(r))
            .map(|r| r.id.clone())
            .collect();
        for id in &to_remove {
            records.remove(id);
        }
        to_remove.len()
    }

    /// `memory_manage{operation: "decay"}`: applies `confidence` as the
    /// new decayed confidence (or halves any existing value, defaulting
    /// to 0.5, when no explicit target is given) on every non-pinned,
    /// non-quarantined provenance record for `memory_id`. Returns the
    /// number of records touched.
    pub async fn decay(&self, memory_id: &str, confidence: Option<f32>) -> usize {
        let quarantined = self.quarantined.read().await.clone();
        let mut records = self.records.write().await;
        let mut touched = 0;
        for record in records.values_mut() {
            if record.memory_id != memory_id || quarantined.contains(&record.id) || is_pinned(record) {
                continue;
            }
            let next = match confidence {
                Some(target) => target.clamp(0.0, 1.0),
                None => {
                    let current = match record.metadata.get("confidence") {
                        Some(crate::schema::MetadataValue::Number(n)) => *n as f32,
                        _ => 1.0,
                    };
                    (current * 0.5).clamp(0.0, 1.0)
                }
            };
            record.metadata.insert("confidence".to_string(), crate::schema::MetadataValue::Number(next as f64));
            record.last_modified = Utc::now();
            record.integrity_hash = compute_integrity_hash(record);
            touched += 1;
        }
        touched
    }

    /// Directly installs a record without going through `track`/
    /// `record_transformation` — used by tests exercising S6's
    /// invalid-hash-injection scenario, and by `load`.
    pub async fn insert_raw(&self, record: ProvenanceRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    /// Persists the whole provenance map as a single JSON document,
    /// atomically: write to a sibling `.tmp` file, fsync, then rename
    /// over the destination (grounded on `event_log.rs`'s persistence
    /// idiom).
    pub async fn persist(&self) -> EngineResult<()> {
        let Some(path) = &self.persist_path else { return Ok(()) };
        let records = self.records.read().await;
        let rendered = serde_json::to_string_pretty(&*records)
            .map_err(|e| EngineError::Other(anyhow::anyhow!("serializing provenance store: {e}")))?;
        drop(records);
        atomic_write(path, &rendered).await
    }
}

fn is_pinned(record: &ProvenanceRecord) -> bool {
    matches!(record.metadata.get("pinned"), Some(crate::schema::MetadataValue::Bool(true)))
}

async fn atomic_write(path: &Path, contents: &str) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::Other(anyhow::anyhow!("creating provenance directory: {e}")))?;
    }
    let tmp_path = path.with_extension("tmp");
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(&tmp_path)
        .await
        .map_err(|e| EngineError::Other(anyhow::anyhow!("opening {}: {e}", tmp_path.display())))?;
    use tokio::io::AsyncWriteExt;
    file.write_all(contents.as_bytes())
        .await
        .map_err(|e| EngineError::Other(anyhow::anyhow!("writing {}: {e}", tmp_path.display())))?;
    file.sync_all().await.map_err(|e| EngineError::Other(anyhow::anyhow!("fsync {}: {e}", tmp_path.display())))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| EngineError::Other(anyhow::anyhow!("renaming {} -> {}: {e}", tmp_path.display(), path.display())))?;
    Ok(())
}

/// SHA-256 over the canonical (sorted-keys) serialization of the
/// record with `integrity_hash` zeroed (§4.5, §6, invariant I3/P4).
/// `serde_json::Value`'s `Object` is a `BTreeMap` internally via
/// `preserve_order` being off, so `to_string` already emits sorted
/// keys.
pub fn compute_integrity_hash(record: &ProvenanceRecord) -> String {
    let mut zeroed = record.clone();
    zeroed.integrity_hash = String::new();
    let value: Value = serde_json::to_value(&zeroed).expect("ProvenanceRecord always serializes");
    let canonical = canonicalize(&value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Recursively renders a `Value` with object keys sorted, independent
/// of whatever key order `serde_json` happened to preserve.
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(k, _)| k.as_str());
            let body = entries
                .iter()
                .map(|(k, v)| format!("{k:?}:{}", canonicalize(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items.iter().map(canonicalize).collect::<Vec<_>>().join(",");
            format!("[{body}]")
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TransformationType;

    #[tokio::test]
    async fn track_is_idempotent_for_same_memory_and_source() {
        let id1 = ProvenanceTracker::derive_id("mem1", "profile.txt");
        let id2 = ProvenanceTracker::derive_id("mem1", "profile.txt");
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn record_transformation_bumps_version_and_hash() {
        let tracker = ProvenanceTracker::new(ProvenanceConfig::default());
        let record = tracker.track("mem1", "profile.txt", "writer", Utc::now()).await;
        let transformation = Transformation {
            id: "t1".to_string(),
            transformation_type: TransformationType::Chunking,
            description: "chunked".to_string(),
            timestamp: Utc::now(),
            agent: "writer".to_string(),
            parameters: BTreeMap::new(),
            input_hash: "a".to_string(),
            output_hash: "b".to_string(),
        };
        let updated = tracker.record_transformation(&record.id, transformation, "writer").await.unwrap();
        assert_eq!(updated.version, 2);
        assert_ne!(updated.integrity_hash, record.integrity_hash);
    }

    #[tokio::test]
    async fn get_detects_tampered_hash() {
        let tracker = ProvenanceTracker::new(ProvenanceConfig::default());
        let mut record = tracker.track("mem1", "profile.txt", "writer", Utc::now()).await;
        record.integrity_hash = "deadbeef".to_string();
        tracker.insert_raw(record.clone()).await;

        let result = tracker.get(&record.id).await;
        assert!(matches!(result, Err(EngineError::IntegrityViolation { .. })));
        assert_eq!(tracker.quarantined_count().await, 1);
    }

    #[tokio::test]
    async fn lineage_excludes_quarantined_records() {
        let tracker = ProvenanceTracker::new(ProvenanceConfig::default());
        let mut record = tracker.track("mem1", "profile.txt", "writer", Utc::now()).await;
        record.integrity_hash = "deadbeef".to_string();
        tracker.insert_raw(record.clone()).await;
        let _ = tracker.get(&record.id).await;

        let lineage = tracker.get_memory_lineage("mem1").await;
        assert!(lineage.is_empty());
    }

    #[tokio::test]
    async fn pin_then_forget_leaves_pinned_record_in_place() {
        let tracker = ProvenanceTracker::new(ProvenanceConfig::default());
        let record = tracker.track("mem1", "profile.txt", "writer", Utc::now()).await;
        assert_eq!(tracker.pin("mem1").await, 1);
        assert_eq!(tracker.forget("mem1").await, 0);
        assert!(tracker.get(&record.id).await.is_ok());
    }

    #[tokio::test]
    async fn forget_without_pin_removes_the_record() {
        let tracker = ProvenanceTracker::new(ProvenanceConfig::default());
        let record = tracker.track("mem1", "profile.txt", "writer", Utc::now()).await;
        assert_eq!(tracker.forget("mem1").await, 1);
        assert!(tracker.get(&record.id).await.is_err());
    }

    #[tokio::test]
    async fn decay_halves_confidence_by_default() {
        let tracker = ProvenanceTracker::new(ProvenanceConfig::default());
        tracker.track("mem1", "profile.txt", "writer", Utc::now()).await;
        assert_eq!(tracker.decay("mem1", None).await, 1);
        assert_eq!(tracker.decay("mem1", None).await, 1);
    }

    #[test]
    fn integrity_hash_is_stable_for_same_record() {
        let record = ProvenanceRecord {
            id: "prov_1".to_string(),
            memory_id: "mem1".to_string(),
            original_source: "s".to_string(),
            created_at: Utc::now(),
            created_by: "writer".to_string(),
            last_modified: Utc::now(),
            modified_by: "writer".to_string(),
            version: 1,
            parent_versions: Vec::new(),
            transformations: Vec::new(),
            metadata: BTreeMap::new(),
            integrity_hash: String::new(),
        };
        let h1 = compute_integrity_hash(&record);
        let h2 = compute_integrity_hash(&record);
        assert_eq!(h1, h2);
    }
}
