//! Batch upload: partitions embedded records into bounded upsert calls with a
//! resumable progress marker.
//!
//! The index client retries transient failures, and a [`Checkpoint`] records
//! how many contiguous batches have landed, so a rerun with `--resume` picks
//! up where the last run stopped instead of re-uploading everything. Upserts
//! are idempotent by id, so replaying a partially completed batch is safe.

use std::fs;
use std::ops::Range;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::embedder::EmbeddedRecord;
use crate::index::{UpsertVector, VectorIndex};

/// Records per upsert call unless overridden.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Contiguous index ranges of at most `batch_size`, in order. Concatenating
/// the ranges reconstructs `0..total` exactly.
pub fn batch_ranges(total: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    let mut ranges = Vec::with_capacity(total.div_ceil(batch_size));
    let mut start = 0;
    while start < total {
        let end = (start + batch_size).min(total);
        ranges.push(start..end);
        start = end;
    }
    ranges
}

/// Converts an embedded record into the index wire shape.
///
/// The record must carry a string `id`; metadata defaults to an empty mapping
/// when absent or not an object.
pub fn build_vector(record: &EmbeddedRecord) -> Result<UpsertVector> {
    let id = record
        .record
        .value
        .get("id")
        .and_then(Value::as_str)
        .with_context(|| {
            format!(
                "record is missing a string id: {}",
                truncated_preview(&record.record.value)
            )
        })?
        .to_string();
    let metadata = match record.record.value.get("metadata") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    Ok(UpsertVector {
        id,
        values: record.embedding.clone(),
        metadata,
    })
}

fn truncated_preview(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.len() <= 120 {
        return rendered;
    }
    let mut cut = 120;
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &rendered[..cut])
}

/// Durable marker for how many contiguous batches have been uploaded.
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    state: CheckpointState,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CheckpointState {
    uploaded_batches: usize,
    batch_size: usize,
}

impl Checkpoint {
    /// Opens (or initializes) the checkpoint at `path` for a run using
    /// `batch_size`. A stored marker with a different batch size no longer
    /// describes the same partitioning and is discarded.
    pub fn open(path: PathBuf, batch_size: usize, resume: bool) -> Self {
        let stored = if resume {
            fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<CheckpointState>(&raw).ok())
                .filter(|state| state.batch_size == batch_size)
        } else {
            None
        };
        let state = stored.unwrap_or(CheckpointState {
            uploaded_batches: 0,
            batch_size,
        });
        Self { path, state }
    }

    /// Number of batches already uploaded by a prior run.
    pub fn uploaded_batches(&self) -> usize {
        self.state.uploaded_batches
    }

    /// Records that every batch below `count` has been uploaded.
    pub fn advance_to(&mut self, count: usize) -> Result<()> {
        if count <= self.state.uploaded_batches {
            return Ok(());
        }
        self.state.uploaded_batches = count;
        let raw = serde_json::to_string(&self.state)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("failed to write checkpoint {}", self.path.display()))?;
        Ok(())
    }

    /// Removes the marker after a fully successful run.
    pub fn clear(self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Sequentially upserts every batch, advancing the checkpoint after each
/// success. Returns the number of vectors sent by this run.
pub fn upload_all(
    index: &dyn VectorIndex,
    vectors: &[UpsertVector],
    batch_size: usize,
    checkpoint: &mut Checkpoint,
) -> Result<usize> {
    let ranges = batch_ranges(vectors.len(), batch_size);
    let total_batches = ranges.len();
    let already_done = checkpoint.uploaded_batches().min(total_batches);
    if already_done > 0 {
        eprintln!(
            "resuming after {} previously uploaded batch(es)",
            already_done
        );
    }
    let mut sent = 0usize;
    for (batch_no, range) in ranges.into_iter().enumerate().skip(already_done) {
        let batch = &vectors[range];
        index
            .upsert(batch)
            .with_context(|| format!("upsert failed for batch {}/{}", batch_no + 1, total_batches))?;
        sent += batch.len();
        checkpoint.advance_to(batch_no + 1)?;
        eprintln!("uploaded batch {}/{} ({} vectors)", batch_no + 1, total_batches, batch.len());
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ValidRecord;
    use serde_json::json;
    use std::cell::RefCell;

    fn embedded(id: &str, text: &str) -> EmbeddedRecord {
        EmbeddedRecord {
            record: ValidRecord {
                value: json!({"id": id, "text": text, "metadata": {"type": "specs"}}),
                text: text.to_string(),
            },
            embedding: vec![0.1, 0.2],
        }
    }

    struct RecordingIndex {
        batches: RefCell<Vec<Vec<UpsertVector>>>,
        fail_on_batch: Option<usize>,
    }

    impl RecordingIndex {
        fn new() -> Self {
            Self {
                batches: RefCell::new(Vec::new()),
                fail_on_batch: None,
            }
        }
    }

    impl VectorIndex for RecordingIndex {
        fn upsert(&self, vectors: &[UpsertVector]) -> Result<usize> {
            let call_no = self.batches.borrow().len();
            if self.fail_on_batch == Some(call_no) {
                anyhow::bail!("simulated index outage");
            }
            self.batches.borrow_mut().push(vectors.to_vec());
            Ok(vectors.len())
        }
    }

    fn temp_checkpoint(batch_size: usize, resume: bool) -> Checkpoint {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "specxref-ckpt-{}-{}.json",
            std::process::id(),
            nanos
        ));
        Checkpoint::open(path, batch_size, resume)
    }

    #[test]
    fn ranges_cover_input_exactly() {
        let ranges = batch_ranges(10, 3);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges.last().unwrap().len(), 1);
        let rebuilt: Vec<usize> = ranges.into_iter().flatten().collect();
        assert_eq!(rebuilt, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn exact_multiple_fills_last_batch() {
        let ranges = batch_ranges(200, 100);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1], 100..200);
    }

    #[test]
    fn empty_input_yields_no_batches() {
        assert!(batch_ranges(0, 100).is_empty());
    }

    #[test]
    fn builds_vector_with_metadata_passthrough() {
        let vector = build_vector(&embedded("specs_0", "hello")).unwrap();
        assert_eq!(vector.id, "specs_0");
        assert_eq!(vector.values, vec![0.1, 0.2]);
        assert_eq!(vector.metadata.get("type"), Some(&json!("specs")));
    }

    #[test]
    fn missing_metadata_defaults_to_empty() {
        let record = EmbeddedRecord {
            record: ValidRecord {
                value: json!({"id": "a_1", "text": "x"}),
                text: "x".into(),
            },
            embedding: vec![1.0],
        };
        let vector = build_vector(&record).unwrap();
        assert!(vector.metadata.is_empty());
    }

    #[test]
    fn missing_id_is_an_error() {
        let record = EmbeddedRecord {
            record: ValidRecord {
                value: json!({"text": "x"}),
                text: "x".into(),
            },
            embedding: vec![1.0],
        };
        assert!(build_vector(&record).is_err());
    }

    #[test]
    fn single_valid_record_uploads_in_one_batch() {
        let records = vec![embedded("a_0", "hello")];
        let vectors: Vec<UpsertVector> = records.iter().map(|r| build_vector(r).unwrap()).collect();
        let index = RecordingIndex::new();
        let mut checkpoint = temp_checkpoint(100, false);
        let sent = upload_all(&index, &vectors, 100, &mut checkpoint).unwrap();
        assert_eq!(sent, 1);
        assert_eq!(index.batches.borrow().len(), 1);
        checkpoint.clear();
    }

    #[test]
    fn concatenated_batches_reconstruct_input() {
        let vectors: Vec<UpsertVector> = (0..7)
            .map(|i| build_vector(&embedded(&format!("a_{i}"), "text")).unwrap())
            .collect();
        let index = RecordingIndex::new();
        let mut checkpoint = temp_checkpoint(3, false);
        upload_all(&index, &vectors, 3, &mut checkpoint).unwrap();
        let calls = index.batches.borrow();
        assert_eq!(calls.len(), 3);
        let rebuilt: Vec<UpsertVector> = calls.iter().flatten().cloned().collect();
        assert_eq!(rebuilt, vectors);
        checkpoint.clear();
    }

    #[test]
    fn resume_skips_recorded_batches() {
        let vectors: Vec<UpsertVector> = (0..5)
            .map(|i| build_vector(&embedded(&format!("a_{i}"), "text")).unwrap())
            .collect();

        let mut failing = RecordingIndex::new();
        failing.fail_on_batch = Some(1);
        let mut checkpoint = temp_checkpoint(2, false);
        let path = checkpoint.path.clone();
        assert!(upload_all(&failing, &vectors, 2, &mut checkpoint).is_err());
        assert_eq!(checkpoint.uploaded_batches(), 1);
        drop(checkpoint);

        let index = RecordingIndex::new();
        let mut resumed = Checkpoint::open(path, 2, true);
        assert_eq!(resumed.uploaded_batches(), 1);
        let sent = upload_all(&index, &vectors, 2, &mut resumed).unwrap();
        assert_eq!(sent, 3);
        assert_eq!(index.batches.borrow().len(), 2);
        assert_eq!(index.batches.borrow()[0][0].id, "a_2");
        resumed.clear();
    }

    #[test]
    fn batch_size_change_invalidates_checkpoint() {
        let mut checkpoint = temp_checkpoint(2, false);
        let path = checkpoint.path.clone();
        checkpoint.advance_to(3).unwrap();
        drop(checkpoint);
        let reopened = Checkpoint::open(path.clone(), 5, true);
        assert_eq!(reopened.uploaded_batches(), 0);
        reopened.clear();
        let _ = std::fs::remove_file(path);
    }
}
