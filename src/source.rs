//! Source loading and shape normalization for heterogeneous chunk JSON.
//!
//! Inputs arrive in one of two shapes: a flat array of already-normalized
//! records, or a docling-style document whose `texts` array must be flattened
//! into `{id, text, metadata}` chunks. The shape is resolved once per source;
//! sources matching neither shape are dropped with a diagnostic.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Input files consulted when the ingest binary is run without `--input`.
pub const DEFAULT_SOURCE_FILES: &[&str] = &[
    "xref_full.json",
    "construction_drawings.json",
    "specifications.json",
];

/// A source document resolved to one of the two recognized shapes.
#[derive(Debug)]
pub enum SourceShape {
    /// Flat array of records; each element passes through unchanged.
    Flat(Vec<Value>),
    /// Docling-style document carrying a `texts` array to flatten.
    Docling(DoclingDocument),
}

impl SourceShape {
    /// Resolves the shape of a parsed JSON value, or `None` when it matches
    /// neither recognized layout.
    pub fn detect(value: Value) -> Option<Self> {
        match value {
            Value::Array(records) => Some(Self::Flat(records)),
            Value::Object(fields) => {
                if !fields.get("texts").is_some_and(Value::is_array) {
                    return None;
                }
                let doc = DoclingDocument::deserialize(Value::Object(fields)).ok()?;
                Some(Self::Docling(doc))
            }
            _ => None,
        }
    }
}

/// Docling export document; only the fields the pipeline reads are modeled.
#[derive(Debug, Deserialize)]
pub struct DoclingDocument {
    /// Extracted text entries in document order.
    pub texts: Vec<DoclingText>,
}

/// One extracted text entry from a docling document.
#[derive(Debug, Deserialize)]
pub struct DoclingText {
    /// Body text; may be absent or blank for structural entries.
    #[serde(default)]
    pub text: Option<String>,
    /// Docling layout label (e.g. `paragraph`, `section_header`).
    #[serde(default)]
    pub label: Option<String>,
    /// Provenance entries; only the first page number is retained.
    #[serde(default)]
    pub prov: Vec<Provenance>,
}

/// Source-location metadata attached to an extracted entry.
#[derive(Debug, Deserialize)]
pub struct Provenance {
    /// 1-based page number within the source document.
    #[serde(default)]
    pub page_no: Option<u64>,
}

/// Chunks plus skipped raw entries produced by flattening one document.
#[derive(Debug, Default)]
pub struct FlattenOutcome {
    /// Normalized `{id, text, metadata}` chunks, in entry order.
    pub chunks: Vec<Value>,
    /// Entries with missing or blank text, preserved verbatim for audit.
    pub skipped: Vec<Value>,
}

/// Flattens a docling document into normalized chunks tagged with `tag`.
///
/// Chunk ids follow `"<tag>_<n>"` where `n` counts chunks produced so far for
/// this source, so ids are unique and strictly increasing within the tag.
/// Entries without usable text are returned as skipped, under the same
/// non-empty-after-trim rule the validity filter applies to flat records.
pub fn flatten_docling(doc: &DoclingDocument, tag: &str) -> FlattenOutcome {
    let mut outcome = FlattenOutcome::default();
    for entry in &doc.texts {
        let text = entry.text.as_deref().unwrap_or("");
        if text.trim().is_empty() {
            outcome.skipped.push(raw_entry(entry));
            continue;
        }
        let page = entry.prov.first().and_then(|prov| prov.page_no);
        outcome.chunks.push(json!({
            "id": format!("{}_{}", tag, outcome.chunks.len()),
            "text": text,
            "metadata": {
                "type": tag,
                "label": entry.label.as_deref(),
                "page": page,
            },
        }));
    }
    outcome
}

fn raw_entry(entry: &DoclingText) -> Value {
    let mut fields = Map::new();
    if let Some(text) = &entry.text {
        fields.insert("text".into(), Value::String(text.clone()));
    }
    if let Some(label) = &entry.label {
        fields.insert("label".into(), Value::String(label.clone()));
    }
    if !entry.prov.is_empty() {
        let prov: Vec<Value> = entry
            .prov
            .iter()
            .map(|p| json!({ "page_no": p.page_no }))
            .collect();
        fields.insert("prov".into(), Value::Array(prov));
    }
    Value::Object(fields)
}

/// Non-fatal problems encountered while loading a source file.
#[derive(Debug)]
pub enum SourceIssue {
    /// The file does not exist on disk.
    Missing(PathBuf),
    /// The file exists but could not be read or parsed as JSON.
    Unreadable {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O or parse failure.
        reason: String,
    },
    /// The JSON parsed but matched neither recognized shape.
    UnrecognizedShape(PathBuf),
}

impl fmt::Display for SourceIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(path) => write!(f, "file not found: {}", path.display()),
            Self::Unreadable { path, reason } => {
                write!(f, "failed to read {}: {}", path.display(), reason)
            }
            Self::UnrecognizedShape(path) => {
                write!(f, "unrecognized format in {}", path.display())
            }
        }
    }
}

/// Combined stream built from every readable source, plus diagnostics.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// All records from every source, in discovery order.
    pub combined: Vec<Value>,
    /// Docling entries dropped during flattening, preserved verbatim.
    pub skipped: Vec<Value>,
    /// Per-source problems; the sources involved contributed no records.
    pub issues: Vec<SourceIssue>,
}

/// Loads every source in `paths`, resolving shapes and flattening docling
/// documents into the combined stream. Failures are recorded as issues and
/// the remaining sources still load.
pub fn load_sources(paths: &[PathBuf]) -> LoadReport {
    let mut report = LoadReport::default();
    let mut used_tags: HashMap<String, usize> = HashMap::new();
    for path in paths {
        if !path.exists() {
            eprintln!("warning: file not found: {}", path.display());
            report.issues.push(SourceIssue::Missing(path.clone()));
            continue;
        }
        let value = match read_json(path) {
            Ok(value) => value,
            Err(reason) => {
                eprintln!("warning: failed to read {}: {}", path.display(), reason);
                report.issues.push(SourceIssue::Unreadable {
                    path: path.clone(),
                    reason,
                });
                continue;
            }
        };
        match SourceShape::detect(value) {
            Some(SourceShape::Flat(records)) => {
                eprintln!(
                    "loaded {} flat records from {}",
                    records.len(),
                    path.display()
                );
                report.combined.extend(records);
            }
            Some(SourceShape::Docling(doc)) => {
                let tag = unique_tag(&mut used_tags, &file_tag(path));
                let outcome = flatten_docling(&doc, &tag);
                eprintln!(
                    "extracted {} chunks from {} (tag {})",
                    outcome.chunks.len(),
                    path.display(),
                    tag
                );
                report.combined.extend(outcome.chunks);
                report.skipped.extend(outcome.skipped);
            }
            None => {
                eprintln!("warning: unrecognized format in {}", path.display());
                report.issues.push(SourceIssue::UnrecognizedShape(path.clone()));
            }
        }
    }
    report
}

fn read_json(path: &Path) -> Result<Value, String> {
    let file = File::open(path).map_err(|err| err.to_string())?;
    serde_json::from_reader(BufReader::new(file)).map_err(|err| err.to_string())
}

/// Derives the source tag from the file stem (`specs/drawings.json` → `drawings`).
pub fn file_tag(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string())
}

// Two files with the same stem would otherwise mint colliding chunk ids.
fn unique_tag(used: &mut HashMap<String, usize>, tag: &str) -> String {
    let count = used.entry(tag.to_string()).or_insert(0);
    *count += 1;
    if *count == 1 {
        tag.to_string()
    } else {
        format!("{}-{}", tag, count)
    }
}
