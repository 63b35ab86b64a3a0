#![warn(missing_docs)]
//! Core library entry points for the specxref ingest and QA pipelines.

pub mod embedder;
pub mod filter;
pub mod index;
pub mod net;
pub mod qa;
pub mod source;
pub mod uploader;

pub use embedder::{embed_records, embed_texts, EmbeddedRecord, TextEmbedder};
pub use filter::{partition_records, ValidRecord};
pub use index::{UpsertVector, VectorIndex};
pub use source::{load_sources, LoadReport, SourceIssue, SourceShape, DEFAULT_SOURCE_FILES};
pub use uploader::{batch_ranges, build_vector, Checkpoint, DEFAULT_BATCH_SIZE};
