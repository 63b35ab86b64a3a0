//! Vector index collaborator: the upsert surface the uploader talks to.

pub mod pinecone;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use pinecone::PineconeIndex;

/// One vector in an upsert request, keyed by record id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertVector {
    /// Unique record identifier; upserts are idempotent by this key.
    pub id: String,
    /// Embedding values.
    pub values: Vec<f32>,
    /// Scalar metadata stored alongside the vector.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Remote vector index. Only upsert is used by the ingest pipeline.
pub trait VectorIndex {
    /// Upserts one batch as a single network call, returning the accepted
    /// vector count.
    fn upsert(&self, vectors: &[UpsertVector]) -> Result<usize>;
}
