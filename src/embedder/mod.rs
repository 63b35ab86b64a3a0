//! Embedding stage: attaches a fixed-length vector to every valid record.

pub mod openai;

use anyhow::Result;

use crate::filter::ValidRecord;

pub use openai::OpenAiEmbedder;

/// Text-to-vector collaborator. Implementations must return exactly one
/// vector per input, in input order.
pub trait TextEmbedder {
    /// Embeds a batch of texts; the batch must not exceed [`Self::batch_size`].
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Largest batch the collaborator accepts per call.
    fn batch_size(&self) -> usize;
}

/// A valid record together with its embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedRecord {
    /// The record as it left the validity filter.
    pub record: ValidRecord,
    /// Model output vector for the record's text.
    pub embedding: Vec<f32>,
}

/// Embeds a list of texts, batching requests for throughput while preserving
/// input order. The output length always equals the input length.
pub fn embed_texts(embedder: &dyn TextEmbedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let batch_size = embedder.batch_size().max(1);
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        let inputs: Vec<&str> = batch.iter().map(String::as_str).collect();
        let batch_vectors = embedder.embed_batch(&inputs)?;
        anyhow::ensure!(
            batch_vectors.len() == batch.len(),
            "embedder returned {} vectors for {} inputs",
            batch_vectors.len(),
            batch.len()
        );
        vectors.extend(batch_vectors);
        eprintln!("embedded {}/{} texts...", vectors.len(), texts.len());
    }
    Ok(vectors)
}

/// Attaches an embedding to every valid record, in input order.
pub fn embed_records(
    embedder: &dyn TextEmbedder,
    records: Vec<ValidRecord>,
) -> Result<Vec<EmbeddedRecord>> {
    let texts: Vec<String> = records.iter().map(|record| record.text.clone()).collect();
    let vectors = embed_texts(embedder, &texts)?;
    Ok(records
        .into_iter()
        .zip(vectors)
        .map(|(record, embedding)| EmbeddedRecord { record, embedding })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedEmbedder {
        batch_size: usize,
        calls: std::cell::RefCell<Vec<usize>>,
    }

    impl FixedEmbedder {
        fn new(batch_size: usize) -> Self {
            Self {
                batch_size,
                calls: std::cell::RefCell::new(Vec::new()),
            }
        }
    }

    impl TextEmbedder for FixedEmbedder {
        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.calls.borrow_mut().push(inputs.len());
            Ok(inputs
                .iter()
                .map(|text| vec![text.len() as f32, 1.0])
                .collect())
        }

        fn batch_size(&self) -> usize {
            self.batch_size
        }
    }

    fn record(text: &str) -> ValidRecord {
        ValidRecord {
            value: json!({"id": "t_0", "text": text}),
            text: text.to_string(),
        }
    }

    #[test]
    fn embeds_in_batches_preserving_order() {
        let embedder = FixedEmbedder::new(2);
        let records = vec![record("a"), record("bb"), record("ccc")];
        let embedded = embed_records(&embedder, records).unwrap();
        assert_eq!(embedded.len(), 3);
        assert_eq!(embedded[0].embedding, vec![1.0, 1.0]);
        assert_eq!(embedded[2].embedding, vec![3.0, 1.0]);
        assert_eq!(*embedder.calls.borrow(), vec![2, 1]);
    }

    #[test]
    fn empty_input_makes_no_calls() {
        let embedder = FixedEmbedder::new(8);
        let embedded = embed_records(&embedder, Vec::new()).unwrap();
        assert!(embedded.is_empty());
        assert!(embedder.calls.borrow().is_empty());
    }
}
