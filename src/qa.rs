//! Nearest-chunk question answering over precomputed spec/drawing pairs.
//!
//! The demo pipeline embeds every cross-reference chunk once at startup, then
//! answers each question by picking the single most similar chunk (cosine,
//! ties to the lowest index) and running an extractive QA model over its
//! concatenated spec+drawing context. The top-1 chunk is returned regardless
//! of how low the similarity is.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::net::{post_json_with_retry, RetryPolicy};

/// Extractive QA model the demo defaults to.
pub const DEFAULT_QA_MODEL: &str = "deepset/roberta-base-squad2";

/// Checklist-style questions shipped with the original demo.
pub const EXAMPLE_QUESTIONS: &[&str] = &[
    "Are all fire-rated wall assemblies detailed?",
    "Type of hangers.",
    "Confirm Trench drains with lids and sanitary piping (set/embed into concrete by concrete sub)",
    "Is ADA compliance for door hardware ensured?",
    "Entry doors - smart lock or deadbolt?",
    "Does plumber provide unit garbage disposal or is it included in appliance package?",
    "Anything required for guard shack?",
    "Who provides unit water sub meters? Who installs?",
    "Number of lifts.",
    "Lighting Lead times.",
    "Is control panel pre-wired for pipe specialties and low voltage interlocks?",
    "What are the requirements for the guard shack?",
    "Is hot and/or cold-water insulation included?",
    "Who is responsible for plumbing inspections?",
    "Is GFCI protection required for bathrooms?",
];

/// One precomputed spec/drawing cross-reference pair.
#[derive(Debug, Clone, Deserialize)]
pub struct XrefPair {
    /// Specification excerpt.
    pub spec_text: String,
    /// Drawing text extracted near the match.
    pub drawing_text: String,
    /// Page of the drawing the text came from.
    #[serde(default)]
    pub drawing_page: Option<u64>,
    /// Bounding box of the drawing text, passed through as-is.
    #[serde(default)]
    pub drawing_bbox: Option<Value>,
    /// Pairing similarity computed upstream.
    #[serde(default)]
    pub similarity: Option<f64>,
    /// Identifier of the drawing chunk.
    #[serde(default)]
    pub drawing_id: Option<String>,
    /// Identifier of the specification chunk.
    #[serde(default)]
    pub spec_id: Option<String>,
}

/// A QA context chunk built from one cross-reference pair.
#[derive(Debug, Clone)]
pub struct ContextChunk {
    /// Stable identifier `xref_<index>`.
    pub id: String,
    /// Concatenated `[SPEC]`/`[DRAWING]` context fed to the QA model.
    pub context: String,
    /// The source pair, kept for response formatting.
    pub pair: XrefPair,
}

/// Reads the cross-reference pair list from a JSON array file.
pub fn load_xref_pairs(path: &Path) -> Result<Vec<XrefPair>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let pairs: Vec<XrefPair> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse xref pairs from {}", path.display()))?;
    Ok(pairs)
}

/// Builds the fixed chunk list the demo answers from.
pub fn build_chunks(pairs: Vec<XrefPair>) -> Vec<ContextChunk> {
    pairs
        .into_iter()
        .enumerate()
        .map(|(i, pair)| ContextChunk {
            id: format!("xref_{i}"),
            context: format!(
                "[SPEC]\n{}\n\n[DRAWING]\n{}",
                pair.spec_text, pair.drawing_text
            ),
            pair,
        })
        .collect()
}

/// Cosine similarity between two vectors; zero-norm inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Index of the chunk most similar to the query embedding. Ties break to the
/// lowest index; `None` only when there are no chunks.
pub fn best_chunk_index(query: &[f32], embeddings: &[Vec<f32>]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, embedding) in embeddings.iter().enumerate() {
        let score = cosine_similarity(query, embedding);
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// Answer span extracted by the QA collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerSpan {
    /// Extracted answer text.
    pub answer: String,
    /// Model confidence in the span.
    #[serde(default)]
    pub score: f32,
}

/// Extractive question-answering collaborator: (question, context) → span.
pub trait AnswerExtractor {
    /// Extracts an answer span for `question` from `context`.
    fn answer(&self, question: &str, context: &str) -> Result<AnswerSpan>;
}

/// Blocking client for a HuggingFace-inference-style QA endpoint.
pub struct HfQaClient {
    client: Client,
    endpoint: String,
    retry: RetryPolicy,
}

impl HfQaClient {
    /// Builds a client for `base_url` serving `model`.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing QA API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing QA model name");
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid QA API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build QA HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/models/{}", base_url.trim_end_matches('/'), model),
            retry,
        })
    }
}

impl AnswerExtractor for HfQaClient {
    fn answer(&self, question: &str, context: &str) -> Result<AnswerSpan> {
        let request = QaRequest {
            inputs: QaInputs { question, context },
        };
        let response = post_json_with_retry(&self.client, &self.endpoint, &request, self.retry)?;
        let span: AnswerSpan = response.json().context("failed to parse QA response")?;
        Ok(span)
    }
}

#[derive(Serialize)]
struct QaRequest<'a> {
    inputs: QaInputs<'a>,
}

#[derive(Serialize)]
struct QaInputs<'a> {
    question: &'a str,
    context: &'a str,
}

/// Renders the answer plus provenance from the best-matching chunk.
pub fn format_response(span: &AnswerSpan, chunk: &ContextChunk) -> String {
    let pair = &chunk.pair;
    let mut out = String::new();
    out.push_str(&format!("Answer: {}\n\n", span.answer));
    out.push_str(&format!("Drawing Page: {}\n", render_opt_u64(pair.drawing_page)));
    out.push_str(&format!(
        "Bounding Box: {}\n",
        pair.drawing_bbox
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| "n/a".to_string())
    ));
    out.push_str(&format!("Spec ID: {}\n", render_opt_str(&pair.spec_id)));
    out.push_str(&format!("Drawing ID: {}\n", render_opt_str(&pair.drawing_id)));
    out.push_str(&format!("Context ID: {}\n", chunk.id));
    out.push_str("---\n");
    out.push_str(&format!("Spec Snippet:\n{}\n\n", snippet(&pair.spec_text)));
    out.push_str(&format!("Drawing Snippet:\n{}\n", snippet(&pair.drawing_text)));
    out
}

fn render_opt_u64(value: Option<u64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

fn render_opt_str(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "n/a".to_string())
}

/// First 400 characters of a snippet, cut on a char boundary.
fn snippet(text: &str) -> &str {
    const LIMIT: usize = 400;
    if text.len() <= LIMIT {
        return text;
    }
    let mut cut = LIMIT;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pair(spec: &str, drawing: &str) -> XrefPair {
        XrefPair {
            spec_text: spec.to_string(),
            drawing_text: drawing.to_string(),
            drawing_page: Some(12),
            drawing_bbox: Some(json!([1.0, 2.0, 3.0, 4.0])),
            similarity: Some(0.8),
            drawing_id: Some("dwg_3".to_string()),
            spec_id: Some("spec_9".to_string()),
        }
    }

    #[test]
    fn chunks_get_sequential_ids_and_context() {
        let chunks = build_chunks(vec![pair("spec a", "dwg a"), pair("spec b", "dwg b")]);
        assert_eq!(chunks[0].id, "xref_0");
        assert_eq!(chunks[1].id, "xref_1");
        assert_eq!(chunks[0].context, "[SPEC]\nspec a\n\n[DRAWING]\ndwg a");
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, -0.5, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn zero_norm_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn top_1_is_stable_on_ties() {
        let embeddings = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        assert_eq!(best_chunk_index(&[1.0, 0.0], &embeddings), Some(0));
    }

    #[test]
    fn best_index_prefers_higher_similarity() {
        let embeddings = vec![vec![0.0, 1.0], vec![0.9, 0.1], vec![1.0, 0.0]];
        assert_eq!(best_chunk_index(&[1.0, 0.0], &embeddings), Some(2));
    }

    #[test]
    fn no_chunks_means_no_answer() {
        assert_eq!(best_chunk_index(&[1.0], &[]), None);
    }

    #[test]
    fn response_carries_provenance() {
        let chunks = build_chunks(vec![pair("long spec text", "drawing body")]);
        let span = AnswerSpan {
            answer: "deadbolt".to_string(),
            score: 0.72,
        };
        let rendered = format_response(&span, &chunks[0]);
        assert!(rendered.contains("Answer: deadbolt"));
        assert!(rendered.contains("Drawing Page: 12"));
        assert!(rendered.contains("Spec ID: spec_9"));
        assert!(rendered.contains("Context ID: xref_0"));
    }

    #[test]
    fn missing_provenance_renders_placeholders() {
        let mut p = pair("s", "d");
        p.drawing_page = None;
        p.drawing_bbox = None;
        p.spec_id = None;
        let chunks = build_chunks(vec![p]);
        let span = AnswerSpan {
            answer: "x".to_string(),
            score: 0.0,
        };
        let rendered = format_response(&span, &chunks[0]);
        assert!(rendered.contains("Drawing Page: n/a"));
        assert!(rendered.contains("Bounding Box: n/a"));
        assert!(rendered.contains("Spec ID: n/a"));
    }

    #[test]
    fn snippets_cut_on_char_boundaries() {
        let text = "é".repeat(300);
        let cut = snippet(&text);
        assert!(cut.len() <= 400);
        assert!(text.starts_with(cut));
    }
}
