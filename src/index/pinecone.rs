//! Blocking Pinecone REST client implementing the upsert surface.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::net::{post_json_with_retry, RetryPolicy};
use crate::{UpsertVector, VectorIndex};

/// Client for a single Pinecone index host (`https://<index>-<project>.svc...`).
#[derive(Clone)]
pub struct PineconeIndex {
    client: Client,
    upsert_url: String,
    namespace: Option<String>,
    retry: RetryPolicy,
}

impl PineconeIndex {
    /// Builds a client for the given index host.
    pub fn new(
        api_key: String,
        host: String,
        namespace: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Pinecone API key");
        anyhow::ensure!(
            host.starts_with("http://") || host.starts_with("https://"),
            "Pinecone host must be an http(s) URL"
        );
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(api_key.trim()).context("invalid Pinecone API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Pinecone HTTP client")?;
        Ok(Self {
            client,
            upsert_url: format!("{}/vectors/upsert", host.trim_end_matches('/')),
            namespace,
            retry,
        })
    }
}

impl VectorIndex for PineconeIndex {
    fn upsert(&self, vectors: &[UpsertVector]) -> Result<usize> {
        if vectors.is_empty() {
            return Ok(0);
        }
        let request = UpsertRequest {
            vectors,
            namespace: self.namespace.as_deref(),
        };
        let response =
            post_json_with_retry(&self.client, &self.upsert_url, &request, self.retry)?;
        let parsed: UpsertResponse = response
            .json()
            .context("failed to parse Pinecone upsert response")?;
        Ok(parsed.upserted_count)
    }
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [UpsertVector],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    #[serde(rename = "upsertedCount", default)]
    upserted_count: usize,
}
