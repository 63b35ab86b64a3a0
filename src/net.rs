//! Shared HTTP retry plumbing for the remote collaborators.
//!
//! Both the embedding endpoint and the vector index are called through a
//! blocking [`reqwest`] client. Transient failures (429, 5xx, connect or
//! timeout errors) are retried with capped exponential backoff; anything else
//! surfaces immediately.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Serialize;

/// Bounded-backoff retry policy shared by the HTTP clients.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1).
    pub max_attempts: usize,
    /// Delay before the first retry; doubles per attempt, capped at 32x.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Builds a policy with the given attempt budget and the default delay.
    pub fn with_attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        self.base_delay * (1u32 << capped)
    }
}

/// POSTs `body` as JSON to `url`, retrying transient failures per `policy`.
///
/// A successful return carries a success-status response; non-retryable or
/// exhausted failures become errors with the response body attached when one
/// could be read.
pub fn post_json_with_retry<B: Serialize>(
    client: &Client,
    url: &str,
    body: &B,
    policy: RetryPolicy,
) -> Result<Response> {
    let mut attempt = 0usize;
    loop {
        let outcome = client.post(url).json(body).send();
        match outcome {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp);
                }
                let retryable = retryable_status(status);
                let text = resp
                    .text()
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                if retryable && attempt + 1 < policy.max_attempts {
                    attempt += 1;
                    thread::sleep(policy.backoff(attempt));
                    continue;
                }
                anyhow::bail!("request to {} failed ({}): {}", url, status, text);
            }
            Err(err) => {
                if retryable_error(&err) && attempt + 1 < policy.max_attempts {
                    attempt += 1;
                    thread::sleep(policy.backoff(attempt));
                    continue;
                }
                return Err(err.into());
            }
        }
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() || err.is_decode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(5), Duration::from_secs(16));
        assert_eq!(policy.backoff(9), Duration::from_secs(16));
    }

    #[test]
    fn retryable_statuses() {
        assert!(retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!retryable_status(StatusCode::UNPROCESSABLE_ENTITY));
    }

    #[test]
    fn attempt_budget_has_a_floor() {
        assert_eq!(RetryPolicy::with_attempts(0).max_attempts, 1);
        assert_eq!(RetryPolicy::with_attempts(7).max_attempts, 7);
    }
}
