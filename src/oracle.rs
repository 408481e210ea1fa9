//! Reasoning-oracle contract and implementations.
//!
//! All four LLM-backed stages (directory filter, file pre-filter, file
//! analyzer, relationship mapper) go through the [`Oracle`] trait: one
//! textual request in, one JSON object out. The harness owns everything
//! around the call — retry with backoff, extraction of JSON wrapped in
//! prose, and schema validation — so its correctness is independent of the
//! oracle's specific answers.
//!
//! # Retry Strategy
//!
//! [`request_json`] retries transient failures and malformed responses up
//! to `max_retries` with exponential backoff. A budget rejection (prompt
//! exceeded the oracle's context window) is never retried: the caller must
//! escalate to a coarser filtering stage instead of resending the same
//! oversized request.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::OracleConfig;

/// Errors at the oracle boundary, by how the caller should react.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Timeout, rate limit, server error, or network failure. Retryable.
    #[error("transient oracle failure: {0}")]
    Transient(String),
    /// Response did not contain a JSON object matching the stage schema.
    /// Retryable.
    #[error("malformed oracle response: {0}")]
    Malformed(String),
    /// The prompt exceeded the oracle's context budget. Not retryable;
    /// escalate to a coarser filtering stage.
    #[error("oracle context budget exceeded: {0}")]
    BudgetExceeded(String),
    /// Non-retryable client error (bad credentials, disabled provider).
    #[error("oracle rejected the request: {0}")]
    Rejected(String),
}

/// External reasoning service: one prompt in, one text completion out.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

/// Issue a prompt and parse the JSON reply, retrying transient and
/// malformed outcomes.
///
/// Returns the parsed value together with the number of retries spent,
/// which the analyzer records per file.
pub async fn request_json<T>(
    oracle: &dyn Oracle,
    cfg: &OracleConfig,
    prompt: &str,
    parse: impl Fn(&Value) -> Result<T, OracleError>,
) -> Result<(T, u32), OracleError> {
    let mut last_err = None;

    for attempt in 0..=cfg.max_retries {
        if attempt > 0 {
            // Exponential backoff: delay, 2*delay, 4*delay, ... capped at 2^5.
            let delay = Duration::from_millis(cfg.retry_delay_ms << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let outcome = match oracle.complete(prompt).await {
            Ok(text) => extract_json(&text).and_then(|value| parse(&value)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(value) => return Ok((value, attempt)),
            Err(e @ (OracleError::BudgetExceeded(_) | OracleError::Rejected(_))) => {
                return Err(e);
            }
            Err(e) => {
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| OracleError::Transient("retries exhausted".to_string())))
}

/// Extract the first valid top-level JSON object from a reply that may
/// wrap it in prose or markdown fences.
///
/// Prose can itself contain brace pairs (`use {placeholders}`), so every
/// `{` is a candidate start: a balanced span that fails to parse moves the
/// scan to the next brace instead of failing the reply.
pub fn extract_json(text: &str) -> Result<Value, OracleError> {
    let bytes = text.as_bytes();
    let mut search_from = 0usize;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_object_end(bytes, start) {
            if let Ok(value) = serde_json::from_str(&text[start..=end]) {
                return Ok(value);
            }
        }
        search_from = start + 1;
    }

    Err(OracleError::Malformed(
        "no JSON object in response".to_string(),
    ))
}

/// Index of the `}` closing the object opened at `start`, if balanced.
fn balanced_object_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ============ Disabled oracle ============

/// Rejects every request; used when no provider is configured.
pub struct DisabledOracle;

#[async_trait]
impl Oracle for DisabledOracle {
    async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
        Err(OracleError::Rejected(
            "oracle provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI-compatible oracle ============

const SYSTEM_PROMPT: &str = "You are a code analysis expert. Provide precise, \
structured analysis of code relationships and similarities.";

/// Chat-completions client for OpenAI-compatible endpoints.
///
/// Requires the `OPENAI_API_KEY` environment variable. Each call issues a
/// single request; retry policy lives in [`request_json`].
pub struct OpenAiOracle {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
}

impl OpenAiOracle {
    pub fn new(cfg: &OracleConfig) -> anyhow::Result<Self> {
        let model = cfg
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("oracle.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.3,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Transient(e.to_string()))?;

        let status = resp.status();

        if status.is_success() {
            let json: Value = resp
                .json()
                .await
                .map_err(|e| OracleError::Malformed(e.to_string()))?;
            return json
                .pointer("/choices/0/message/content")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    OracleError::Malformed("response missing message content".to_string())
                });
        }

        let body_text = resp.text().await.unwrap_or_default();

        // Rate limited or server error: retryable.
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(OracleError::Transient(format!("{}: {}", status, body_text)));
        }

        // An oversized prompt surfaces as a 400 mentioning the context
        // window; that must escalate, not retry.
        if status.as_u16() == 400 && is_context_overflow(&body_text) {
            return Err(OracleError::BudgetExceeded(body_text));
        }

        Err(OracleError::Rejected(format!("{}: {}", status, body_text)))
    }
}

fn is_context_overflow(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("context length")
        || lower.contains("context window")
        || lower.contains("context_length_exceeded")
        || lower.contains("maximum context")
}

/// Instantiate the configured oracle.
pub fn create_oracle(cfg: &OracleConfig) -> anyhow::Result<Arc<dyn Oracle>> {
    match cfg.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledOracle)),
        "openai" => Ok(Arc::new(OpenAiOracle::new(cfg)?)),
        other => anyhow::bail!("Unknown oracle provider: {}", other),
    }
}
