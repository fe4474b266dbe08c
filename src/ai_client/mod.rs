//! AIClient - Vision Model Adapter
//!
//! ## Responsibilities
//!
//! - Ask the Moondream query API whether a frame contains humans
//! - Reduce the free-text answer to a yes/no verdict
//! - Treat inconclusive answers as "no human" to bias against false alarms

use crate::error::{Error, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Default Moondream cloud endpoint
pub const DEFAULT_MOONDREAM_URL: &str = "https://api.moondream.ai/v1/query";

const HUMAN_QUESTION: &str = "Are there any humans in this image? Return only true or false.";

/// Classifier failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectorError {
    #[error("detector returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("detector request timed out")]
    Timeout,

    #[error("detector network error: {0}")]
    Network(String),

    #[error("malformed detector response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for DetectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DetectorError::Timeout
        } else if e.is_decode() {
            DetectorError::InvalidResponse(e.to_string())
        } else {
            DetectorError::Network(e.to_string())
        }
    }
}

/// Human-presence classifier
pub trait Detector: Send + Sync {
    /// `Ok(true)` only when a human is clearly present
    fn classify(
        &self,
        frame: &[u8],
    ) -> impl Future<Output = std::result::Result<bool, DetectorError>> + Send;
}

/// Interpreted model answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Present,
    Absent,
    Inconclusive,
}

impl Verdict {
    /// Interpret a free-text answer
    pub fn from_answer(answer: &str) -> Self {
        let normalized = answer
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_ascii_lowercase();

        match normalized.as_str() {
            "true" | "yes" => return Verdict::Present,
            "false" | "no" => return Verdict::Absent,
            _ => {}
        }

        let says_true = normalized.contains("true");
        let says_false = normalized.contains("false");
        match (says_true, says_false) {
            (true, false) => Verdict::Present,
            (false, true) => Verdict::Absent,
            _ => Verdict::Inconclusive,
        }
    }

    pub fn has_humans(&self) -> bool {
        matches!(self, Verdict::Present)
    }
}

/// Query request body
#[derive(Debug, Clone, Serialize)]
struct QueryRequest<'a> {
    image_url: String,
    question: &'a str,
    stream: bool,
}

/// Query response body
#[derive(Debug, Clone, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    request_id: Option<String>,
    answer: String,
}

/// Moondream cloud client
pub struct MoondreamClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl MoondreamClient {
    /// Create new MoondreamClient
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::Config("detector API key is empty".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// Ask the model about one frame
    pub async fn query(&self, frame: &[u8]) -> std::result::Result<Verdict, DetectorError> {
        let request = QueryRequest {
            image_url: format!(
                "data:image/jpeg;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(frame)
            ),
            question: HUMAN_QUESTION,
            stream: false,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-Moondream-Auth", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DetectorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let result: QueryResponse = resp.json().await?;
        let verdict = Verdict::from_answer(&result.answer);

        tracing::debug!(
            request_id = ?result.request_id,
            answer = %result.answer,
            verdict = ?verdict,
            "Detector answered"
        );
        if verdict == Verdict::Inconclusive {
            tracing::warn!(answer = %result.answer, "Inconclusive detector answer, assuming no human");
        }

        Ok(verdict)
    }
}

impl Detector for MoondreamClient {
    async fn classify(&self, frame: &[u8]) -> std::result::Result<bool, DetectorError> {
        Ok(self.query(frame).await?.has_humans())
    }
}
