//! SnapshotService - Still Image Capture from the Camera
//!
//! ## Responsibilities
//!
//! - Fetch one JPEG still from the camera's HTTP snapshot URL
//! - Answer Digest (MD5 / SHA-256) or Basic authentication challenges
//! - Bound every fetch by a timeout and a maximum body size

mod digest_auth;

pub use digest_auth::{DigestAlgorithm, DigestChallenge};

use crate::error::{Error, Result};
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Response, StatusCode, Url};
use std::future::Future;
use std::time::Duration;

/// Upper bound on a snapshot body (10 MiB)
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Image acquisition failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("camera returned HTTP {0}")]
    Status(u16),

    #[error("camera request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("camera authentication failed: {0}")]
    Auth(String),

    #[error("snapshot exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Source of still frames for a detection cycle
pub trait ImageSource: Send + Sync {
    /// Fetch exactly one frame
    fn fetch(&self) -> impl Future<Output = std::result::Result<Vec<u8>, FetchError>> + Send;
}

/// Camera login
#[derive(Debug, Clone)]
pub struct CameraCredentials {
    pub username: String,
    pub password: String,
}

/// SnapshotService instance
pub struct SnapshotService {
    client: reqwest::Client,
    url: Url,
    credentials: Option<CameraCredentials>,
}

impl SnapshotService {
    /// Create new SnapshotService
    ///
    /// # Arguments
    /// * `url` - Camera snapshot URL (e.g., http://192.168.1.64/ISAPI/Streaming/channels/101/picture)
    /// * `credentials` - Camera login, `None` for open endpoints
    /// * `timeout` - Per-request timeout
    pub fn new(
        url: &str,
        credentials: Option<CameraCredentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid camera url '{}': {}", url, e)))?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url,
            credentials,
        })
    }

    /// Capture snapshot from camera
    pub async fn capture(&self) -> std::result::Result<Vec<u8>, FetchError> {
        let resp = self.client.get(self.url.clone()).send().await?;

        let resp = if resp.status() == StatusCode::UNAUTHORIZED {
            match &self.credentials {
                Some(credentials) => {
                    let offered = offered_challenges(&resp);
                    self.retry_with_credentials(&offered, credentials).await?
                }
                None => return Err(FetchError::Status(resp.status().as_u16())),
            }
        } else {
            resp
        };

        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "Snapshot HTTP error");
            return Err(FetchError::Status(resp.status().as_u16()));
        }

        read_limited(resp, MAX_IMAGE_BYTES).await
    }

    /// Answer the camera's 401 challenge
    async fn retry_with_credentials(
        &self,
        offered: &[String],
        credentials: &CameraCredentials,
    ) -> std::result::Result<Response, FetchError> {
        if let Some(digest) = offered.iter().find_map(|h| DigestChallenge::parse(h)) {
            tracing::debug!(
                realm = %digest.realm,
                algorithm = digest.algorithm.as_str(),
                "Answering digest challenge"
            );
            let header = digest.authorization(
                &credentials.username,
                &credentials.password,
                "GET",
                &request_uri(&self.url),
            );
            return Ok(self
                .client
                .get(self.url.clone())
                .header(AUTHORIZATION, header)
                .send()
                .await?);
        }

        if offered
            .iter()
            .any(|h| h.trim_start().to_ascii_lowercase().starts_with("basic"))
        {
            tracing::debug!("Answering basic challenge");
            return Ok(self
                .client
                .get(self.url.clone())
                .basic_auth(&credentials.username, Some(&credentials.password))
                .send()
                .await?);
        }

        Err(FetchError::Auth(format!(
            "no supported challenge in {:?}",
            offered
        )))
    }
}

impl ImageSource for SnapshotService {
    async fn fetch(&self) -> std::result::Result<Vec<u8>, FetchError> {
        self.capture().await
    }
}

fn offered_challenges(resp: &Response) -> Vec<String> {
    resp.headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// Path and query as they appear in the request line
fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Read the body chunk by chunk, giving up as soon as it passes `limit`
async fn read_limited(
    mut resp: Response,
    limit: usize,
) -> std::result::Result<Vec<u8>, FetchError> {
    if resp.content_length().map_or(false, |len| len > limit as u64) {
        return Err(FetchError::TooLarge { limit });
    }

    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        if body.len() + chunk.len() > limit {
            tracing::warn!(limit = limit, "Snapshot body exceeds limit, aborting read");
            return Err(FetchError::TooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
