//! Application state
//!
//! Holds all shared components and configuration

use crate::ai_client::{MoondreamClient, DEFAULT_MOONDREAM_URL};
use crate::detection_cycle::CycleConfig;
use crate::error::{Error, Result};
use crate::polling_orchestrator::PollingOrchestrator;
use crate::realtime_hub::{RealtimeHub, DEFAULT_SUBSCRIBER_BUFFER};
use crate::snapshot_service::{CameraCredentials, SnapshotService};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Polling orchestrator wired to the real camera and detector
pub type CameraPolling = PollingOrchestrator<SnapshotService, MoondreamClient>;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Camera snapshot URL
    pub camera_image_url: String,
    /// Camera login (Digest or Basic)
    pub camera_username: String,
    pub camera_password: String,
    /// Poll interval
    pub check_interval: Duration,
    /// Shared bearer secret for stream subscribers
    pub auth_digest: String,
    /// Moondream API key
    pub moondream_api_key: String,
    /// Moondream query endpoint
    pub moondream_url: String,
    /// Image fetch timeout
    pub fetch_timeout: Duration,
    /// Detector call timeout
    pub detect_timeout: Duration,
    /// Embed frames in events
    pub include_image: bool,
    /// Per-subscriber queue depth
    pub subscriber_buffer: usize,
    /// SSE keep-alive comment period
    pub keep_alive: Duration,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

impl AppConfig {
    /// Load from process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{} is not set", key)))
        };
        let positive = |key: &str, default: u64| -> Result<u64> {
            match parse_or(&lookup, key, default)? {
                0 => Err(Error::Config(format!("{} must be greater than 0", key))),
                value => Ok(value),
            }
        };

        Ok(Self {
            camera_image_url: required("CAMERA_IMAGE_URL")?,
            camera_username: lookup("CAMERA_USERNAME").unwrap_or_default(),
            camera_password: lookup("CAMERA_PASSWORD").unwrap_or_default(),
            check_interval: Duration::from_millis(positive("CHECK_INTERVAL", 5000)?),
            auth_digest: required("AUTH_DIGEST")?,
            moondream_api_key: required("MOONDREAM_API_KEY")?,
            moondream_url: lookup("MOONDREAM_URL")
                .unwrap_or_else(|| DEFAULT_MOONDREAM_URL.to_string()),
            fetch_timeout: Duration::from_millis(positive("FETCH_TIMEOUT_MS", 10_000)?),
            detect_timeout: Duration::from_millis(positive("DETECT_TIMEOUT_MS", 20_000)?),
            include_image: parse_or(&lookup, "INCLUDE_IMAGE", true)?,
            subscriber_buffer: parse_or(&lookup, "SUBSCRIBER_BUFFER", DEFAULT_SUBSCRIBER_BUFFER)?,
            keep_alive: Duration::from_secs(positive("KEEP_ALIVE_SECS", 15)?),
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 3002)?,
        })
    }

    /// Camera credentials, `None` when no username is configured
    pub fn camera_credentials(&self) -> Option<CameraCredentials> {
        if self.camera_username.is_empty() {
            return None;
        }
        Some(CameraCredentials {
            username: self.camera_username.clone(),
            password: self.camera_password.clone(),
        })
    }

    pub fn cycle_config(&self) -> CycleConfig {
        CycleConfig {
            fetch_timeout: self.fetch_timeout,
            detect_timeout: self.detect_timeout,
            include_image: self.include_image,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{}='{}' is invalid: {}", key, raw, e))),
        _ => Ok(default),
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// RealtimeHub (SSE subscribers)
    pub realtime: Arc<RealtimeHub>,
    /// PollingOrchestrator (detection cycles)
    pub polling: Arc<CameraPolling>,
    /// Process start, for uptime
    pub started_at: Instant,
}
