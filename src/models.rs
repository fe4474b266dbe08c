//! Shared models and types
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
}

/// Embedded frame carried by a successful detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub mime: &'static str,
    pub data: Vec<u8>,
}

impl ImageRef {
    /// Wrap frame bytes, sniffing the MIME type from the magic bytes
    pub fn from_frame(data: Vec<u8>) -> Self {
        let mime = sniff_mime(&data);
        Self { mime, data }
    }

    /// `data:` URI suitable for an `<img src>`
    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.data)
        )
    }
}

/// Camera snapshots are JPEG in practice, so that is the fallback
fn sniff_mime(data: &[u8]) -> &'static str {
    match data {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

/// Result of one detection cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    Detected {
        has_humans: bool,
        image: Option<ImageRef>,
    },
    Failed {
        reason: String,
    },
}

/// One classification result, produced once per cycle and never mutated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionEvent {
    /// Cycle start time
    pub timestamp: DateTime<Utc>,
    pub outcome: DetectionOutcome,
}

impl DetectionEvent {
    pub fn detected(timestamp: DateTime<Utc>, has_humans: bool, image: Option<ImageRef>) -> Self {
        Self {
            timestamp,
            outcome: DetectionOutcome::Detected { has_humans, image },
        }
    }

    pub fn failed(timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            timestamp,
            outcome: DetectionOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, DetectionOutcome::Failed { .. })
    }

    /// Wire representation pushed to subscribers
    pub fn to_record(&self) -> EventRecord {
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        let body = match &self.outcome {
            DetectionOutcome::Detected { has_humans, image } => RecordBody::Detected {
                has_humans: *has_humans,
                image_src: image.as_ref().map(ImageRef::to_data_uri),
            },
            DetectionOutcome::Failed { reason } => RecordBody::Failed {
                error: reason.clone(),
            },
        };
        EventRecord { timestamp, body }
    }

    /// Serialized record, one SSE `data:` payload
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_record())
    }
}

/// Self-contained record as seen by the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: String,
    #[serde(flatten)]
    pub body: RecordBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordBody {
    #[serde(rename_all = "camelCase")]
    Detected {
        has_humans: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_src: Option<String>,
    },
    Failed {
        error: String,
    },
}
