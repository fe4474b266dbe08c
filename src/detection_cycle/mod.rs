//! DetectionCycle - One Fetch + Classify Attempt
//!
//! ## Responsibilities
//!
//! - Fetch one frame, classify it, wrap the verdict in a `DetectionEvent`
//! - Convert every failure (fetch, auth, detector, timeout) into a `Failed` event
//! - Never touch broadcaster state; the event is returned to the caller

use crate::ai_client::Detector;
use crate::models::{DetectionEvent, ImageRef};
use crate::snapshot_service::ImageSource;
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Timeouts and payload options for a cycle
#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub fetch_timeout: Duration,
    pub detect_timeout: Duration,
    /// Embed the frame in `Detected` events
    pub include_image: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            detect_timeout: Duration::from_secs(20),
            include_image: true,
        }
    }
}

/// Single detection attempt over an image source and a detector
pub struct DetectionCycle<S, D> {
    source: S,
    detector: D,
    config: CycleConfig,
}

impl<S, D> DetectionCycle<S, D>
where
    S: ImageSource,
    D: Detector,
{
    pub fn new(source: S, detector: D, config: CycleConfig) -> Self {
        Self {
            source,
            detector,
            config,
        }
    }

    /// Run one cycle. Always yields an event.
    pub async fn run(&self) -> DetectionEvent {
        let timestamp = Utc::now();
        let started = Instant::now();

        let frame = match timeout(self.config.fetch_timeout, self.source.fetch()).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Image fetch failed");
                return DetectionEvent::failed(timestamp, format!("image fetch failed: {}", e));
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.fetch_timeout.as_millis() as u64,
                    "Image fetch timed out"
                );
                return DetectionEvent::failed(
                    timestamp,
                    format!(
                        "image fetch timed out after {}ms",
                        self.config.fetch_timeout.as_millis()
                    ),
                );
            }
        };
        let fetch_ms = started.elapsed().as_millis() as u64;

        let has_humans = match timeout(self.config.detect_timeout, self.detector.classify(&frame)).await {
            Ok(Ok(has_humans)) => has_humans,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Detection failed");
                return DetectionEvent::failed(timestamp, format!("detection failed: {}", e));
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.detect_timeout.as_millis() as u64,
                    "Detection timed out"
                );
                return DetectionEvent::failed(
                    timestamp,
                    format!(
                        "detection timed out after {}ms",
                        self.config.detect_timeout.as_millis()
                    ),
                );
            }
        };

        tracing::info!(
            has_humans = has_humans,
            frame_bytes = frame.len(),
            fetch_ms = fetch_ms,
            total_ms = started.elapsed().as_millis() as u64,
            "Detection cycle complete"
        );

        let image = self
            .config
            .include_image
            .then(|| ImageRef::from_frame(frame));
        DetectionEvent::detected(timestamp, has_humans, image)
    }
}
