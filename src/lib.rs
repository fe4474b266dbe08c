//! CCTV Detector Library
//!
//! Camera human-presence detector with live event streaming
//!
//! ## Architecture (7 Components)
//!
//! 1. SnapshotService - Still image capture from the camera (Digest/Basic auth)
//! 2. AIClient - Moondream vision model adapter
//! 3. DetectionCycle - One fetch + classify attempt, always yields an event
//! 4. PollingOrchestrator - Fixed-interval scheduler, one cycle in flight
//! 5. RealtimeHub - Authenticated subscriber set and SSE fan-out
//! 6. WebAPI - HTTP endpoints
//! 7. AppState - Configuration and shared components
//!
//! ## Design Principles
//!
//! - One shared scheduler regardless of subscriber count
//! - Every cycle outcome, failure included, reaches every subscriber
//! - A broken subscriber only ever affects itself

pub mod ai_client;
pub mod detection_cycle;
pub mod error;
pub mod models;
pub mod polling_orchestrator;
pub mod realtime_hub;
pub mod snapshot_service;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
