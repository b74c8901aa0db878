//! Detection Layer
//!
//! Submits still frames to the remote detection service on a fixed cadence and
//! keeps the most recently completed prediction list. Transport and
//! serialization live here so the overlay never sees the network.

pub mod client;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{prediction_feed, DetectionClient, DetectionStats, PendingDetection, PredictionFeed};
pub use http::HttpDetectionService;

/// One detected object in a single frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Class name reported by the detector
    #[serde(rename = "class")]
    pub class_label: String,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
    /// Bounding box `[x0, y0, x1, y1]` in source-frame pixels
    pub bbox: [f32; 4],
}

impl Prediction {
    pub fn new(class_label: impl Into<String>, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            class_label: class_label.into(),
            confidence,
            bbox,
        }
    }

    /// Confidence rounded to an integer percentage
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u32
    }

    /// Display label, e.g. `bottle (92%)`
    pub fn label(&self) -> String {
        format!("{} ({}%)", self.class_label, self.confidence_percent())
    }

    /// Horizontal midpoint of the box
    pub fn center_x(&self) -> f32 {
        self.bbox[0] + (self.bbox[2] - self.bbox[0]) / 2.0
    }
}

/// Body returned by `POST /detect`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub predictions: Vec<Prediction>,
}

/// Errors raised while running one detection cycle
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("frame encoding failed: {0}")]
    Encode(String),
    #[error("detection request failed: {0}")]
    Transport(String),
    #[error("detection request timed out")]
    Timeout,
    #[error("detection service returned HTTP {0}")]
    Status(u16),
    #[error("malformed detection response: {0}")]
    Decode(String),
    #[error("a detection request is already in flight")]
    InFlight,
}

/// Request/response boundary to a detection service
#[async_trait]
pub trait DetectionTransport: Send + Sync {
    /// Submit one JPEG-encoded frame and return its predictions
    async fn detect(&self, jpeg: Vec<u8>) -> Result<Vec<Prediction>, DetectionError>;
}
