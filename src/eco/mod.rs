//! Eco-info lookup
//!
//! Asks the eco-info service about a selected object and normalises the
//! answer for display. The lookup never fails: any error produces a fallback
//! record so the host always has something to show.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::selection::SelectionEvent;

pub use http::HttpEcoInfoService;

/// Placeholder used for every field the service could not fill
pub const UNKNOWN: &str = "Unknown";
const NO_DATA: &str = "No data available.";
const SEARCH_URL: &str = "https://www.youtube.com/results";

/// Errors raised by an eco-info service
#[derive(Debug, Error)]
pub enum EcoInfoError {
    #[error("eco-info request failed: {0}")]
    Transport(String),
    #[error("eco-info service returned HTTP {0}")]
    Status(u16),
    #[error("malformed eco-info response: {0}")]
    Decode(String),
}

/// A video suggestion as returned by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VideoEntry {
    /// Bare link
    Link(String),
    Titled(Video),
    /// Anything else; dropped during normalisation
    Other(Value),
}

/// Body returned by `POST /eco-info`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EcoInfoRecord {
    #[serde(default)]
    pub recyclable: Value,
    #[serde(default)]
    pub carbon: Value,
    #[serde(default)]
    pub alternative: Value,
    #[serde(default)]
    pub summary: Value,
    #[serde(default)]
    pub videos: Vec<VideoEntry>,
    #[serde(default)]
    pub links: Vec<Value>,
}

/// Request/response boundary to an eco-info service
#[async_trait]
pub trait EcoInfoService: Send + Sync {
    async fn fetch(&self, object_name: &str) -> Result<EcoInfoRecord, EcoInfoError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
}

/// Normalised eco information for one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcoInfo {
    pub recyclable: String,
    pub carbon: String,
    /// Display name of a sustainable replacement; selects the 3D asset
    pub alternative: String,
    pub summary: String,
    pub videos: Vec<Video>,
    pub links: Vec<String>,
}

/// YouTube search for recycling `object_name`
pub fn recycle_search_link(object_name: &str) -> String {
    let query = format!("how to recycle {object_name}");
    match reqwest::Url::parse_with_params(SEARCH_URL, &[("search_query", query.as_str())]) {
        Ok(url) => url.to_string(),
        Err(_) => SEARCH_URL.to_string(),
    }
}

fn recycle_video(object_name: &str) -> Video {
    Video {
        title: format!("How to recycle {object_name}"),
        link: recycle_search_link(object_name),
    }
}

/// Render a JSON field as display text
fn text(value: &Value, missing: &str) -> String {
    match value {
        Value::Null => missing.to_string(),
        Value::String(s) if s.trim().is_empty() => missing.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl EcoInfo {
    /// Record shown when the service is unreachable or answers garbage
    pub fn fallback(object_name: &str) -> Self {
        Self {
            recyclable: UNKNOWN.to_string(),
            carbon: UNKNOWN.to_string(),
            alternative: UNKNOWN.to_string(),
            summary: NO_DATA.to_string(),
            videos: vec![recycle_video(object_name)],
            links: Vec::new(),
        }
    }

    /// Normalise a service record for `object_name`
    pub fn from_record(object_name: &str, record: EcoInfoRecord) -> Self {
        // Entries without a usable link are skipped
        let mut videos: Vec<Video> = record
            .videos
            .into_iter()
            .enumerate()
            .filter_map(|(i, entry)| match entry {
                VideoEntry::Link(link) if !link.trim().is_empty() => Some(Video {
                    title: format!("How to recycle {object_name}"),
                    link,
                }),
                VideoEntry::Titled(video) if !video.link.trim().is_empty() => Some(Video {
                    title: if video.title.trim().is_empty() {
                        format!("Video {}", i + 1)
                    } else {
                        video.title
                    },
                    link: video.link,
                }),
                _ => None,
            })
            .collect();
        if videos.is_empty() {
            videos.push(recycle_video(object_name));
        }

        let links = record
            .links
            .iter()
            .map(|link| text(link, ""))
            .filter(|link| !link.is_empty())
            .collect();

        Self {
            recyclable: text(&record.recyclable, UNKNOWN),
            carbon: text(&record.carbon, UNKNOWN),
            alternative: text(&record.alternative, UNKNOWN),
            summary: text(&record.summary, NO_DATA),
            videos,
            links,
        }
    }

    /// Whether the alternative can be opened in the 3D viewer
    pub fn has_viewable_alternative(&self) -> bool {
        !self.alternative.is_empty() && self.alternative != UNKNOWN
    }
}

/// A picked object together with what the service knows about it
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedObject {
    pub name: String,
    pub info: EcoInfo,
}

/// Infallible front end over an [`EcoInfoService`]
#[derive(Clone)]
pub struct EcoInfoClient {
    service: Arc<dyn EcoInfoService>,
}

impl EcoInfoClient {
    pub fn new(service: Arc<dyn EcoInfoService>) -> Self {
        Self { service }
    }

    /// Look up `object_name`, falling back to placeholder data on any error
    pub async fn lookup(&self, object_name: &str) -> EcoInfo {
        match self.service.fetch(object_name).await {
            Ok(record) => {
                let info = EcoInfo::from_record(object_name, record);
                debug!("Eco info for {}: alternative {}", object_name, info.alternative);
                info
            }
            Err(e) => {
                warn!("Eco info lookup for {} failed: {}", object_name, e);
                EcoInfo::fallback(object_name)
            }
        }
    }

    /// Resolve a selection from the detected-items list
    pub async fn select(&self, event: &SelectionEvent) -> SelectedObject {
        SelectedObject {
            name: event.class_label.clone(),
            info: self.lookup(&event.class_label).await,
        }
    }
}
