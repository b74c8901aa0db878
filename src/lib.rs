//! EcoLens - live object detection overlay and 3D/AR alternative viewer
//!
//! The core a host UI shell mounts: a capture + overlay surface driven by a
//! remote detection service, a detected-items list that fires selection
//! events, an eco-info lookup, and a 3D viewer with optional AR placement for
//! the suggested sustainable alternative.

pub mod app;
pub mod ar;
pub mod capture;
pub mod config;
pub mod detection;
pub mod eco;
pub mod live;
pub mod overlay;
pub mod scene;
pub mod selection;
pub mod storage;

pub use app::EcoLensApp;
pub use config::AppConfig;
