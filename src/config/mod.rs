//! Application Configuration
//!
//! Service endpoints, loop cadences, overlay styling and the asset table,
//! stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::scene::assets::AssetCatalog;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Detection service settings
    pub detection: DetectionSettings,
    /// Eco-info service settings
    pub eco: EcoSettings,
    /// Overlay drawing settings
    pub overlay: OverlaySettings,
    /// 3D viewer settings
    pub viewer: ViewerSettings,
    /// Alternative name to 3D asset table
    pub assets: AssetCatalog,
}

/// Detection service and timer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Base URL of the detection service (`POST {url}/detect`)
    pub service_url: String,
    /// Detection timer period in milliseconds
    pub interval_ms: u64,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// JPEG quality used when encoding captured frames (1 - 100)
    pub jpeg_quality: u8,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:8000".to_string(),
            interval_ms: 1000,
            request_timeout_ms: 10_000,
            jpeg_quality: 85,
        }
    }
}

impl DetectionSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Eco-info service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EcoSettings {
    /// Base URL of the eco-info service (`POST {url}/eco-info`)
    pub service_url: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for EcoSettings {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:8000".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl EcoSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Overlay drawing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Animation frame period in milliseconds
    pub frame_interval_ms: u64,
    /// Bounding box stroke color (RGBA)
    pub stroke_color: [u8; 4],
    /// Bounding box stroke width in pixels
    pub line_width: u32,
    /// Label text color (RGBA)
    pub label_color: [u8; 4],
    /// Radius of the marker core
    pub marker_base_radius: f32,
    /// Gap between the marker core and its ring
    pub marker_ring_gap: f32,
    /// Largest extra radius reached by the pulsing halo
    pub pulse_max: f32,
    /// Halo growth per animation frame
    pub pulse_step: f32,
    /// Distance of the marker above the box top edge
    pub marker_offset: f32,
    /// Smallest y the marker center may take
    pub marker_min_y: f32,
    /// Smallest y a label may take
    pub label_min_y: f32,
    /// Distance of the label above the box top edge
    pub label_offset: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            stroke_color: [0, 255, 0, 255],
            line_width: 2,
            label_color: [0, 0, 0, 255],
            marker_base_radius: 6.0,
            marker_ring_gap: 2.0,
            pulse_max: 3.0,
            pulse_step: 0.1,
            marker_offset: 10.0,
            marker_min_y: 10.0,
            label_min_y: 10.0,
            label_offset: 5.0,
        }
    }
}

impl OverlaySettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

/// 3D viewer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    /// Delay between unmount and engine release in milliseconds
    pub grace_period_ms: u64,
    /// Render loop period in milliseconds
    pub frame_interval_ms: u64,
    /// Uniform scale applied to every loaded model
    pub model_scale: f32,
    /// Timeout for each asset existence probe in milliseconds
    pub probe_timeout_ms: u64,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: 1000,
            frame_interval_ms: 16,
            model_scale: 0.1,
            probe_timeout_ms: 10_000,
        }
    }
}

impl ViewerSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.detection.service_url, "http://localhost:8000");
        assert_eq!(config.detection.interval_ms, 1000);
        assert_eq!(config.detection.jpeg_quality, 85);

        assert_eq!(config.overlay.stroke_color, [0, 255, 0, 255]);
        assert_eq!(config.overlay.line_width, 2);
        assert!((config.overlay.pulse_max - 3.0).abs() < f32::EPSILON);
        assert!((config.overlay.pulse_step - 0.1).abs() < f32::EPSILON);

        assert_eq!(config.viewer.grace_period_ms, 1000);
        assert!((config.viewer.model_scale - 0.1).abs() < f32::EPSILON);

        assert!(config.assets.entries.contains_key("Glass or metal version"));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.detection.interval_ms, parsed.detection.interval_ms);
        assert_eq!(config.eco.service_url, parsed.eco.service_url);
        assert_eq!(config.viewer.grace_period_ms, parsed.viewer.grace_period_ms);
        assert_eq!(config.assets.default, parsed.assets.default);
        assert_eq!(config.assets.entries, parsed.assets.entries);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [detection]
            service_url = "http://detector:9000"
            interval_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(parsed.detection.service_url, "http://detector:9000");
        assert_eq!(parsed.detection.interval_ms, 500);
        assert_eq!(parsed.detection.jpeg_quality, 85);
        assert_eq!(parsed.viewer.grace_period_ms, 1000);
        assert!(!parsed.assets.default.primary_url.is_empty());
    }

    #[test]
    fn test_custom_asset_table() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [assets.default]
            primary_url = "models/default.gltf"
            fallback_url = "models/default.gltf"

            [assets.entries."Bamboo toothbrush"]
            primary_url = "models/bamboo/scene.gltf"
            dependency_urls = ["models/bamboo/scene.gltf", "models/bamboo/scene.bin"]
            fallback_url = "models/default.gltf"
            "#,
        )
        .unwrap();

        let bamboo = parsed.assets.resolve("Bamboo toothbrush");
        assert_eq!(bamboo.dependency_urls.len(), 2);
        assert_eq!(parsed.assets.resolve("Paper straw"), &parsed.assets.default);
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.detection.interval_ms = 250;

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.detection.interval_ms, 250);
        assert_eq!(loaded.viewer.grace_period_ms, config.viewer.grace_period_ms);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
