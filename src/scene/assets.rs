//! Asset table and existence probes

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::SceneError;

/// Model shown when an alternative has no dedicated entry
const DEFAULT_MODEL_URL: &str =
    "https://raw.githubusercontent.com/KhronosGroup/glTF-Sample-Models/main/2.0/WaterBottle/glTF/WaterBottle.gltf";
const GLASS_BOTTLE_DIR: &str = "./assets/models/glass-bottle";

/// URLs needed to show one alternative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Model document to import
    pub primary_url: String,
    /// Files that must all exist before the primary is attempted
    #[serde(default)]
    pub dependency_urls: Vec<String>,
    /// Model imported when verification or the primary load fails
    pub fallback_url: String,
}

impl AssetDescriptor {
    /// URL imported for `target`
    pub fn url_for(&self, target: super::LoadTarget) -> &str {
        match target {
            super::LoadTarget::Primary => &self.primary_url,
            super::LoadTarget::Fallback => &self.fallback_url,
        }
    }
}

/// Alternative display name -> descriptor, with a mandatory default
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetCatalog {
    /// Used whenever no entry matches exactly
    pub default: AssetDescriptor,
    /// Exact-name entries
    #[serde(default)]
    pub entries: BTreeMap<String, AssetDescriptor>,
}

impl Default for AssetCatalog {
    fn default() -> Self {
        let default = AssetDescriptor {
            primary_url: DEFAULT_MODEL_URL.to_string(),
            dependency_urls: vec![DEFAULT_MODEL_URL.to_string()],
            fallback_url: DEFAULT_MODEL_URL.to_string(),
        };

        let glass_primary = format!("{GLASS_BOTTLE_DIR}/scene.gltf");
        let glass = AssetDescriptor {
            dependency_urls: vec![
                glass_primary.clone(),
                format!("{GLASS_BOTTLE_DIR}/scene.bin"),
                format!("{GLASS_BOTTLE_DIR}/textures/Material.001_baseColor.png"),
            ],
            primary_url: glass_primary,
            fallback_url: DEFAULT_MODEL_URL.to_string(),
        };

        let mut entries = BTreeMap::new();
        entries.insert("Glass or metal version".to_string(), glass);

        Self { default, entries }
    }
}

impl AssetCatalog {
    /// Exact match on the alternative name, else the default entry
    pub fn resolve(&self, alternative: &str) -> &AssetDescriptor {
        self.entries.get(alternative).unwrap_or(&self.default)
    }
}

/// True for `http://` and `https://` locations
pub(crate) fn is_remote(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Checks that an asset location can be fetched
#[async_trait]
pub trait AssetProbe: Send + Sync {
    async fn check(&self, url: &str) -> Result<(), SceneError>;
}

/// Probe for HTTP(S) URLs and local filesystem paths
pub struct LocationProbe {
    client: reqwest::Client,
}

impl LocationProbe {
    pub fn new(timeout: Duration) -> Result<Self, SceneError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SceneError::Engine(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetProbe for LocationProbe {
    async fn check(&self, url: &str) -> Result<(), SceneError> {
        let probe_error = |reason: String| SceneError::Probe {
            url: url.to_string(),
            reason,
        };

        if is_remote(url) {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| probe_error(e.to_string()))?;
            debug!("Probe {} -> {}", url, response.status());
            if !response.status().is_success() {
                return Err(probe_error(format!("HTTP {}", response.status().as_u16())));
            }
            Ok(())
        } else {
            let metadata = tokio::fs::metadata(Path::new(url))
                .await
                .map_err(|e| probe_error(e.to_string()))?;
            if !metadata.is_file() {
                return Err(probe_error("not a regular file".to_string()));
            }
            debug!("Probe {} -> present ({} bytes)", url, metadata.len());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_alternative_resolves_to_default() {
        let catalog = AssetCatalog::default();
        assert_eq!(catalog.resolve("Bamboo toothbrush"), &catalog.default);
        assert_eq!(catalog.resolve(""), &catalog.default);
        // Exact match only
        assert_eq!(catalog.resolve("glass or metal version"), &catalog.default);
    }

    #[test]
    fn test_glass_entry_checks_bin_and_texture() {
        let catalog = AssetCatalog::default();
        let glass = catalog.resolve("Glass or metal version");
        assert_eq!(glass.dependency_urls.len(), 3);
        assert!(glass.dependency_urls[1].ends_with("scene.bin"));
        assert_eq!(glass.fallback_url, catalog.default.primary_url);
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://example.org/a.gltf"));
        assert!(is_remote("HTTP://example.org/a.gltf"));
        assert!(!is_remote("./assets/models/a.gltf"));
    }

    #[tokio::test]
    async fn test_local_probe() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("scene.bin");
        std::fs::write(&present, [0u8; 4]).unwrap();

        let probe = LocationProbe::new(Duration::from_secs(1)).unwrap();
        assert!(probe.check(present.to_str().unwrap()).await.is_ok());

        let missing = dir.path().join("missing.png");
        let err = probe.check(missing.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, SceneError::Probe { .. }));

        assert!(probe.check(dir.path().to_str().unwrap()).await.is_err());
    }
}
