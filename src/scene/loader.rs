//! Model import
//!
//! Fetches a glTF 2.0 model (JSON `.gltf` or binary `.glb`) from a URL or a
//! local path, validates it and makes sure every external buffer and image it
//! references is on disk next to it. Remote models are mirrored into a cache
//! directory first. The result is plain data; inserting it into a scene is
//! left to the lifecycle so nothing touches the engine while the fetch is
//! outstanding.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::assets::is_remote;
use super::SceneError;

/// A fetched and validated model, ready for an engine to load from disk
#[derive(Debug, Clone, PartialEq)]
pub struct ModelData {
    /// Location the model was requested from
    pub url: String,
    /// Local copy of the model document
    pub path: PathBuf,
    /// glTF `asset.version`
    pub version: String,
    /// Number of meshes the document declares
    pub mesh_count: usize,
    /// Size of the model document
    pub byte_len: usize,
    /// External buffers and images, resolved next to `path`
    pub resources: Vec<PathBuf>,
}

/// Imports model documents
#[async_trait]
pub trait ModelImporter: Send + Sync {
    async fn import(&self, url: &str) -> Result<ModelData, SceneError>;
}

#[derive(Debug, Deserialize)]
struct GltfAsset {
    version: String,
}

#[derive(Debug, Default, Deserialize)]
struct GltfResource {
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GltfDocument {
    asset: GltfAsset,
    #[serde(default)]
    meshes: Vec<serde_json::Value>,
    #[serde(default)]
    buffers: Vec<GltfResource>,
    #[serde(default)]
    images: Vec<GltfResource>,
}

/// What a model document says about itself
#[derive(Debug, Clone, PartialEq)]
pub struct ModelHeader {
    pub version: String,
    pub mesh_count: usize,
    /// Relative URIs of external buffers and images, in document order
    pub external_uris: Vec<String>,
}

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_JSON_CHUNK: u32 = 0x4E4F_534A;

/// Extract the JSON chunk of a binary glTF container
fn glb_json_chunk(bytes: &[u8]) -> Result<&[u8], String> {
    let read_u32 = |offset: usize| -> Result<u32, String> {
        bytes
            .get(offset..offset + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| "truncated GLB header".to_string())
    };

    let chunk_len = read_u32(12)? as usize;
    if read_u32(16)? != GLB_JSON_CHUNK {
        return Err("first GLB chunk is not JSON".to_string());
    }
    bytes
        .get(20..20 + chunk_len)
        .ok_or_else(|| "truncated GLB JSON chunk".to_string())
}

/// Validate a model document and list what it needs
pub fn parse_model(url: &str, bytes: &[u8]) -> Result<ModelHeader, SceneError> {
    let import_error = |reason: String| SceneError::Import {
        url: url.to_string(),
        reason,
    };

    let json = if bytes.starts_with(GLB_MAGIC) {
        glb_json_chunk(bytes).map_err(import_error)?
    } else {
        bytes
    };

    let document: GltfDocument = serde_json::from_slice(json)
        .map_err(|e| import_error(format!("not a glTF document: {e}")))?;

    if !document.asset.version.starts_with('2') {
        return Err(import_error(format!(
            "unsupported glTF version {}",
            document.asset.version
        )));
    }
    if document.meshes.is_empty() {
        return Err(import_error("document declares no meshes".to_string()));
    }

    // GLB-embedded buffers have no uri; data URIs carry their own bytes
    let mut external_uris: Vec<String> = Vec::new();
    for uri in document
        .buffers
        .into_iter()
        .chain(document.images)
        .filter_map(|resource| resource.uri)
        .filter(|uri| !uri.starts_with("data:"))
    {
        if !external_uris.contains(&uri) {
            external_uris.push(uri);
        }
    }

    Ok(ModelHeader {
        version: document.asset.version,
        mesh_count: document.meshes.len(),
        external_uris,
    })
}

/// Resolve `uri` against `base`, refusing anything outside the base directory
fn resolve_resource(base: &Url, uri: &str) -> Result<Url, String> {
    let resolved = base
        .join(uri)
        .map_err(|e| format!("bad resource uri {uri}: {e}"))?;
    let relative = base.make_relative(&resolved).unwrap_or_default();
    if resolved.scheme() != base.scheme() || relative.is_empty() || relative.starts_with("../") {
        return Err(format!("resource {uri} is outside the model directory"));
    }
    Ok(resolved)
}

/// Imports glTF models over HTTP(S) or from disk
pub struct GltfImporter {
    client: reqwest::Client,
    cache_dir: PathBuf,
}

impl GltfImporter {
    /// Remote models are mirrored under `cache_dir`
    pub fn new(timeout: Duration, cache_dir: impl Into<PathBuf>) -> Result<Self, SceneError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SceneError::Engine(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            cache_dir: cache_dir.into(),
        })
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("{} returned HTTP {}", url, response.status().as_u16()));
        }
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(bytes.to_vec())
    }

    async fn write(path: &Path, bytes: &[u8]) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("{}: {e}", parent.display()))?;
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| format!("{}: {e}", path.display()))
    }

    /// Download the document and its resources into the cache
    async fn import_remote(&self, url: &str) -> Result<ModelData, String> {
        let base = Url::parse(url).map_err(|e| e.to_string())?;
        let bytes = self.download(&base).await?;
        let header = parse_model(url, &bytes).map_err(|e| e.to_string())?;

        let mirror = self.cache_dir.join(Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()).to_string());
        let mirror_base = Url::from_directory_path(&mirror)
            .map_err(|_| format!("cache directory {} is not absolute", mirror.display()))?;
        let local = |remote: &Url| -> Result<PathBuf, String> {
            let relative = base.make_relative(remote).unwrap_or_default();
            mirror_base
                .join(&relative)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| format!("cannot mirror {remote}"))
        };

        let file_name = base
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .unwrap_or("model.gltf");
        let path = mirror_base
            .join(file_name)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .ok_or_else(|| format!("cannot mirror {base}"))?;
        Self::write(&path, &bytes).await?;

        let mut resources = Vec::with_capacity(header.external_uris.len());
        for uri in &header.external_uris {
            let remote = resolve_resource(&base, uri)?;
            let target = local(&remote)?;
            let data = self.download(&remote).await?;
            Self::write(&target, &data).await?;
            resources.push(target);
        }

        Ok(ModelData {
            url: url.to_string(),
            path,
            version: header.version,
            mesh_count: header.mesh_count,
            byte_len: bytes.len(),
            resources,
        })
    }

    /// Read the document and check its resources are present
    async fn import_local(&self, url: &str) -> Result<ModelData, String> {
        let path = std::path::absolute(url).map_err(|e| e.to_string())?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| e.to_string())?;
        let header = parse_model(url, &bytes).map_err(|e| e.to_string())?;

        let base = Url::from_file_path(&path).map_err(|_| format!("bad model path {}", path.display()))?;
        let mut resources = Vec::with_capacity(header.external_uris.len());
        for uri in &header.external_uris {
            let resource = resolve_resource(&base, uri)?
                .to_file_path()
                .map_err(|_| format!("bad resource uri {uri}"))?;
            let metadata = tokio::fs::metadata(&resource)
                .await
                .map_err(|e| format!("{}: {e}", resource.display()))?;
            if !metadata.is_file() {
                return Err(format!("{} is not a regular file", resource.display()));
            }
            resources.push(resource);
        }

        Ok(ModelData {
            url: url.to_string(),
            path,
            version: header.version,
            mesh_count: header.mesh_count,
            byte_len: bytes.len(),
            resources,
        })
    }
}

#[async_trait]
impl ModelImporter for GltfImporter {
    async fn import(&self, url: &str) -> Result<ModelData, SceneError> {
        let imported = if is_remote(url) {
            self.import_remote(url).await
        } else {
            self.import_local(url).await
        };
        let model = imported.map_err(|reason| SceneError::Import {
            url: url.to_string(),
            reason,
        })?;
        debug!(
            "Imported {} (glTF {}, {} meshes, {} resources) at {}",
            url,
            model.version,
            model.mesh_count,
            model.resources.len(),
            model.path.display()
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_GLTF: &str = r#"{"asset":{"version":"2.0"},"meshes":[{"primitives":[]}]}"#;
    const BOTTLE_GLTF: &str = r#"{
        "asset":{"version":"2.0"},
        "meshes":[{"primitives":[]}],
        "buffers":[{"uri":"scene.bin","byteLength":4},{"uri":"data:application/octet-stream;base64,AAAA","byteLength":3}],
        "images":[{"uri":"textures/Material.001_baseColor.png"},{"bufferView":0,"mimeType":"image/png"}]
    }"#;

    fn importer(cache: &Path) -> GltfImporter {
        GltfImporter::new(Duration::from_secs(1), cache).unwrap()
    }

    #[test]
    fn test_parse_gltf_json() {
        let header = parse_model("bottle.gltf", MINIMAL_GLTF.as_bytes()).unwrap();
        assert_eq!(header.version, "2.0");
        assert_eq!(header.mesh_count, 1);
        assert!(header.external_uris.is_empty());
    }

    #[test]
    fn test_parse_lists_external_resources() {
        let header = parse_model("bottle.gltf", BOTTLE_GLTF.as_bytes()).unwrap();
        assert_eq!(
            header.external_uris,
            vec!["scene.bin".to_string(), "textures/Material.001_baseColor.png".to_string()]
        );
    }

    #[test]
    fn test_parse_glb_container() {
        let json = MINIMAL_GLTF.as_bytes();
        let mut glb = Vec::new();
        glb.extend_from_slice(GLB_MAGIC);
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&((20 + json.len()) as u32).to_le_bytes());
        glb.extend_from_slice(&(json.len() as u32).to_le_bytes());
        glb.extend_from_slice(&GLB_JSON_CHUNK.to_le_bytes());
        glb.extend_from_slice(json);

        let header = parse_model("bottle.glb", &glb).unwrap();
        assert_eq!(header.mesh_count, 1);
    }

    #[test]
    fn test_rejects_bad_documents() {
        assert!(parse_model("a", b"<html>404</html>").is_err());
        assert!(parse_model("a", br#"{"asset":{"version":"1.0"},"meshes":[{}]}"#).is_err());
        assert!(parse_model("a", br#"{"asset":{"version":"2.0"}}"#).is_err());
        assert!(parse_model("a", b"glTF\x02\x00").is_err());
    }

    #[test]
    fn test_resources_stay_inside_model_directory() {
        let base = Url::parse("https://models.example/bottle/scene.gltf").unwrap();
        assert_eq!(
            resolve_resource(&base, "textures/a%20b.png").unwrap().as_str(),
            "https://models.example/bottle/textures/a%20b.png"
        );
        assert!(resolve_resource(&base, "../other/scene.bin").is_err());
        assert!(resolve_resource(&base, "https://elsewhere.example/scene.bin").is_err());
        assert!(resolve_resource(&base, "file:///etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_import_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.gltf");
        std::fs::write(&path, MINIMAL_GLTF).unwrap();

        let importer = importer(dir.path());
        let model = importer.import(path.to_str().unwrap()).await.unwrap();
        assert_eq!(model.byte_len, MINIMAL_GLTF.len());
        assert_eq!(model.path, path);

        let missing = dir.path().join("nope.gltf");
        assert!(importer.import(missing.to_str().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_import_needs_buffers_and_textures_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.gltf");
        std::fs::write(&path, BOTTLE_GLTF).unwrap();
        std::fs::write(dir.path().join("scene.bin"), [0u8; 4]).unwrap();

        let importer = importer(dir.path());
        let err = importer.import(path.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, SceneError::Import { .. }));
        assert!(err.to_string().contains("Material.001_baseColor.png"));

        std::fs::create_dir(dir.path().join("textures")).unwrap();
        std::fs::write(dir.path().join("textures/Material.001_baseColor.png"), [0u8; 8]).unwrap();
        let model = importer.import(path.to_str().unwrap()).await.unwrap();
        assert_eq!(
            model.resources,
            vec![
                dir.path().join("scene.bin"),
                dir.path().join("textures/Material.001_baseColor.png"),
            ]
        );
    }
}
