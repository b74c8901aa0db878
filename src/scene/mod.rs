//! Scene Lifecycle Layer
//!
//! Owns one rendering engine per viewer invocation: resolves the asset for the
//! selected alternative, verifies its dependencies, loads it with a single
//! fallback retry and tears the engine down in two phases (mark unmounted,
//! then release after a grace period).
//!
//! The host talks to a running viewer through [`ViewerHandle`]: commands go
//! in, [`ViewerEvent`]s come out.

pub mod assets;
#[cfg(feature = "bevy-viewer")]
pub mod bevy_engine;
pub mod engine;
pub mod handle;
pub mod lifecycle;
pub mod loader;
pub mod manager;
mod session;

use thiserror::Error;

use crate::ar::{ArSessionState, PlacementState, Pose};

pub use assets::{AssetCatalog, AssetDescriptor, AssetProbe, LocationProbe};
#[cfg(feature = "bevy-viewer")]
pub use bevy_engine::{run_window, viewer_channel, BevyEngine, BevyEngineFactory, SceneCommand, ViewerScenePlugin};
pub use engine::{EngineCall, EngineFactory, EngineJournal, HeadlessEngine, HeadlessEngineFactory, MeshId, OrbitCamera, RenderEngine, Transform};
pub use handle::SceneHandle;
pub use lifecycle::{LoadTarget, SceneState};
pub use loader::{GltfImporter, ModelData, ModelImporter};
pub use manager::{SceneLifecycleManager, ViewerHandle, ViewerServices};

/// Errors raised by the scene layer
#[derive(Debug, Clone, Error)]
pub enum SceneError {
    #[error("asset {url} is not reachable: {reason}")]
    Probe { url: String, reason: String },
    #[error("failed to import model {url}: {reason}")]
    Import { url: String, reason: String },
    #[error("rendering engine error: {0}")]
    Engine(String),
}

/// Severity of a user-visible notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    /// Nothing else will be attempted for this viewer
    Fatal,
}

/// A message the host should surface to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Fatal,
            message: message.into(),
        }
    }
}

/// Commands sent from the host to a running viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerCommand {
    /// The user closed the viewer
    Close,
    /// The user asked to place the model in AR
    EnterAr,
}

/// Events sent from a running viewer to the host
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    /// Lifecycle state changed
    StateChanged(SceneState),
    /// Something the user should see
    Notice(Notice),
    /// A model is in the scene
    ModelReady { url: String, meshes: usize },
    /// Immersive session state changed
    ArStateChanged(ArSessionState),
    /// The model was anchored to a surface
    Placed { pose: Pose, state: PlacementState },
}
