//! AR Placement
//!
//! Immersive session state, first-hit-wins anchoring and the XR runtime seam.
//! The session task in `scene` drives a [`PlacementController`]; runtimes
//! deliver hit-test results as a stream of frames.

use anyhow::{Context, Result};
use async_trait::async_trait;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Notice shown when no immersive session can be started
pub const UNSUPPORTED_NOTICE: &str = "AR mode not supported on this device. Using 3D view.";

/// Immersive session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArSessionState {
    #[default]
    Inactive,
    Requesting,
    Active,
    Unsupported,
}

/// Whether the model has been anchored yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementState {
    Searching,
    Placed,
}

/// Position and orientation in session space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    #[serde(default = "identity")]
    pub orientation: Quat,
}

fn identity() -> Quat {
    Quat::IDENTITY
}

/// One surface hit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitResult {
    pub pose: Pose,
}

/// Errors raised by XR runtimes
#[derive(Debug, Error)]
pub enum XrError {
    #[error("immersive AR is not supported")]
    Unsupported,
    #[error("immersive session request denied: {0}")]
    Denied(String),
    #[error("hit testing unavailable: {0}")]
    HitTest(String),
}

/// Session and placement bookkeeping for one viewer
#[derive(Debug, Default)]
pub struct PlacementController {
    session: ArSessionState,
    placement: Option<PlacementState>,
    placed_at: Option<Pose>,
}

impl PlacementController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_state(&self) -> ArSessionState {
        self.session
    }

    /// Only meaningful while the session is active
    pub fn placement_state(&self) -> Option<PlacementState> {
        self.placement
    }

    pub fn placed_at(&self) -> Option<Pose> {
        self.placed_at
    }

    /// A new request is allowed when no session is running or pending
    pub fn can_request(&self) -> bool {
        matches!(self.session, ArSessionState::Inactive | ArSessionState::Unsupported)
    }

    pub fn begin_request(&mut self) -> bool {
        if !self.can_request() {
            return false;
        }
        self.session = ArSessionState::Requesting;
        true
    }

    pub fn session_started(&mut self) {
        self.session = ArSessionState::Active;
        self.placement = Some(PlacementState::Searching);
        self.placed_at = None;
    }

    pub fn session_unavailable(&mut self) {
        self.session = ArSessionState::Unsupported;
        self.placement = None;
    }

    /// Feed one hit-test callback.
    ///
    /// Returns the pose to anchor to on the first non-empty result while
    /// searching with a mesh loaded. Everything after that is ignored.
    pub fn on_hit_test(&mut self, hits: &[HitResult], mesh_loaded: bool) -> Option<Pose> {
        if self.session != ArSessionState::Active || self.placement != Some(PlacementState::Searching) {
            return None;
        }
        if !mesh_loaded {
            return None;
        }
        let pose = hits.first()?.pose;
        self.placement = Some(PlacementState::Placed);
        self.placed_at = Some(pose);
        Some(pose)
    }

    pub fn end(&mut self) {
        self.session = ArSessionState::Inactive;
        self.placement = None;
    }
}

/// A running immersive session
pub trait XrSession: Send {
    /// Start hit testing against the environment. Each message is one
    /// callback's result set.
    fn enable_hit_test(&mut self) -> Result<mpsc::UnboundedReceiver<Vec<HitResult>>, XrError>;
    fn end(&mut self);
}

/// Starts immersive sessions
#[async_trait]
pub trait XrRuntime: Send + Sync {
    async fn request_session(&self) -> Result<Box<dyn XrSession>, XrError>;
}

/// Runtime for hosts without AR
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedXr;

#[async_trait]
impl XrRuntime for UnsupportedXr {
    async fn request_session(&self) -> Result<Box<dyn XrSession>, XrError> {
        Err(XrError::Unsupported)
    }
}

/// Runtime that replays recorded hit-test frames
#[derive(Debug, Clone)]
pub struct ReplayXr {
    frames: Vec<Vec<HitResult>>,
    interval: Duration,
}

impl ReplayXr {
    pub fn new(frames: Vec<Vec<HitResult>>, interval: Duration) -> Self {
        Self { frames, interval }
    }

    /// Load frames from a JSON array of hit-result arrays
    pub fn from_file(path: &Path, interval: Duration) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read hit-test file: {:?}", path))?;
        let frames: Vec<Vec<HitResult>> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse hit-test file: {:?}", path))?;
        info!("Loaded {} hit-test frames from {:?}", frames.len(), path);
        Ok(Self::new(frames, interval))
    }

    pub fn frames(&self) -> &[Vec<HitResult>] {
        &self.frames
    }
}

#[async_trait]
impl XrRuntime for ReplayXr {
    async fn request_session(&self) -> Result<Box<dyn XrSession>, XrError> {
        Ok(Box::new(ReplaySession {
            frames: Some(self.frames.clone()),
            interval: self.interval,
            feeder: None,
        }))
    }
}

struct ReplaySession {
    frames: Option<Vec<Vec<HitResult>>>,
    interval: Duration,
    feeder: Option<JoinHandle<()>>,
}

impl XrSession for ReplaySession {
    fn enable_hit_test(&mut self) -> Result<mpsc::UnboundedReceiver<Vec<HitResult>>, XrError> {
        let frames = self
            .frames
            .take()
            .ok_or_else(|| XrError::HitTest("hit testing already enabled".to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let interval = self.interval;

        self.feeder = Some(tokio::spawn(async move {
            for frame in frames {
                tokio::time::sleep(interval).await;
                if tx.send(frame).is_err() {
                    break;
                }
            }
        }));
        Ok(rx)
    }

    fn end(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
            debug!("Replay session ended");
        }
    }
}

impl Drop for ReplaySession {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(x: f32) -> HitResult {
        HitResult {
            pose: Pose {
                position: Vec3::new(x, 0.0, -1.0),
                orientation: Quat::IDENTITY,
            },
        }
    }

    fn active() -> PlacementController {
        let mut controller = PlacementController::new();
        assert!(controller.begin_request());
        controller.session_started();
        controller
    }

    #[test]
    fn test_first_hit_wins() {
        let mut controller = active();
        let (hit_a, hit_b) = (hit(1.0), hit(2.0));

        let placed: Vec<Option<Pose>> = [vec![], vec![hit_a], vec![hit_b]]
            .iter()
            .map(|hits| controller.on_hit_test(hits, true))
            .collect();

        assert_eq!(placed, vec![None, Some(hit_a.pose), None]);
        assert_eq!(controller.placement_state(), Some(PlacementState::Placed));
        assert_eq!(controller.placed_at(), Some(hit_a.pose));
    }

    #[test]
    fn test_no_placement_without_mesh() {
        let mut controller = active();
        assert_eq!(controller.on_hit_test(&[hit(1.0)], false), None);
        assert_eq!(controller.placement_state(), Some(PlacementState::Searching));
        assert_eq!(controller.on_hit_test(&[hit(2.0)], true), Some(hit(2.0).pose));
    }

    #[test]
    fn test_hits_ignored_unless_active() {
        let mut controller = PlacementController::new();
        assert_eq!(controller.on_hit_test(&[hit(1.0)], true), None);
        controller.begin_request();
        assert_eq!(controller.on_hit_test(&[hit(1.0)], true), None);
        assert!(!controller.begin_request());
    }

    #[test]
    fn test_unsupported_allows_retry() {
        let mut controller = PlacementController::new();
        controller.begin_request();
        controller.session_unavailable();
        assert_eq!(controller.session_state(), ArSessionState::Unsupported);
        assert_eq!(controller.placement_state(), None);
        assert!(controller.can_request());
    }

    #[test]
    fn test_pose_json_defaults_orientation() {
        let frames: Vec<Vec<HitResult>> =
            serde_json::from_str(r#"[[], [{"pose": {"position": [0.0, 0.5, -1.0]}}]]"#).unwrap();
        assert!(frames[0].is_empty());
        assert_eq!(frames[1][0].pose.orientation, Quat::IDENTITY);
        assert_eq!(frames[1][0].pose.position, Vec3::new(0.0, 0.5, -1.0));
    }

    #[tokio::test]
    async fn test_unsupported_runtime() {
        assert!(matches!(
            UnsupportedXr.request_session().await,
            Err(XrError::Unsupported)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_delivers_frames_in_order() {
        let xr = ReplayXr::new(vec![vec![], vec![hit(1.0)]], Duration::from_millis(50));
        let mut session = xr.request_session().await.unwrap();
        let mut rx = session.enable_hit_test().unwrap();

        assert_eq!(rx.recv().await, Some(vec![]));
        assert_eq!(rx.recv().await, Some(vec![hit(1.0)]));
        assert_eq!(rx.recv().await, None);
        assert!(session.enable_hit_test().is_err());
        session.end();
    }

    #[test]
    fn test_replay_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.json");
        std::fs::write(&path, r#"[[], [{"pose": {"position": [1.0, 0.0, 0.0]}}]]"#).unwrap();

        let xr = ReplayXr::from_file(&path, Duration::from_millis(16)).unwrap();
        assert_eq!(xr.frames().len(), 2);
        assert!(ReplayXr::from_file(&dir.path().join("missing.json"), Duration::ZERO).is_err());
    }
}
