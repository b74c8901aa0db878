//! Rendering engine seam
//!
//! [`RenderEngine`] is the small surface the lifecycle needs from a 3D engine.
//! [`HeadlessEngine`] implements it without a GPU by recording every call into
//! a shared [`EngineJournal`], which is what the CLI and the tests inspect.

use glam::{Quat, Vec3};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::error;

use super::loader::ModelData;
use super::SceneError;

/// Identifies a mesh inside one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub u32);

/// Position, orientation and scale of a mesh
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    /// Origin, no rotation, uniform `scale`
    pub fn normalized(scale: f32) -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::splat(scale),
        }
    }
}

/// Arc-rotate camera parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbitCamera {
    /// Longitudinal rotation in radians
    pub alpha: f32,
    /// Latitudinal rotation in radians
    pub beta: f32,
    pub radius: f32,
    pub target: Vec3,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            alpha: FRAC_PI_2,
            beta: FRAC_PI_2,
            radius: 5.0,
            target: Vec3::ZERO,
        }
    }
}

impl OrbitCamera {
    /// World position of the eye, Y up
    pub fn position(&self) -> Vec3 {
        let (sin_a, cos_a) = self.alpha.sin_cos();
        let (sin_b, cos_b) = self.beta.sin_cos();
        self.target + self.radius * Vec3::new(cos_a * sin_b, cos_b, sin_a * sin_b)
    }
}

/// Operations the lifecycle performs on an engine
pub trait RenderEngine: Send {
    fn create_scene(&mut self) -> Result<(), SceneError>;
    fn add_hemispheric_light(&mut self, direction: Vec3);
    fn attach_orbit_camera(&mut self, camera: OrbitCamera);
    fn detach_camera(&mut self);
    fn add_model(&mut self, model: &ModelData) -> Result<MeshId, SceneError>;
    fn set_transform(&mut self, mesh: MeshId, transform: Transform);
    /// Draw one frame
    fn render(&mut self);
    fn stop_render_loop(&mut self);
    /// Release every engine resource. No call is valid afterwards.
    fn dispose(&mut self);
}

/// Creates one engine per viewer instance
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn RenderEngine>, SceneError>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn RenderEngine>, SceneError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn RenderEngine>, SceneError> {
        self()
    }
}

/// One recorded engine call
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    CreateScene,
    HemisphericLight(Vec3),
    AttachOrbitCamera(OrbitCamera),
    DetachCamera,
    AddModel { url: String, mesh: MeshId },
    SetTransform { mesh: MeshId, transform: Transform },
    /// Consecutive frames are folded into one entry
    Render { frames: u64 },
    StopRenderLoop,
    Dispose,
    /// A call that arrived after `Dispose`
    UseAfterDispose(&'static str),
}

/// Ordered record of calls across every headless engine
#[derive(Debug, Clone, Default)]
pub struct EngineJournal {
    entries: Arc<Mutex<Vec<(String, EngineCall)>>>,
}

impl EngineJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, engine: &str, call: EngineCall) {
        let mut entries = self.entries.lock();
        if let EngineCall::Render { frames: 1 } = call {
            if let Some((last_engine, EngineCall::Render { frames })) = entries.last_mut() {
                if last_engine == engine {
                    *frames += 1;
                    return;
                }
            }
        }
        entries.push((engine.to_string(), call));
    }

    /// Snapshot of every entry so far
    pub fn entries(&self) -> Vec<(String, EngineCall)> {
        self.entries.lock().clone()
    }

    /// Calls made on one engine
    pub fn calls_for(&self, engine: &str) -> Vec<EngineCall> {
        self.entries
            .lock()
            .iter()
            .filter(|(name, _)| name == engine)
            .map(|(_, call)| call.clone())
            .collect()
    }

    /// Position of the first entry matching `engine` and `predicate`
    pub fn position(&self, engine: &str, predicate: impl Fn(&EngineCall) -> bool) -> Option<usize> {
        self.entries
            .lock()
            .iter()
            .position(|(name, call)| name == engine && predicate(call))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Engine that draws nothing and journals everything
pub struct HeadlessEngine {
    name: String,
    journal: EngineJournal,
    next_mesh: u32,
    rendering: bool,
    disposed: bool,
}

impl HeadlessEngine {
    pub fn new(name: impl Into<String>, journal: EngineJournal) -> Self {
        Self {
            name: name.into(),
            journal,
            next_mesh: 0,
            rendering: true,
            disposed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record `call`, or flag it when the engine is already gone
    fn record(&self, op: &'static str, call: EngineCall) -> bool {
        if self.disposed {
            error!("Engine {} used after dispose: {}", self.name, op);
            self.journal.record(&self.name, EngineCall::UseAfterDispose(op));
            return false;
        }
        self.journal.record(&self.name, call);
        true
    }
}

impl RenderEngine for HeadlessEngine {
    fn create_scene(&mut self) -> Result<(), SceneError> {
        if !self.record("create_scene", EngineCall::CreateScene) {
            return Err(SceneError::Engine("engine disposed".to_string()));
        }
        Ok(())
    }

    fn add_hemispheric_light(&mut self, direction: Vec3) {
        self.record("add_hemispheric_light", EngineCall::HemisphericLight(direction));
    }

    fn attach_orbit_camera(&mut self, camera: OrbitCamera) {
        self.record("attach_orbit_camera", EngineCall::AttachOrbitCamera(camera));
    }

    fn detach_camera(&mut self) {
        self.record("detach_camera", EngineCall::DetachCamera);
    }

    fn add_model(&mut self, model: &ModelData) -> Result<MeshId, SceneError> {
        let mesh = MeshId(self.next_mesh);
        let call = EngineCall::AddModel {
            url: model.url.clone(),
            mesh,
        };
        if !self.record("add_model", call) {
            return Err(SceneError::Engine("engine disposed".to_string()));
        }
        self.next_mesh += 1;
        Ok(mesh)
    }

    fn set_transform(&mut self, mesh: MeshId, transform: Transform) {
        self.record("set_transform", EngineCall::SetTransform { mesh, transform });
    }

    fn render(&mut self) {
        if self.rendering || self.disposed {
            self.record("render", EngineCall::Render { frames: 1 });
        }
    }

    fn stop_render_loop(&mut self) {
        if self.record("stop_render_loop", EngineCall::StopRenderLoop) {
            self.rendering = false;
        }
    }

    fn dispose(&mut self) {
        if self.record("dispose", EngineCall::Dispose) {
            self.disposed = true;
        }
    }
}

/// Hands out [`HeadlessEngine`]s named `engine-1`, `engine-2`, ...
#[derive(Default)]
pub struct HeadlessEngineFactory {
    journal: EngineJournal,
    created: AtomicUsize,
}

impl HeadlessEngineFactory {
    pub fn new(journal: EngineJournal) -> Self {
        Self {
            journal,
            created: AtomicUsize::new(0),
        }
    }

    pub fn journal(&self) -> &EngineJournal {
        &self.journal
    }
}

impl EngineFactory for HeadlessEngineFactory {
    fn create(&self) -> Result<Box<dyn RenderEngine>, SceneError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(HeadlessEngine::new(format!("engine-{n}"), self.journal.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ModelData {
        ModelData {
            url: "bottle.gltf".to_string(),
            path: std::path::PathBuf::from("bottle.gltf"),
            version: "2.0".to_string(),
            mesh_count: 1,
            byte_len: 10,
            resources: Vec::new(),
        }
    }

    #[test]
    fn test_default_orbit_camera() {
        let camera = OrbitCamera::default();
        assert_eq!(camera.alpha, FRAC_PI_2);
        assert_eq!(camera.beta, FRAC_PI_2);
        assert_eq!(camera.radius, 5.0);
        assert_eq!(camera.target, Vec3::ZERO);
    }

    #[test]
    fn test_orbit_camera_position() {
        let camera = OrbitCamera::default();
        assert!(camera.position().abs_diff_eq(Vec3::new(0.0, 0.0, 5.0), 1e-5));

        let overhead = OrbitCamera {
            beta: 0.0,
            radius: 2.0,
            target: Vec3::new(1.0, 0.0, 0.0),
            ..OrbitCamera::default()
        };
        assert!(overhead.position().abs_diff_eq(Vec3::new(1.0, 2.0, 0.0), 1e-5));
    }

    #[test]
    fn test_render_frames_are_folded() {
        let journal = EngineJournal::new();
        let mut engine = HeadlessEngine::new("a", journal.clone());
        engine.render();
        engine.render();
        engine.render();
        engine.stop_render_loop();
        engine.render();

        assert_eq!(
            journal.calls_for("a"),
            vec![EngineCall::Render { frames: 3 }, EngineCall::StopRenderLoop]
        );
    }

    #[test]
    fn test_calls_after_dispose_are_flagged() {
        let journal = EngineJournal::new();
        let mut engine = HeadlessEngine::new("a", journal.clone());
        engine.dispose();

        assert!(engine.add_model(&model()).is_err());
        engine.render();

        let calls = journal.calls_for("a");
        assert_eq!(calls[0], EngineCall::Dispose);
        assert_eq!(calls[1], EngineCall::UseAfterDispose("add_model"));
        assert_eq!(calls[2], EngineCall::UseAfterDispose("render"));
    }

    #[test]
    fn test_factory_names_engines_in_order() {
        let factory = HeadlessEngineFactory::new(EngineJournal::new());
        let mut first = factory.create().unwrap();
        let mut second = factory.create().unwrap();
        first.create_scene().unwrap();
        second.create_scene().unwrap();

        let entries = factory.journal().entries();
        assert_eq!(entries[0].0, "engine-1");
        assert_eq!(entries[1].0, "engine-2");
    }

    #[test]
    fn test_closure_factory() {
        let journal = EngineJournal::new();
        let factory = move || -> Result<Box<dyn RenderEngine>, SceneError> {
            Ok(Box::new(HeadlessEngine::new("custom", journal.clone())))
        };
        assert!(factory.create().is_ok());
    }
}
