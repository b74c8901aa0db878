//! One engine, one scene, one camera, one light and at most one model

use glam::Vec3;
use tracing::debug;

use super::engine::{MeshId, OrbitCamera, RenderEngine, Transform};
use super::loader::ModelData;
use super::SceneError;
use crate::ar::Pose;

/// Exclusive owner of a viewer's engine
pub struct SceneHandle {
    engine: Box<dyn RenderEngine>,
    mesh: Option<(MeshId, Transform)>,
    orbit: bool,
}

impl SceneHandle {
    /// Create the scene, the orbit camera when `orbit` is given, and the light
    pub fn construct(mut engine: Box<dyn RenderEngine>, orbit: Option<OrbitCamera>) -> Result<Self, SceneError> {
        engine.create_scene()?;
        if let Some(camera) = orbit {
            engine.attach_orbit_camera(camera);
        }
        engine.add_hemispheric_light(Vec3::Y);

        Ok(Self {
            engine,
            mesh: None,
            orbit: orbit.is_some(),
        })
    }

    /// Insert `model` at the origin with a uniform `scale`
    pub fn attach_model(&mut self, model: &ModelData, scale: f32) -> Result<MeshId, SceneError> {
        if self.mesh.is_some() {
            return Err(SceneError::Engine("scene already holds a model".to_string()));
        }
        let mesh = self.engine.add_model(model)?;
        let transform = Transform::normalized(scale);
        self.engine.set_transform(mesh, transform);
        self.mesh = Some((mesh, transform));
        debug!("Model {} attached as mesh {}", model.url, mesh.0);
        Ok(mesh)
    }

    pub fn mesh(&self) -> Option<MeshId> {
        self.mesh.map(|(id, _)| id)
    }

    pub fn mesh_transform(&self) -> Option<Transform> {
        self.mesh.map(|(_, transform)| transform)
    }

    /// Move the model to `pose`, keeping its scale
    pub fn place(&mut self, pose: &Pose) -> Result<(), SceneError> {
        let (mesh, transform) = self
            .mesh
            .as_mut()
            .ok_or_else(|| SceneError::Engine("no model to place".to_string()))?;
        transform.translation = pose.position;
        transform.rotation = pose.orientation;
        self.engine.set_transform(*mesh, *transform);
        Ok(())
    }

    pub fn has_orbit_camera(&self) -> bool {
        self.orbit
    }

    /// Recreate the user-driven orbit camera
    pub fn use_orbit_camera(&mut self, camera: OrbitCamera) {
        if self.orbit {
            self.engine.detach_camera();
        }
        self.engine.attach_orbit_camera(camera);
        self.orbit = true;
    }

    /// Hand the view over to an immersive session
    pub fn detach_camera(&mut self) {
        if self.orbit {
            self.engine.detach_camera();
            self.orbit = false;
        }
    }

    pub fn render(&mut self) {
        self.engine.render();
    }

    /// Stop rendering and dispose the engine
    pub fn release(mut self) {
        self.engine.stop_render_loop();
        self.engine.dispose();
    }
}
