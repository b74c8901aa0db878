//! Windowed engine backed by bevy
//!
//! bevy owns the main thread, so viewer sessions never touch its world
//! directly. Each [`BevyEngine`] turns engine calls into [`SceneCommand`]s
//! tagged with its id and [`ViewerScenePlugin`] drains them once per frame:
//! the scene root, hemispheric light, orbit camera and glTF scene are real
//! entities, and the model document is loaded with all of its buffers and
//! textures by bevy's asset server.

use bevy::app::AppExit;
use bevy::asset::{AssetPlugin, UnapprovedPathMode};
use bevy::input::mouse::{MouseMotion, MouseWheel};
use bevy::input::ButtonInput;
use bevy::math::{Quat as WorldQuat, Vec3 as WorldVec3};
use bevy::prelude::{
    default, AmbientLight, App, AssetServer, Camera3d, ChildOf, ClearColor, Color, Commands, Component,
    DefaultPlugins, DirectionalLight, Entity, GltfAssetLabel, MessageReader, MessageWriter, MouseButton, Name,
    Plugin, PluginGroup, Query, Res, ResMut, Resource, SceneRoot, Transform as WorldTransform, Update, Vec2,
    Visibility, Window, WindowPlugin,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use glam::{Quat, Vec3};
use std::collections::HashMap;
use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, error, warn};

use super::engine::{EngineFactory, MeshId, OrbitCamera, RenderEngine, Transform};
use super::loader::ModelData;
use super::SceneError;

const ORBIT_SENSITIVITY: f32 = 0.01;
const ZOOM_SENSITIVITY: f32 = 0.4;
const MIN_RADIUS: f32 = 0.5;
const MAX_RADIUS: f32 = 100.0;
const MIN_BETA: f32 = 0.01;

/// One engine call on its way to the bevy world
#[derive(Debug, Clone, PartialEq)]
pub enum SceneCommand {
    CreateScene { engine: u32 },
    HemisphericLight { engine: u32, direction: Vec3 },
    AttachOrbitCamera { engine: u32, camera: OrbitCamera },
    DetachCamera { engine: u32 },
    AddModel { engine: u32, mesh: MeshId, path: PathBuf },
    SetTransform { engine: u32, mesh: MeshId, transform: Transform },
    StopRenderLoop { engine: u32 },
    Dispose { engine: u32 },
    /// Close the window
    Shutdown,
}

/// Engine whose scene lives in the bevy world
pub struct BevyEngine {
    id: u32,
    commands: Sender<SceneCommand>,
    next_mesh: u32,
    disposed: bool,
}

impl BevyEngine {
    fn send(&self, op: &'static str, command: SceneCommand) -> Result<(), SceneError> {
        if self.disposed {
            error!("Engine {} used after dispose: {}", self.id, op);
            return Err(SceneError::Engine(format!("{op} after dispose")));
        }
        self.commands
            .send(command)
            .map_err(|_| SceneError::Engine("viewer window is closed".to_string()))
    }

    /// Fire-and-forget variant for calls that cannot fail
    fn post(&self, op: &'static str, command: SceneCommand) {
        if let Err(e) = self.send(op, command) {
            warn!("Engine {} dropped {}: {}", self.id, op, e);
        }
    }
}

impl RenderEngine for BevyEngine {
    fn create_scene(&mut self) -> Result<(), SceneError> {
        self.send("create_scene", SceneCommand::CreateScene { engine: self.id })
    }

    fn add_hemispheric_light(&mut self, direction: Vec3) {
        self.post(
            "add_hemispheric_light",
            SceneCommand::HemisphericLight {
                engine: self.id,
                direction,
            },
        );
    }

    fn attach_orbit_camera(&mut self, camera: OrbitCamera) {
        self.post(
            "attach_orbit_camera",
            SceneCommand::AttachOrbitCamera {
                engine: self.id,
                camera,
            },
        );
    }

    fn detach_camera(&mut self) {
        self.post("detach_camera", SceneCommand::DetachCamera { engine: self.id });
    }

    fn add_model(&mut self, model: &ModelData) -> Result<MeshId, SceneError> {
        let mesh = MeshId(self.next_mesh);
        self.send(
            "add_model",
            SceneCommand::AddModel {
                engine: self.id,
                mesh,
                path: model.path.clone(),
            },
        )?;
        self.next_mesh += 1;
        Ok(mesh)
    }

    fn set_transform(&mut self, mesh: MeshId, transform: Transform) {
        self.post(
            "set_transform",
            SceneCommand::SetTransform {
                engine: self.id,
                mesh,
                transform,
            },
        );
    }

    // bevy presents every frame on its own
    fn render(&mut self) {}

    fn stop_render_loop(&mut self) {
        self.post("stop_render_loop", SceneCommand::StopRenderLoop { engine: self.id });
    }

    fn dispose(&mut self) {
        self.post("dispose", SceneCommand::Dispose { engine: self.id });
        self.disposed = true;
    }
}

/// Hands out [`BevyEngine`]s that feed one window
pub struct BevyEngineFactory {
    commands: Sender<SceneCommand>,
    next_engine: AtomicU32,
}

impl BevyEngineFactory {
    /// Ask the window to close
    pub fn shutdown(&self) {
        let _ = self.commands.send(SceneCommand::Shutdown);
    }
}

impl EngineFactory for BevyEngineFactory {
    fn create(&self) -> Result<Box<dyn RenderEngine>, SceneError> {
        let id = self.next_engine.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Creating bevy engine {}", id);
        Ok(Box::new(BevyEngine {
            id,
            commands: self.commands.clone(),
            next_mesh: 0,
            disposed: false,
        }))
    }
}

/// Engine factory plus the plugin that applies its commands
pub fn viewer_channel() -> (BevyEngineFactory, ViewerScenePlugin) {
    let (tx, rx) = unbounded();
    let factory = BevyEngineFactory {
        commands: tx,
        next_engine: AtomicU32::new(0),
    };
    (factory, ViewerScenePlugin { commands: rx })
}

/// Applies [`SceneCommand`]s to the world and drives orbit cameras
pub struct ViewerScenePlugin {
    commands: Receiver<SceneCommand>,
}

#[derive(Resource)]
struct SceneCommandQueue(Receiver<SceneCommand>);

/// Entities owned by one engine
struct EngineEntities {
    root: Entity,
    camera: Option<Entity>,
    meshes: HashMap<MeshId, Entity>,
}

#[derive(Resource, Default)]
struct ViewerScenes {
    engines: HashMap<u32, EngineEntities>,
}

/// Orbit parameters of a viewer camera
#[derive(Component)]
struct OrbitControl(OrbitCamera);

impl Plugin for ViewerScenePlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(ClearColor(Color::srgb(0.95, 0.97, 0.95)))
            .insert_resource(AmbientLight {
                color: Color::WHITE,
                brightness: 400.0,
                affects_lightmapped_meshes: true,
            })
            .insert_resource(SceneCommandQueue(self.commands.clone()))
            .init_resource::<ViewerScenes>()
            .add_systems(Update, (apply_scene_commands, control_orbit_cameras));
    }
}

/// Open the viewer window on the calling thread and run until
/// [`BevyEngineFactory::shutdown`] or the user closes it
pub fn run_window(plugin: ViewerScenePlugin, title: &str) -> AppExit {
    App::new()
        .add_plugins(
            DefaultPlugins
                .set(WindowPlugin {
                    primary_window: Some(Window {
                        title: title.to_string(),
                        ..default()
                    }),
                    ..default()
                })
                .set(AssetPlugin {
                    // Models are addressed by local path, not relative to an assets folder
                    file_path: ".".to_string(),
                    unapproved_path_mode: UnapprovedPathMode::Allow,
                    ..default()
                }),
        )
        .add_plugins(plugin)
        .run()
}

fn world_vec(v: Vec3) -> WorldVec3 {
    WorldVec3::from_array(v.to_array())
}

fn world_quat(q: Quat) -> WorldQuat {
    WorldQuat::from_array(q.to_array())
}

fn world_transform(t: &Transform) -> WorldTransform {
    WorldTransform {
        translation: world_vec(t.translation),
        rotation: world_quat(t.rotation),
        scale: world_vec(t.scale),
    }
}

fn orbit_transform(camera: &OrbitCamera) -> WorldTransform {
    WorldTransform::from_translation(world_vec(camera.position()))
        .looking_at(world_vec(camera.target), WorldVec3::Y)
}

fn apply_scene_commands(
    mut commands: Commands,
    queue: Res<SceneCommandQueue>,
    mut scenes: ResMut<ViewerScenes>,
    asset_server: Res<AssetServer>,
    mut exit: MessageWriter<AppExit>,
) {
    for command in queue.0.try_iter() {
        let engine = match &command {
            SceneCommand::Shutdown => {
                exit.write(AppExit::Success);
                continue;
            }
            SceneCommand::CreateScene { engine } => {
                let root = commands
                    .spawn((
                        Name::new(format!("engine-{engine}")),
                        WorldTransform::default(),
                        Visibility::default(),
                    ))
                    .id();
                scenes.engines.insert(
                    *engine,
                    EngineEntities {
                        root,
                        camera: None,
                        meshes: HashMap::new(),
                    },
                );
                continue;
            }
            SceneCommand::HemisphericLight { engine, .. }
            | SceneCommand::AttachOrbitCamera { engine, .. }
            | SceneCommand::DetachCamera { engine }
            | SceneCommand::AddModel { engine, .. }
            | SceneCommand::SetTransform { engine, .. }
            | SceneCommand::StopRenderLoop { engine }
            | SceneCommand::Dispose { engine } => *engine,
        };

        let Some(entities) = scenes.engines.get_mut(&engine) else {
            warn!("Scene command for unknown engine {}: {:?}", engine, command);
            continue;
        };

        match command {
            SceneCommand::HemisphericLight { direction, .. } => {
                let up = if direction.y.abs() > 0.99 { WorldVec3::Z } else { WorldVec3::Y };
                commands.spawn((
                    Name::new("Hemispheric Light"),
                    DirectionalLight {
                        illuminance: 3000.0,
                        shadows_enabled: false,
                        ..default()
                    },
                    WorldTransform::default().looking_to(-world_vec(direction), up),
                    ChildOf(entities.root),
                ));
            }
            SceneCommand::AttachOrbitCamera { camera, .. } => {
                if let Some(previous) = entities.camera.take() {
                    commands.entity(previous).despawn();
                }
                let id = commands
                    .spawn((
                        Name::new("Viewer Camera"),
                        Camera3d::default(),
                        orbit_transform(&camera),
                        OrbitControl(camera),
                        ChildOf(entities.root),
                    ))
                    .id();
                entities.camera = Some(id);
            }
            SceneCommand::DetachCamera { .. } => {
                if let Some(camera) = entities.camera.take() {
                    commands.entity(camera).despawn();
                }
            }
            SceneCommand::AddModel { mesh, path, .. } => {
                let scene = asset_server.load(GltfAssetLabel::Scene(0).from_asset(path.clone()));
                let id = commands
                    .spawn((
                        Name::new(path.display().to_string()),
                        SceneRoot(scene),
                        WorldTransform::default(),
                        ChildOf(entities.root),
                    ))
                    .id();
                entities.meshes.insert(mesh, id);
            }
            SceneCommand::SetTransform { mesh, transform, .. } => match entities.meshes.get(&mesh) {
                Some(entity) => {
                    commands.entity(*entity).insert(world_transform(&transform));
                }
                None => warn!("Engine {} has no mesh {:?}", engine, mesh),
            },
            SceneCommand::StopRenderLoop { .. } => {
                // No camera, nothing drawn
                if let Some(camera) = entities.camera.take() {
                    commands.entity(camera).despawn();
                }
                commands.entity(entities.root).insert(Visibility::Hidden);
            }
            SceneCommand::Dispose { .. } => {
                commands.entity(entities.root).despawn();
                scenes.engines.remove(&engine);
            }
            SceneCommand::CreateScene { .. } | SceneCommand::Shutdown => {}
        }
    }
}

/// Right-drag orbits, the wheel zooms
fn control_orbit_cameras(
    mut motion_events: MessageReader<MouseMotion>,
    mut scroll_events: MessageReader<MouseWheel>,
    mouse_buttons: Res<ButtonInput<MouseButton>>,
    mut query: Query<(&mut WorldTransform, &mut OrbitControl)>,
) {
    let mut rotation_delta = Vec2::ZERO;
    for ev in motion_events.read() {
        rotation_delta += ev.delta;
    }
    if !mouse_buttons.pressed(MouseButton::Right) {
        rotation_delta = Vec2::ZERO;
    }

    let mut scroll = 0.0;
    for ev in scroll_events.read() {
        scroll += ev.y;
    }

    if rotation_delta == Vec2::ZERO && scroll.abs() <= f32::EPSILON {
        return;
    }

    for (mut transform, mut orbit) in query.iter_mut() {
        let camera = &mut orbit.0;
        camera.alpha -= rotation_delta.x * ORBIT_SENSITIVITY;
        camera.beta = (camera.beta - rotation_delta.y * ORBIT_SENSITIVITY).clamp(MIN_BETA, PI - MIN_BETA);
        camera.radius = (camera.radius - scroll * ZOOM_SENSITIVITY).clamp(MIN_RADIUS, MAX_RADIUS);
        *transform = orbit_transform(camera);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ModelData {
        ModelData {
            url: "https://models.example/bottle/scene.gltf".to_string(),
            path: PathBuf::from("/cache/models/bottle/scene.gltf"),
            version: "2.0".to_string(),
            mesh_count: 1,
            byte_len: 10,
            resources: vec![PathBuf::from("/cache/models/bottle/scene.bin")],
        }
    }

    #[test]
    fn test_engine_calls_become_scene_commands() {
        let (factory, plugin) = viewer_channel();
        let mut engine = factory.create().unwrap();

        engine.create_scene().unwrap();
        engine.add_hemispheric_light(Vec3::Y);
        let mesh = engine.add_model(&model()).unwrap();
        engine.set_transform(mesh, Transform::normalized(0.1));
        engine.render();
        engine.stop_render_loop();
        engine.dispose();

        let commands: Vec<SceneCommand> = plugin.commands.try_iter().collect();
        assert_eq!(
            commands,
            vec![
                SceneCommand::CreateScene { engine: 1 },
                SceneCommand::HemisphericLight {
                    engine: 1,
                    direction: Vec3::Y
                },
                SceneCommand::AddModel {
                    engine: 1,
                    mesh,
                    path: PathBuf::from("/cache/models/bottle/scene.gltf"),
                },
                SceneCommand::SetTransform {
                    engine: 1,
                    mesh,
                    transform: Transform::normalized(0.1),
                },
                SceneCommand::StopRenderLoop { engine: 1 },
                SceneCommand::Dispose { engine: 1 },
            ]
        );
    }

    #[test]
    fn test_disposed_engine_sends_nothing() {
        let (factory, plugin) = viewer_channel();
        let mut engine = factory.create().unwrap();
        engine.dispose();
        let _ = plugin.commands.try_recv();

        assert!(engine.create_scene().is_err());
        assert!(engine.add_model(&model()).is_err());
        engine.detach_camera();
        assert!(plugin.commands.try_recv().is_err());
    }

    #[test]
    fn test_closed_window_fails_construction() {
        let (factory, plugin) = viewer_channel();
        drop(plugin);
        let mut engine = factory.create().unwrap();
        assert!(matches!(engine.create_scene(), Err(SceneError::Engine(_))));
    }

    #[test]
    fn test_engines_get_distinct_ids() {
        let (factory, plugin) = viewer_channel();
        factory.create().unwrap().create_scene().unwrap();
        factory.create().unwrap().create_scene().unwrap();
        factory.shutdown();

        let commands: Vec<SceneCommand> = plugin.commands.try_iter().collect();
        assert_eq!(
            commands,
            vec![
                SceneCommand::CreateScene { engine: 1 },
                SceneCommand::CreateScene { engine: 2 },
                SceneCommand::Shutdown,
            ]
        );
    }
}
