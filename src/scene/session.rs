//! Viewer session task
//!
//! Everything that touches a viewer's [`SceneHandle`] happens inside this one
//! task. Asynchronous work (probes, imports, the XR request) runs as a single
//! pending future polled by the same `select!` loop as the render tick, so a
//! completion can never interleave with a draw. Once teardown starts the
//! `unmounted` flag drops every late completion on the floor, and the engine
//! is released only after the grace period.

use futures_util::future::{try_join_all, BoxFuture, OptionFuture};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::assets::{AssetDescriptor, AssetProbe};
use super::engine::{EngineFactory, OrbitCamera};
use super::handle::SceneHandle;
use super::lifecycle::{transition, Effect, LifecycleEvent, LoadTarget, SceneState};
use super::loader::{ModelData, ModelImporter};
use super::{Notice, SceneError, ViewerCommand, ViewerEvent};
use crate::ar::{HitResult, PlacementController, PlacementState, XrError, XrRuntime, XrSession, UNSUPPORTED_NOTICE};
use crate::config::ViewerSettings;

/// Result of the one outstanding asynchronous operation
enum Outcome {
    Probed(Result<(), SceneError>),
    Imported(LoadTarget, Result<ModelData, SceneError>),
    XrReady(Result<Box<dyn XrSession>, XrError>),
}

/// Everything a session task needs, moved in at spawn
pub(crate) struct SessionSetup {
    pub id: Uuid,
    pub descriptor: AssetDescriptor,
    pub settings: ViewerSettings,
    pub probe: Arc<dyn AssetProbe>,
    pub importer: Arc<dyn ModelImporter>,
    pub xr: Arc<dyn XrRuntime>,
    pub engines: Arc<dyn EngineFactory>,
    pub commands: mpsc::UnboundedReceiver<ViewerCommand>,
    pub events: mpsc::UnboundedSender<ViewerEvent>,
    pub on_close: Option<Box<dyn FnOnce() + Send>>,
    pub disposed: watch::Sender<bool>,
}

pub(crate) struct ViewerSession {
    setup: SessionSetup,
    state: SceneState,
    unmounted: bool,
    handle: Option<SceneHandle>,
    placement: PlacementController,
    xr_session: Option<Box<dyn XrSession>>,
    hits: Option<mpsc::UnboundedReceiver<Vec<HitResult>>>,
    pending: Option<BoxFuture<'static, Outcome>>,
    grace: Option<Pin<Box<Sleep>>>,
}

async fn next_hits(hits: &mut Option<mpsc::UnboundedReceiver<Vec<HitResult>>>) -> Option<Vec<HitResult>> {
    match hits {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl ViewerSession {
    pub(crate) fn new(setup: SessionSetup) -> Self {
        Self {
            setup,
            state: SceneState::Uninitialized,
            unmounted: false,
            handle: None,
            placement: PlacementController::new(),
            xr_session: None,
            hits: None,
            pending: None,
            grace: None,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Viewer {} starting for {}", self.setup.id, self.setup.descriptor.primary_url);
        self.dispatch(LifecycleEvent::Start);

        let mut render_tick = tokio::time::interval(self.setup.settings.frame_interval());
        render_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                command = self.setup.commands.recv(), if !self.unmounted => match command {
                    Some(ViewerCommand::EnterAr) => self.request_ar(),
                    // A dropped handle closes the viewer too
                    Some(ViewerCommand::Close) | None => self.dispatch(LifecycleEvent::TeardownRequested),
                },

                Some(outcome) = OptionFuture::from(self.pending.as_mut()), if self.pending.is_some() => {
                    self.pending = None;
                    self.on_outcome(outcome);
                }

                hits = next_hits(&mut self.hits), if self.hits.is_some() => match hits {
                    Some(hits) => self.on_hits(&hits),
                    None => self.hits = None,
                },

                _ = render_tick.tick(), if !self.unmounted => {
                    if let Some(handle) = self.handle.as_mut() {
                        handle.render();
                    }
                }

                Some(()) = OptionFuture::from(self.grace.as_mut()), if self.grace.is_some() => {
                    self.grace = None;
                    self.dispatch(LifecycleEvent::GraceElapsed);
                    break;
                }
            }
        }

        let _ = self.setup.disposed.send(true);
        info!("Viewer {} disposed", self.setup.id);
    }

    fn emit(&self, event: ViewerEvent) {
        // The host may have stopped listening
        let _ = self.setup.events.send(event);
    }

    fn notify(&self, notice: Notice) {
        match notice.level {
            super::NoticeLevel::Info => info!("{}", notice.message),
            super::NoticeLevel::Warning => warn!("{}", notice.message),
            super::NoticeLevel::Fatal => error!("{}", notice.message),
        }
        self.emit(ViewerEvent::Notice(notice));
    }

    /// Apply `event` to the state machine and run the resulting effect
    fn dispatch(&mut self, event: LifecycleEvent) {
        let Some(t) = transition(self.state, event) else {
            debug!("Viewer {} ignoring {:?} in {:?}", self.setup.id, event, self.state);
            return;
        };
        debug!("Viewer {}: {:?} -> {:?}", self.setup.id, self.state, t.next);
        self.state = t.next;
        // Notices go out ahead of the state they explain
        if let Effect::Import { notice: Some(notice), .. } | Effect::Fail(notice) = &t.effect {
            self.notify(notice.clone());
        }
        self.emit(ViewerEvent::StateChanged(t.next));

        match t.effect {
            Effect::Construct => self.construct(),
            Effect::Probe => self.probe(),
            Effect::Import { target, .. } => self.import(target),
            Effect::Normalize | Effect::Fail(_) => {}
            Effect::BeginTeardown => self.begin_teardown(),
            Effect::Release => self.release(),
        }
    }

    fn construct(&mut self) {
        let built = self
            .setup
            .engines
            .create()
            .and_then(|engine| SceneHandle::construct(engine, Some(OrbitCamera::default())));

        match built {
            Ok(handle) => {
                self.handle = Some(handle);
                self.dispatch(LifecycleEvent::Constructed);
            }
            Err(e) => {
                error!("Viewer {} construction failed: {}", self.setup.id, e);
                self.dispatch(LifecycleEvent::ConstructFailed);
            }
        }
    }

    fn probe(&mut self) {
        let probe = Arc::clone(&self.setup.probe);
        let urls = self.setup.descriptor.dependency_urls.clone();
        debug!("Viewer {} probing {} dependencies", self.setup.id, urls.len());

        self.pending = Some(Box::pin(async move {
            let checks = urls.iter().map(|url| probe.check(url));
            Outcome::Probed(try_join_all(checks).await.map(|_| ()))
        }));
    }

    fn import(&mut self, target: LoadTarget) {
        let importer = Arc::clone(&self.setup.importer);
        let url = self.setup.descriptor.url_for(target).to_string();
        info!("Viewer {} loading {:?} model {}", self.setup.id, target, url);

        self.pending = Some(Box::pin(async move {
            let result = importer.import(&url).await;
            Outcome::Imported(target, result)
        }));
    }

    fn on_outcome(&mut self, outcome: Outcome) {
        if self.unmounted {
            debug!("Viewer {} dropping completion after unmount", self.setup.id);
            if let Outcome::XrReady(Ok(mut session)) = outcome {
                session.end();
            }
            return;
        }

        match outcome {
            Outcome::Probed(Ok(())) => self.dispatch(LifecycleEvent::DependenciesVerified),
            Outcome::Probed(Err(e)) => {
                warn!("Viewer {}: {}", self.setup.id, e);
                self.dispatch(LifecycleEvent::DependencyMissing);
            }
            Outcome::Imported(target, Ok(model)) => self.attach(target, model),
            Outcome::Imported(target, Err(e)) => {
                warn!("Viewer {} {:?} load failed: {}", self.setup.id, target, e);
                self.dispatch(LifecycleEvent::ModelFailed);
            }
            Outcome::XrReady(result) => self.on_xr_ready(result),
        }
    }

    fn attach(&mut self, target: LoadTarget, model: ModelData) {
        let scale = self.setup.settings.model_scale;
        let attached = match self.handle.as_mut() {
            Some(handle) => handle.attach_model(&model, scale),
            None => Err(SceneError::Engine("no scene to load into".to_string())),
        };

        match attached {
            Ok(_) => {
                self.emit(ViewerEvent::ModelReady {
                    url: model.url,
                    meshes: model.mesh_count,
                });
                self.dispatch(LifecycleEvent::ModelLoaded);
            }
            Err(e) => {
                warn!("Viewer {} could not insert {:?} model: {}", self.setup.id, target, e);
                self.dispatch(LifecycleEvent::ModelFailed);
            }
        }
    }

    fn request_ar(&mut self) {
        if self.state != SceneState::Ready || self.pending.is_some() {
            debug!("Viewer {} AR request ignored in {:?}", self.setup.id, self.state);
            return;
        }
        if !self.placement.begin_request() {
            debug!("Viewer {} AR session already {:?}", self.setup.id, self.placement.session_state());
            return;
        }
        self.emit(ViewerEvent::ArStateChanged(self.placement.session_state()));

        let xr = Arc::clone(&self.setup.xr);
        self.pending = Some(Box::pin(async move { Outcome::XrReady(xr.request_session().await) }));
    }

    fn on_xr_ready(&mut self, result: Result<Box<dyn XrSession>, XrError>) {
        let hits = result.and_then(|mut session| {
            let hits = session.enable_hit_test();
            match hits {
                Ok(rx) => Ok((session, rx)),
                Err(e) => {
                    session.end();
                    Err(e)
                }
            }
        });

        match hits {
            Ok((session, rx)) => {
                info!("Viewer {} AR session active", self.setup.id);
                self.placement.session_started();
                self.xr_session = Some(session);
                self.hits = Some(rx);
                if let Some(handle) = self.handle.as_mut() {
                    handle.detach_camera();
                }
            }
            Err(e) => {
                warn!("Viewer {} AR unavailable: {}", self.setup.id, e);
                self.placement.session_unavailable();
                self.notify(Notice::warning(UNSUPPORTED_NOTICE));
                if let Some(handle) = self.handle.as_mut() {
                    handle.use_orbit_camera(OrbitCamera::default());
                }
            }
        }
        self.emit(ViewerEvent::ArStateChanged(self.placement.session_state()));
    }

    fn on_hits(&mut self, hits: &[HitResult]) {
        if self.unmounted {
            return;
        }
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        let Some(pose) = self.placement.on_hit_test(hits, handle.mesh().is_some()) else {
            return;
        };

        match handle.place(&pose) {
            Ok(()) => {
                info!("Viewer {} model placed at {:?}", self.setup.id, pose.position);
                self.emit(ViewerEvent::Placed {
                    pose,
                    state: PlacementState::Placed,
                });
            }
            Err(e) => error!("Viewer {} placement failed: {}", self.setup.id, e),
        }
    }

    fn begin_teardown(&mut self) {
        self.unmounted = true;
        self.hits = None;
        if let Some(on_close) = self.setup.on_close.take() {
            on_close();
        }
        let grace = self.setup.settings.grace_period();
        debug!("Viewer {} unmounted, releasing in {:?}", self.setup.id, grace);
        self.grace = Some(Box::pin(tokio::time::sleep_until(Instant::now() + grace)));
    }

    fn release(&mut self) {
        self.pending = None;
        if let Some(mut session) = self.xr_session.take() {
            session.end();
            self.placement.end();
        }
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
    }
}
