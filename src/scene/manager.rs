//! Scene Lifecycle Manager
//!
//! Opens viewers one at a time. Each [`SceneLifecycleManager::open`] closes
//! the previous viewer if the host left it mounted and waits until its engine
//! has been fully released before the next one is constructed, then spawns the
//! session task and returns a [`ViewerHandle`] to talk to it.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;

use super::assets::{AssetCatalog, AssetProbe};
use super::engine::EngineFactory;
use super::lifecycle::SceneState;
use super::loader::ModelImporter;
use super::session::{SessionSetup, ViewerSession};
use super::{ViewerCommand, ViewerEvent};
use crate::ar::XrRuntime;
use crate::config::ViewerSettings;

/// Collaborators a viewer needs
#[derive(Clone)]
pub struct ViewerServices {
    pub probe: Arc<dyn AssetProbe>,
    pub importer: Arc<dyn ModelImporter>,
    pub xr: Arc<dyn XrRuntime>,
}

/// Host-side end of a running viewer.
///
/// Dropping the handle closes the viewer.
pub struct ViewerHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<ViewerCommand>,
    events: mpsc::UnboundedReceiver<ViewerEvent>,
    disposed: watch::Receiver<bool>,
}

impl ViewerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request teardown
    pub fn close(&self) {
        let _ = self.commands.send(ViewerCommand::Close);
    }

    /// Ask for an immersive session; only honoured once the model is ready
    pub fn enter_ar(&self) {
        let _ = self.commands.send(ViewerCommand::EnterAr);
    }

    /// Next event from the viewer, `None` once it has shut down
    pub async fn next_event(&mut self) -> Option<ViewerEvent> {
        self.events.recv().await
    }

    /// Skip events until a state matching `wanted` is reported
    pub async fn wait_for_state(&mut self, wanted: impl Fn(SceneState) -> bool) -> Option<SceneState> {
        while let Some(event) = self.events.recv().await {
            if let ViewerEvent::StateChanged(state) = event {
                if wanted(state) {
                    return Some(state);
                }
            }
        }
        None
    }

    /// Resolve once the engine has been released
    pub async fn wait_disposed(&mut self) {
        // A closed channel means the task is gone
        let _ = self.disposed.wait_for(|disposed| *disposed).await;
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.borrow()
    }
}

/// Manager-side link to the most recently opened viewer
///
/// The command link is weak so the host's handle alone keeps the viewer mounted.
struct PreviousViewer {
    commands: mpsc::WeakUnboundedSender<ViewerCommand>,
    disposed: watch::Receiver<bool>,
}

/// Opens 3D viewers for selected alternatives
pub struct SceneLifecycleManager {
    catalog: AssetCatalog,
    settings: ViewerSettings,
    services: ViewerServices,
    engines: Arc<dyn EngineFactory>,
    previous: Option<PreviousViewer>,
}

impl SceneLifecycleManager {
    pub fn new(
        catalog: AssetCatalog,
        settings: ViewerSettings,
        services: ViewerServices,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            catalog,
            settings,
            services,
            engines,
            previous: None,
        }
    }

    pub fn catalog(&self) -> &AssetCatalog {
        &self.catalog
    }

    /// Mount a viewer for `alternative`. `on_close` runs when teardown begins.
    pub async fn open(
        &mut self,
        alternative: &str,
        on_close: impl FnOnce() + Send + 'static,
    ) -> ViewerHandle {
        if let Some(PreviousViewer { commands, mut disposed }) = self.previous.take() {
            if !*disposed.borrow() {
                debug!("Closing the previous viewer before opening '{}'", alternative);
                // A dropped handle has already closed it
                if let Some(commands) = commands.upgrade() {
                    let _ = commands.send(ViewerCommand::Close);
                }
            }
            let _ = disposed.wait_for(|disposed| *disposed).await;
        }

        let id = Uuid::new_v4();
        let descriptor = self.catalog.resolve(alternative).clone();
        info!("Opening viewer {} for '{}'", id, alternative);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (disposed_tx, disposed_rx) = watch::channel(false);

        let session = ViewerSession::new(SessionSetup {
            id,
            descriptor,
            settings: self.settings.clone(),
            probe: Arc::clone(&self.services.probe),
            importer: Arc::clone(&self.services.importer),
            xr: Arc::clone(&self.services.xr),
            engines: Arc::clone(&self.engines),
            commands: command_rx,
            events: event_tx,
            on_close: Some(Box::new(on_close)),
            disposed: disposed_tx,
        });
        tokio::spawn(session.run());

        self.previous = Some(PreviousViewer {
            commands: command_tx.downgrade(),
            disposed: disposed_rx.clone(),
        });

        ViewerHandle {
            id,
            commands: command_tx,
            events: event_rx,
            disposed: disposed_rx,
        }
    }
}
