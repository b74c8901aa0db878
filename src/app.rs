//! Application Coordinator
//!
//! Builds the collaborators described by the configuration and wires them
//! together: the detection client feeding both the overlay and the
//! detected-items list, the eco-info client, and the viewer manager.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::ar::{UnsupportedXr, XrRuntime};
use crate::capture::frame::CapturedFrame;
use crate::capture::CaptureSource;
use crate::config::AppConfig;
use crate::detection::{prediction_feed, DetectionClient, DetectionTransport, HttpDetectionService, Prediction};
use crate::eco::{EcoInfo, EcoInfoClient, EcoInfoService, HttpEcoInfoService};
use crate::live::LivePipeline;
use crate::overlay::canvas::Canvas;
use crate::overlay::{OverlayRenderer, OverlayStyle};
use crate::scene::{
    EngineFactory, EngineJournal, GltfImporter, HeadlessEngineFactory, LocationProbe, SceneLifecycleManager,
    ViewerHandle, ViewerServices,
};
use crate::selection::{DetectedList, SelectionEvent};
use crate::storage;

/// Main application coordinator
pub struct EcoLensApp {
    config: AppConfig,
    detection: Arc<dyn DetectionTransport>,
    eco: EcoInfoClient,
    viewers: SceneLifecycleManager,
}

impl EcoLensApp {
    /// Connect to the configured services; viewers render through `engines`
    pub fn new(config: AppConfig, xr: Arc<dyn XrRuntime>, engines: Arc<dyn EngineFactory>) -> Result<Self> {
        let cache_dir = storage::get_model_cache_dir()
            .unwrap_or_else(|_| std::env::temp_dir().join("eco-lens").join("models"));
        let detection = HttpDetectionService::new(&config.detection.service_url, config.detection.request_timeout())
            .context("Failed to create detection client")?;
        let eco = HttpEcoInfoService::new(&config.eco.service_url, config.eco.request_timeout())
            .context("Failed to create eco-info client")?;
        let services = ViewerServices {
            probe: Arc::new(LocationProbe::new(config.viewer.probe_timeout()).context("Failed to create asset probe")?),
            importer: Arc::new(
                GltfImporter::new(config.viewer.probe_timeout(), cache_dir).context("Failed to create model importer")?,
            ),
            xr,
        };

        info!(
            "Detection service {}, eco-info service {}",
            detection.endpoint(),
            eco.endpoint()
        );

        Ok(Self::from_parts(
            config,
            Arc::new(detection),
            Arc::new(eco),
            services,
            engines,
        ))
    }

    /// Headless app without AR support
    pub fn headless(config: AppConfig) -> Result<(Self, EngineJournal)> {
        let journal = EngineJournal::new();
        let engines = Arc::new(HeadlessEngineFactory::new(journal.clone()));
        let app = Self::new(config, Arc::new(UnsupportedXr), engines)?;
        Ok((app, journal))
    }

    /// Assemble from explicit collaborators
    pub fn from_parts(
        config: AppConfig,
        detection: Arc<dyn DetectionTransport>,
        eco: Arc<dyn EcoInfoService>,
        services: ViewerServices,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        let viewers = SceneLifecycleManager::new(config.assets.clone(), config.viewer.clone(), services, engines);
        Self {
            config,
            detection,
            eco: EcoInfoClient::new(eco),
            viewers,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn renderer(&self) -> OverlayRenderer {
        OverlayRenderer::new(OverlayStyle::from(&self.config.overlay))
    }

    pub fn detection_client(&self) -> DetectionClient {
        DetectionClient::new(self.detection.clone(), self.config.detection.jpeg_quality)
    }

    /// Run a single detection cycle on `frame`
    pub async fn detect_once(&self, frame: &CapturedFrame) -> Result<Vec<Prediction>> {
        let mut client = self.detection_client();
        client
            .submit_frame(frame)
            .await
            .context("Detection cycle failed")
    }

    /// Live pipeline for `source` plus the detected-items list it feeds
    pub fn live_view<C: Canvas + Send>(
        &self,
        source: Box<dyn CaptureSource>,
        canvas: C,
        on_select: impl FnMut(&SelectionEvent) + Send + 'static,
    ) -> (LivePipeline<C>, DetectedList) {
        let (feed, rx) = prediction_feed();
        let client = self.detection_client().with_listener(feed);
        let pipeline = LivePipeline::new(
            source,
            client,
            self.renderer(),
            canvas,
            self.config.detection.interval(),
            self.config.overlay.frame_interval(),
        );
        (pipeline, DetectedList::new(rx, on_select))
    }

    pub async fn eco_info(&self, object_name: &str) -> EcoInfo {
        self.eco.lookup(object_name).await
    }

    /// Open the 3D viewer for `info`'s alternative, if it has one
    pub async fn open_viewer(
        &mut self,
        info: &EcoInfo,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Option<ViewerHandle> {
        if !info.has_viewable_alternative() {
            info!("No viewable alternative ({})", info.alternative);
            return None;
        }
        Some(self.open_alternative(&info.alternative, on_close).await)
    }

    /// Open the 3D viewer for an alternative by name
    pub async fn open_alternative(
        &mut self,
        alternative: &str,
        on_close: impl FnOnce() + Send + 'static,
    ) -> ViewerHandle {
        self.viewers.open(alternative, on_close).await
    }
}
