//! Live capture + overlay loop
//!
//! Two recurring tasks share one `select!` loop: the detection timer, which
//! grabs and submits a frame, and the animation timer, which redraws the
//! overlay from the last completed prediction list. A slow or failing
//! detection service never holds up a frame.

use anyhow::{Context, Result};
use futures_util::future::OptionFuture;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::capture::frame::CapturedFrame;
use crate::capture::CaptureSource;
use crate::detection::client::{DetectionStats, PendingDetection};
use crate::detection::{DetectionClient, Prediction};
use crate::overlay::canvas::Canvas;
use crate::overlay::{AnimationState, OverlayRenderer};

/// What a pipeline run leaves behind
pub struct LiveReport<C> {
    pub stats: DetectionStats,
    pub frames_drawn: u64,
    /// Last completed prediction list
    pub predictions: Vec<Prediction>,
    /// Most recent capture
    pub last_frame: Option<CapturedFrame>,
    /// The surface as of the last animation frame
    pub canvas: C,
}

/// Capture source, detection client and overlay wired together
pub struct LivePipeline<C> {
    source: Box<dyn CaptureSource>,
    client: DetectionClient,
    renderer: OverlayRenderer,
    canvas: C,
    detect_interval: Duration,
    frame_interval: Duration,
}

impl<C: Canvas + Send> LivePipeline<C> {
    pub fn new(
        source: Box<dyn CaptureSource>,
        client: DetectionClient,
        renderer: OverlayRenderer,
        canvas: C,
        detect_interval: Duration,
        frame_interval: Duration,
    ) -> Self {
        Self {
            source,
            client,
            renderer,
            canvas,
            detect_interval,
            frame_interval,
        }
    }

    /// Run both loops until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) -> LiveReport<C> {
        info!(
            "Live view started on {} (detect every {:?}, frame every {:?})",
            self.source.describe(),
            self.detect_interval,
            self.frame_interval
        );

        let mut detect_tick = tokio::time::interval(self.detect_interval);
        detect_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frame_tick = tokio::time::interval(self.frame_interval);
        frame_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut pending: Option<PendingDetection> = None;
        let mut animation = AnimationState::default();
        let mut last_frame = None;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(result) = OptionFuture::from(pending.as_mut()), if pending.is_some() => {
                    pending = None;
                    self.client.complete(result);
                }

                _ = detect_tick.tick() => {
                    if let Some(frame) = self.detection_tick(&mut pending) {
                        last_frame = Some(frame);
                    }
                }

                _ = frame_tick.tick() => {
                    animation = self.renderer.render_frame(
                        &mut self.canvas,
                        self.client.last_predictions(),
                        animation,
                    );
                }
            }
        }

        // An outstanding request is abandoned with the view
        drop(pending);
        let stats = self.client.stats();
        info!(
            "Live view stopped: {} frames, {} requests, {} failed",
            animation.frame, stats.submitted, stats.failed
        );

        LiveReport {
            stats,
            frames_drawn: animation.frame,
            predictions: self.client.last_predictions().to_vec(),
            last_frame,
            canvas: self.canvas,
        }
    }

    /// Grab a frame and submit it unless a request is still outstanding
    fn detection_tick(&mut self, pending: &mut Option<PendingDetection>) -> Option<CapturedFrame> {
        let frame = match self.source.grab() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.client.note_not_ready();
                return None;
            }
            Err(e) => {
                self.client.note_capture_error(&e);
                return None;
            }
        };

        let (width, height) = frame.dimensions();
        if self.canvas.size() != (width, height) {
            debug!("Resizing overlay to {}x{}", width, height);
            self.canvas.resize(width, height);
        }

        // Skips and encode failures are counted by the client
        if let Ok(Some(request)) = self.client.begin(&frame) {
            *pending = Some(request);
        }
        Some(frame)
    }
}

/// A mounted live pipeline running on its own task
pub struct LiveView<C> {
    shutdown: CancellationToken,
    task: JoinHandle<LiveReport<C>>,
}

impl<C: Canvas + Send + 'static> LiveView<C> {
    pub fn mount(pipeline: LivePipeline<C>) -> Self {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(shutdown.clone()));
        Self { shutdown, task }
    }

    /// Cancel both loops and wait for the report
    pub async fn unmount(self) -> Result<LiveReport<C>> {
        self.shutdown.cancel();
        self.task.await.context("Live view task failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StillImageSource;
    use crate::detection::client::tests::{test_frame, ScriptedTransport};
    use crate::detection::DetectionError;
    use crate::overlay::canvas::DisplayList;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    struct NeverReady;

    impl CaptureSource for NeverReady {
        fn grab(&mut self) -> Result<Option<CapturedFrame>> {
            Ok(None)
        }

        fn describe(&self) -> String {
            "never ready".to_string()
        }
    }

    struct BrokenSource;

    impl CaptureSource for BrokenSource {
        fn grab(&mut self) -> Result<Option<CapturedFrame>> {
            anyhow::bail!("frame_0003.png: invalid PNG signature")
        }

        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    fn still() -> Box<dyn CaptureSource> {
        Box::new(StillImageSource::from_frame(test_frame()))
    }

    fn bottle() -> Prediction {
        Prediction::new("bottle", 0.92, [10.0, 10.0, 50.0, 50.0])
    }

    fn pipeline(source: Box<dyn CaptureSource>, transport: Arc<ScriptedTransport>) -> LivePipeline<DisplayList> {
        LivePipeline::new(
            source,
            DetectionClient::new(transport, 85),
            OverlayRenderer::default(),
            DisplayList::new(1, 1),
            Duration::from_secs(1),
            Duration::from_millis(16),
        )
    }

    async fn run_for(pipeline: LivePipeline<DisplayList>, duration: Duration) -> LiveReport<DisplayList> {
        let view = LiveView::mount(pipeline);
        tokio::time::sleep(duration).await;
        view.unmount().await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_overlaps_requests() {
        let transport = Arc::new(ScriptedTransport::new(vec![], Duration::from_millis(2500)));
        let report = run_for(
            pipeline(still(), transport.clone()),
            Duration::from_secs(10),
        )
        .await;

        assert_eq!(transport.max_active.load(Ordering::SeqCst), 1);
        assert!(report.stats.skipped_in_flight > 0);
        assert!(report.stats.succeeded >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_keep_coming_while_detection_is_slow() {
        let transport = Arc::new(ScriptedTransport::new(vec![], Duration::from_secs(60)));
        let report = run_for(
            pipeline(still(), transport),
            Duration::from_secs(2),
        )
        .await;

        assert_eq!(report.stats.succeeded, 0);
        assert!(report.frames_drawn > 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_keep_previous_overlay() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![
                Ok(vec![bottle()]),
                Err(DetectionError::Timeout),
                Err(DetectionError::Status(500)),
            ],
            Duration::from_millis(100),
        ));
        let report = run_for(
            pipeline(still(), transport),
            Duration::from_millis(2500),
        )
        .await;

        assert_eq!(report.predictions, vec![bottle()]);
        assert_eq!(report.stats.consecutive_failures, 2);
        assert_eq!(report.canvas.rects(), vec![[10.0, 10.0, 50.0, 50.0]]);
        assert_eq!(report.canvas.texts(), vec!["bottle (92%)"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_source_sends_nothing() {
        let transport = Arc::new(ScriptedTransport::new(vec![], Duration::ZERO));
        let report = run_for(pipeline(Box::new(NeverReady), transport.clone()), Duration::from_millis(3500)).await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.stats.failed, 0);
        assert!(report.stats.skipped_not_ready >= 3);
        assert!(report.last_frame.is_none());
        assert!(report.frames_drawn > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_errors_are_not_counted_as_not_ready() {
        let transport = Arc::new(ScriptedTransport::new(vec![], Duration::ZERO));
        let report = run_for(pipeline(Box::new(BrokenSource), transport.clone()), Duration::from_millis(3500)).await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert!(report.stats.capture_errors >= 3);
        assert_eq!(report.stats.skipped_not_ready, 0);
        assert_eq!(report.stats.failed, 0);
        assert_eq!(report.stats.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_canvas_follows_capture_size() {
        let transport = Arc::new(ScriptedTransport::new(vec![], Duration::ZERO));
        let report = run_for(
            pipeline(still(), transport),
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(report.canvas.size(), (64, 48));
        assert_eq!(report.last_frame.map(|f| f.dimensions()), Some((64, 48)));
    }
}
