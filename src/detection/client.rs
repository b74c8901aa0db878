//! Detection client: one in-flight request at a time, last result wins

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{DetectionError, DetectionTransport, Prediction};
use crate::capture::frame::CapturedFrame;

/// A submitted request that resolves to the next prediction list
pub type PendingDetection = BoxFuture<'static, Result<Vec<Prediction>, DetectionError>>;

/// Single-slot hand-off of prediction lists to the host.
///
/// A new list replaces one the host has not read yet, so a host that polls
/// rarely holds at most one stale list.
#[derive(Clone)]
pub struct PredictionFeed {
    tx: Sender<Vec<Prediction>>,
    unread: Receiver<Vec<Prediction>>,
}

/// Create a feed and the receiver the host drains
pub fn prediction_feed() -> (PredictionFeed, Receiver<Vec<Prediction>>) {
    let (tx, rx) = bounded(1);
    let feed = PredictionFeed {
        tx,
        unread: rx.clone(),
    };
    (feed, rx)
}

impl PredictionFeed {
    pub fn publish(&self, predictions: Vec<Prediction>) {
        let mut next = predictions;
        loop {
            match self.tx.try_send(next) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    let _ = self.unread.try_recv();
                    next = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// State owned by the client between ticks
#[derive(Debug, Default)]
struct DetectionCycleState {
    last_predictions: Arc<[Prediction]>,
    in_flight: bool,
}

/// Counters describing how the detection timer has been behaving
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionStats {
    /// Requests handed to the transport
    pub submitted: u64,
    /// Requests that replaced the prediction list
    pub succeeded: u64,
    /// Requests (or encodes) that failed
    pub failed: u64,
    /// Ticks skipped because a request was still in flight
    pub skipped_in_flight: u64,
    /// Ticks skipped because the capture source was not ready
    pub skipped_not_ready: u64,
    /// Ticks on which the capture source returned an error
    pub capture_errors: u64,
    /// Failures since the last success
    pub consecutive_failures: u32,
}

/// Detection client that owns the cycle state
pub struct DetectionClient {
    transport: Arc<dyn DetectionTransport>,
    state: DetectionCycleState,
    stats: DetectionStats,
    jpeg_quality: u8,
    listener: Option<PredictionFeed>,
}

impl DetectionClient {
    /// Create a client that encodes frames at `jpeg_quality`
    pub fn new(transport: Arc<dyn DetectionTransport>, jpeg_quality: u8) -> Self {
        Self {
            transport,
            state: DetectionCycleState::default(),
            stats: DetectionStats::default(),
            jpeg_quality,
            listener: None,
        }
    }

    /// Publish every new prediction list on `listener`
    pub fn with_listener(mut self, listener: PredictionFeed) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Most recently completed prediction list
    pub fn last_predictions(&self) -> &[Prediction] {
        &self.state.last_predictions
    }

    /// Shared handle to the most recent list
    pub fn snapshot(&self) -> Arc<[Prediction]> {
        self.state.last_predictions.clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.in_flight
    }

    pub fn stats(&self) -> DetectionStats {
        self.stats
    }

    /// Failures since the last successful cycle
    pub fn consecutive_failures(&self) -> u32 {
        self.stats.consecutive_failures
    }

    /// Record a tick on which the capture source had no frame
    pub fn note_not_ready(&mut self) {
        self.stats.skipped_not_ready += 1;
        debug!("Capture not ready, skipping detection tick");
    }

    /// Record a tick on which grabbing a frame failed.
    ///
    /// No request is sent and the detection failure streak is untouched.
    pub fn note_capture_error(&mut self, error: &anyhow::Error) {
        self.stats.capture_errors += 1;
        warn!("Capture failed, skipping detection tick: {:#}", error);
    }

    /// Start a cycle for `frame`.
    ///
    /// Encoding happens synchronously, on the same tick as the submission, so
    /// the request always describes the frame that was on screen. Returns
    /// `Ok(None)` when a previous request is still in flight.
    pub fn begin(&mut self, frame: &CapturedFrame) -> Result<Option<PendingDetection>, DetectionError> {
        if self.state.in_flight {
            self.stats.skipped_in_flight += 1;
            debug!("Detection request still in flight, skipping tick");
            return Ok(None);
        }

        let jpeg = match frame.encode_jpeg(self.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                self.record_failure(&e);
                return Err(e);
            }
        };

        self.state.in_flight = true;
        self.stats.submitted += 1;
        debug!(
            "Submitting {}x{} frame ({} bytes)",
            frame.width,
            frame.height,
            jpeg.len()
        );

        let transport = self.transport.clone();
        Ok(Some(Box::pin(async move { transport.detect(jpeg).await })))
    }

    /// Finish the in-flight cycle.
    ///
    /// On success the prediction list is replaced wholesale and forwarded to
    /// the listener. On failure the previous list stays untouched. Returns
    /// whether the list was replaced.
    pub fn complete(&mut self, result: Result<Vec<Prediction>, DetectionError>) -> bool {
        self.state.in_flight = false;

        match result {
            Ok(predictions) => {
                if self.stats.consecutive_failures > 0 {
                    info!(
                        "Detection recovered after {} failed cycles",
                        self.stats.consecutive_failures
                    );
                }
                self.stats.succeeded += 1;
                self.stats.consecutive_failures = 0;
                debug!("Detection cycle complete: {} predictions", predictions.len());

                if let Some(listener) = &self.listener {
                    listener.publish(predictions.clone());
                }
                self.state.last_predictions = predictions.into();
                true
            }
            Err(e) => {
                self.record_failure(&e);
                false
            }
        }
    }

    /// Run one full cycle for `frame` and wait for it
    pub async fn submit_frame(&mut self, frame: &CapturedFrame) -> Result<Vec<Prediction>, DetectionError> {
        let pending = self.begin(frame)?.ok_or(DetectionError::InFlight)?;
        match pending.await {
            Ok(predictions) => {
                self.complete(Ok(predictions.clone()));
                Ok(predictions)
            }
            Err(e) => {
                self.state.in_flight = false;
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    fn record_failure(&mut self, error: &DetectionError) {
        self.stats.failed += 1;
        self.stats.consecutive_failures = self.stats.consecutive_failures.saturating_add(1);
        warn!(
            "Detection cycle failed ({} in a row), keeping previous overlay: {}",
            self.stats.consecutive_failures, error
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Transport that replays scripted responses after a delay
    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<Vec<Prediction>, DetectionError>>>,
        delay: Duration,
        pub calls: AtomicUsize,
        pub active: AtomicUsize,
        pub max_active: AtomicUsize,
    }

    impl ScriptedTransport {
        pub(crate) fn new(
            responses: Vec<Result<Vec<Prediction>, DetectionError>>,
            delay: Duration,
        ) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                delay,
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DetectionTransport for ScriptedTransport {
        async fn detect(&self, _jpeg: Vec<u8>) -> Result<Vec<Prediction>, DetectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            self.responses.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    pub(crate) fn test_frame() -> CapturedFrame {
        CapturedFrame::from_image(RgbaImage::from_pixel(64, 48, Rgba([90, 90, 90, 255])))
    }

    fn bottle() -> Prediction {
        Prediction::new("bottle", 0.92, [10.0, 10.0, 50.0, 50.0])
    }

    #[tokio::test]
    async fn test_success_replaces_predictions_and_notifies() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(vec![bottle()])], Duration::ZERO));
        let (feed, rx) = prediction_feed();
        let mut client = DetectionClient::new(transport, 85).with_listener(feed);

        let result = client.submit_frame(&test_frame()).await.unwrap();

        assert_eq!(result, vec![bottle()]);
        assert_eq!(client.last_predictions(), &[bottle()]);
        assert_eq!(rx.try_recv().unwrap(), vec![bottle()]);
        assert!(!client.is_in_flight());
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_predictions() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Ok(vec![bottle()]), Err(DetectionError::Timeout), Err(DetectionError::Status(502))],
            Duration::ZERO,
        ));
        let mut client = DetectionClient::new(transport, 85);
        let frame = test_frame();

        client.submit_frame(&frame).await.unwrap();
        assert!(client.submit_frame(&frame).await.is_err());
        assert!(client.submit_frame(&frame).await.is_err());

        assert_eq!(client.last_predictions(), &[bottle()]);
        assert_eq!(client.consecutive_failures(), 2);
        assert_eq!(client.stats().failed, 2);
        assert!(!client.is_in_flight());
    }

    #[tokio::test]
    async fn test_begin_skips_while_in_flight() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(vec![bottle()])], Duration::ZERO));
        let mut client = DetectionClient::new(transport.clone(), 85);
        let frame = test_frame();

        let pending = client.begin(&frame).unwrap().expect("first tick submits");
        assert!(client.is_in_flight());
        assert!(client.begin(&frame).unwrap().is_none());
        assert!(matches!(client.submit_frame(&frame).await, Err(DetectionError::InFlight)));

        client.complete(pending.await);
        assert_eq!(client.stats().skipped_in_flight, 2);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Err(DetectionError::Timeout), Ok(vec![])],
            Duration::ZERO,
        ));
        let mut client = DetectionClient::new(transport, 85);
        let frame = test_frame();

        let _ = client.submit_frame(&frame).await;
        assert_eq!(client.consecutive_failures(), 1);
        client.submit_frame(&frame).await.unwrap();
        assert_eq!(client.consecutive_failures(), 0);
        assert!(client.last_predictions().is_empty());
    }

    #[tokio::test]
    async fn test_unread_list_is_replaced_not_queued() {
        let cup = Prediction::new("cup", 0.5, [0.0; 4]);
        let transport = Arc::new(ScriptedTransport::new(
            vec![Ok(vec![bottle()]), Ok(vec![]), Ok(vec![cup.clone()])],
            Duration::ZERO,
        ));
        let (feed, rx) = prediction_feed();
        let mut client = DetectionClient::new(transport, 85).with_listener(feed);
        let frame = test_frame();

        for _ in 0..3 {
            client.submit_frame(&frame).await.unwrap();
        }

        assert_eq!(rx.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), vec![cup]);
        assert!(rx.try_recv().is_err());
    }
}
