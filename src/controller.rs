use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::catalog::PatternCatalog;
use crate::conditioner::SignalConditioner;
use crate::config::ControllerConfig;
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::live_status::SharedStatus;
use crate::motion::{MotionConfig, MotionEdge, MotionStateMachine, PauseLatch};
use crate::peer_client::PeerTransport;
use crate::sensors::GyroSource;
use crate::types::RotationSample;
use crate::watchdog::Watchdog;

const DISCOVERY_RETRY: Duration = Duration::from_secs(10);
const STATUS_SAVE_INTERVAL: Duration = Duration::from_secs(2);

/// The control loop's context: everything the sample path mutates lives
/// here, and only `SharedStatus` is visible to other tasks.
pub struct Controller<T> {
    conditioner: SignalConditioner,
    motion: MotionStateMachine,
    catalog: PatternCatalog,
    dispatcher: Dispatcher<T>,
    latch: PauseLatch,
    status: Arc<SharedStatus>,
    watchdog: Arc<Watchdog>,
    poll_interval: Duration,
    was_connected: bool,
    next_discovery: Option<Instant>,
    discovery: Option<JoinHandle<PatternCatalog>>,
    status_file: Option<String>,
}

impl<T: PeerTransport + 'static> Controller<T> {
    pub fn new(
        config: &ControllerConfig,
        dispatcher: Dispatcher<T>,
        status: Arc<SharedStatus>,
        watchdog: Arc<Watchdog>,
    ) -> Self {
        Self {
            conditioner: SignalConditioner::new(
                config.axis,
                config.calibration_window_secs(),
                config.filter_alpha,
            ),
            motion: MotionStateMachine::new(MotionConfig {
                high_threshold: config.high_threshold,
                hold_secs: config.hold_secs(),
            }),
            catalog: PatternCatalog::new(),
            dispatcher,
            latch: PauseLatch::default(),
            status,
            watchdog,
            poll_interval: config.poll_interval(),
            was_connected: false,
            next_discovery: None,
            discovery: None,
            status_file: None,
        }
    }

    pub fn with_status_file(mut self, path: Option<String>) -> Self {
        self.status_file = path;
        self
    }

    pub fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    pub fn motion(&self) -> &MotionStateMachine {
        &self.motion
    }

    /// One conditioned sample through the state machine. Returns the
    /// dispatch report when this sample produced a send.
    pub async fn process_sample(&mut self, sample: &RotationSample) -> Option<DispatchReport> {
        let conditioned = self.conditioner.condition(sample);
        let speed = conditioned.calibrated?;

        let edge = self.motion.update(speed, sample.timestamp);
        log::debug!(
            "x={:.1} y={:.1} z={:.1} rotating={} since_motion={:.0}ms",
            sample.x,
            sample.y,
            sample.z,
            self.motion.is_spinning(),
            (sample.timestamp - self.motion.last_motion()) * 1000.0
        );

        match edge {
            Some(MotionEdge::Resume) => {
                self.catalog.advance();
                self.latch.arm();
                log::info!("[MOTION] Rotation started (cursor {})", self.catalog.cursor());
                None
            }
            Some(MotionEdge::Pause(summary)) => {
                log::info!(
                    "[MOTION] Paused after {:.1}s, {:.1} rev, peak {:.0} deg/s",
                    summary.duration_secs,
                    summary.revolutions(),
                    summary.peak_speed
                );
                self.on_pause_edge().await
            }
            None => None,
        }
    }

    /// Send the current pattern, at most once per pause.
    pub async fn on_pause_edge(&mut self) -> Option<DispatchReport> {
        if !self.latch.take() {
            return None;
        }
        if self.status.is_update_in_progress() {
            log::info!("[DISPATCH] Update in progress, skipping send");
            return None;
        }
        let Some(pattern) = self.catalog.current() else {
            log::info!("[DISPATCH] No patterns loaded, skipping send");
            return None;
        };

        let report = self.dispatcher.send_to_all(pattern).await;
        self.status.record_dispatch();
        log::info!(
            "[DISPATCH] Pattern {} accepted by {}/{} peers",
            pattern,
            report.accepted(),
            report.outcomes.len()
        );
        Some(report)
    }

    /// Learn the catalog on a connect edge, or retry while it is still empty.
    ///
    /// Listings run in a background task; the loop only adopts the result
    /// once it is ready, so slow peers never delay sampling.
    pub async fn maybe_discover(&mut self) {
        if self.discovery.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(handle) = self.discovery.take() {
                match handle.await {
                    Ok(catalog) if catalog.is_loaded() && !self.catalog.is_loaded() => self.catalog = catalog,
                    Ok(_) => log::warn!("[CATALOG] No peer listed any patterns, retrying in {:?}", DISCOVERY_RETRY),
                    Err(e) => log::error!("[CATALOG] Discovery task failed: {}", e),
                }
            }
        }

        let connected = self.status.is_connected();
        let rising = connected && !self.was_connected;
        self.was_connected = connected;

        if !connected || self.status.is_update_in_progress() {
            return;
        }
        if self.catalog.is_loaded() || self.discovery.is_some() {
            return;
        }
        let now = Instant::now();
        if !rising && self.next_discovery.is_some_and(|at| now < at) {
            return;
        }
        self.next_discovery = Some(now + DISCOVERY_RETRY);

        let transport = self.dispatcher.shared_transport();
        let peers = self.dispatcher.peers().to_vec();
        self.discovery = Some(tokio::spawn(async move {
            let mut catalog = PatternCatalog::new();
            let _ = catalog.discover(transport.as_ref(), &peers).await;
            catalog
        }));
    }

    fn publish(&self) {
        self.status.set_motion(
            self.conditioner.is_ready(),
            self.motion.phase(),
            self.conditioner.filtered_speed(),
            self.motion.rotations(),
        );
        self.status.set_catalog(
            self.catalog.is_loaded(),
            self.catalog.len(),
            self.catalog.cursor(),
            self.catalog.current(),
        );
    }

    /// Main loop. Without a source, motion is disabled but the loop keeps
    /// feeding the watchdog and serving discovery.
    pub async fn run(mut self, mut source: Option<Box<dyn GyroSource>>) {
        self.status.set_sensor_available(source.is_some());
        if source.is_none() {
            log::warn!("[MOTION] No sensor, running without motion detection");
        }

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_status_save = Instant::now();

        loop {
            ticker.tick().await;
            self.watchdog.feed();

            self.maybe_discover().await;

            if let Some(source) = source.as_mut() {
                match source.read() {
                    Ok(sample) => {
                        self.process_sample(&sample).await;
                    }
                    Err(e) => log::debug!("[SENSOR] Skipping sample: {}", e),
                }
            }

            self.publish();

            if let Some(path) = &self.status_file {
                if last_status_save.elapsed() >= STATUS_SAVE_INTERVAL {
                    if let Err(e) = self.status.snapshot().save(path) {
                        log::warn!("[STATUS] Failed to write {}: {}", path, e);
                    }
                    last_status_save = Instant::now();
                }
            }
        }
    }
}
