use crossbeam::atomic::AtomicCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::types::{MotionPhase, PatternId};

/// Cross-task view of the controller.
///
/// Every field has exactly one writer: the control loop owns motion and
/// catalog fields, the connectivity supervisor owns the link fields, and the
/// portal's `/update/begin` and `/update/end` routes own `update_in_progress`.
/// Readers only need visibility, never a consistent multi-field snapshot.
pub struct SharedStatus {
    started: Instant,

    // Control loop
    sensor_available: AtomicBool,
    calibrated: AtomicBool,
    phase: AtomicU8,
    filtered_speed: AtomicCell<f64>,
    rotations: AtomicU64,
    patterns_loaded: AtomicBool,
    pattern_count: AtomicUsize,
    cursor: AtomicUsize,
    current_pattern: AtomicU8,
    dispatches: AtomicU64,

    // Connectivity supervisor
    connected: AtomicBool,
    portal_active: AtomicBool,
    current_network: AtomicU8,

    // Update transport
    update_in_progress: AtomicBool,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            sensor_available: AtomicBool::new(false),
            calibrated: AtomicBool::new(false),
            phase: AtomicU8::new(MotionPhase::Still.as_u8()),
            filtered_speed: AtomicCell::new(0.0),
            rotations: AtomicU64::new(0),
            patterns_loaded: AtomicBool::new(false),
            pattern_count: AtomicUsize::new(0),
            cursor: AtomicUsize::new(0),
            current_pattern: AtomicU8::new(0),
            dispatches: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            portal_active: AtomicBool::new(false),
            current_network: AtomicU8::new(0),
            update_in_progress: AtomicBool::new(false),
        }
    }

    pub fn set_sensor_available(&self, available: bool) {
        self.sensor_available.store(available, Ordering::Release);
    }

    pub fn set_motion(&self, calibrated: bool, phase: MotionPhase, filtered_speed: f64, rotations: u64) {
        self.calibrated.store(calibrated, Ordering::Release);
        self.phase.store(phase.as_u8(), Ordering::Release);
        self.filtered_speed.store(filtered_speed);
        self.rotations.store(rotations, Ordering::Release);
    }

    pub fn set_catalog(&self, loaded: bool, count: usize, cursor: usize, current: Option<PatternId>) {
        self.patterns_loaded.store(loaded, Ordering::Release);
        self.pattern_count.store(count, Ordering::Release);
        self.cursor.store(cursor, Ordering::Release);
        self.current_pattern.store(current.map(PatternId::get).unwrap_or(0), Ordering::Release);
    }

    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::AcqRel);
    }

    pub fn set_link(&self, connected: bool, portal_active: bool, current_network: u8) {
        self.connected.store(connected, Ordering::Release);
        self.portal_active.store(portal_active, Ordering::Release);
        self.current_network.store(current_network, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_portal_active(&self) -> bool {
        self.portal_active.load(Ordering::Acquire)
    }

    pub fn set_update_in_progress(&self, in_progress: bool) {
        self.update_in_progress.store(in_progress, Ordering::Release);
    }

    pub fn is_update_in_progress(&self) -> bool {
        self.update_in_progress.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> LiveStatus {
        let current = self.current_pattern.load(Ordering::Acquire);
        LiveStatus {
            timestamp: current_timestamp(),
            uptime_seconds: self.started.elapsed().as_secs(),
            sensor_available: self.sensor_available.load(Ordering::Acquire),
            calibration_complete: self.calibrated.load(Ordering::Acquire),
            phase: MotionPhase::from_u8(self.phase.load(Ordering::Acquire)),
            filtered_speed: self.filtered_speed.load(),
            rotations: self.rotations.load(Ordering::Acquire),
            patterns_loaded: self.patterns_loaded.load(Ordering::Acquire),
            pattern_count: self.pattern_count.load(Ordering::Acquire),
            pattern_cursor: self.cursor.load(Ordering::Acquire),
            current_pattern: if current == 0 { None } else { Some(current) },
            dispatches: self.dispatches.load(Ordering::Acquire),
            wifi_connected: self.is_connected(),
            portal_active: self.is_portal_active(),
            current_network: self.current_network.load(Ordering::Acquire),
            update_in_progress: self.is_update_in_progress(),
        }
    }
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    // Motion
    pub sensor_available: bool,
    pub calibration_complete: bool,
    pub phase: MotionPhase,
    pub filtered_speed: f64,
    pub rotations: u64,
    // Catalog / dispatch
    pub patterns_loaded: bool,
    pub pattern_count: usize,
    pub pattern_cursor: usize,
    pub current_pattern: Option<u8>,
    pub dispatches: u64,
    // Connectivity
    pub wifi_connected: bool,
    pub portal_active: bool,
    pub current_network: u8,
    pub update_in_progress: bool,
}

impl LiveStatus {
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
