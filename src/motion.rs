use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::MotionPhase;

#[derive(Clone, Copy, Debug)]
pub struct MotionConfig {
    /// deg/s. Spinning starts above this and ends below half of it.
    pub high_threshold: f64,
    /// A pause is reported once strictly more than this many seconds pass
    /// without a qualifying sample.
    pub hold_secs: f64,
}

impl MotionConfig {
    pub fn release_threshold(&self) -> f64 {
        self.high_threshold / 2.0
    }
}

/// Summary of one rotate/stop cycle, reported on the pause edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct RotationSummary {
    pub duration_secs: f64,
    pub peak_speed: f64,
    pub mean_speed: f64,
    pub degrees: f64,
}

impl RotationSummary {
    pub fn revolutions(&self) -> f64 {
        self.degrees / 360.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MotionEdge {
    Resume,
    Pause(RotationSummary),
}

/// Per-rotation accumulators, reset on every resume edge.
#[derive(Clone, Debug, Default)]
struct RotationStats {
    started_at: f64,
    last_timestamp: f64,
    peak: f64,
    speed_sum: f64,
    samples: u64,
    degrees: f64,
}

impl RotationStats {
    fn reset(&mut self, timestamp: f64) {
        *self = RotationStats { started_at: timestamp, last_timestamp: timestamp, ..Default::default() };
    }

    fn record(&mut self, magnitude: f64, timestamp: f64) {
        let dt = (timestamp - self.last_timestamp).max(0.0);
        self.degrees += magnitude * dt;
        self.last_timestamp = timestamp;
        self.peak = self.peak.max(magnitude);
        self.speed_sum += magnitude;
        self.samples += 1;
    }

    fn summary(&self, timestamp: f64) -> RotationSummary {
        RotationSummary {
            duration_secs: timestamp - self.started_at,
            peak_speed: self.peak,
            mean_speed: if self.samples > 0 { self.speed_sum / self.samples as f64 } else { 0.0 },
            degrees: self.degrees,
        }
    }
}

/// Rotating/still hysteresis with a stillness hold.
///
/// Stillness policy: a sample above the high threshold refreshes the
/// last-motion time and marks the device spinning; a sample below half the
/// threshold clears spinning. The pause edge fires once spinning is clear
/// *and* the hold time has passed since the last qualifying sample.
pub struct MotionStateMachine {
    config: MotionConfig,
    phase: MotionPhase,
    spinning: bool,
    last_motion: f64,
    last_transition: f64,
    stats: RotationStats,
    rotations: u64,
}

impl MotionStateMachine {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            phase: MotionPhase::Still,
            spinning: false,
            last_motion: 0.0,
            last_transition: 0.0,
            stats: RotationStats::default(),
            rotations: 0,
        }
    }

    /// Feed one calibrated, signed rate. Only the magnitude is compared.
    pub fn update(&mut self, speed: f64, timestamp: f64) -> Option<MotionEdge> {
        let magnitude = speed.abs();

        if magnitude > self.config.high_threshold {
            self.last_motion = timestamp;
            self.spinning = true;
            if self.phase == MotionPhase::Still {
                self.phase = MotionPhase::Rotating;
                self.last_transition = timestamp;
                self.rotations += 1;
                self.stats.reset(timestamp);
                self.stats.record(magnitude, timestamp);
                return Some(MotionEdge::Resume);
            }
        } else if self.spinning && magnitude < self.config.release_threshold() {
            self.spinning = false;
        }

        if self.phase == MotionPhase::Rotating {
            self.stats.record(magnitude, timestamp);
            if !self.spinning && timestamp - self.last_motion > self.config.hold_secs {
                self.phase = MotionPhase::Still;
                self.last_transition = timestamp;
                return Some(MotionEdge::Pause(self.stats.summary(self.last_motion)));
            }
        }

        None
    }

    pub fn phase(&self) -> MotionPhase {
        self.phase
    }

    pub fn is_spinning(&self) -> bool {
        self.spinning
    }

    pub fn last_transition(&self) -> f64 {
        self.last_transition
    }

    pub fn last_motion(&self) -> f64 {
        self.last_motion
    }

    pub fn rotations(&self) -> u64 {
        self.rotations
    }
}

/// One-shot handoff between the resume edge and the dispatch it enables.
///
/// Armed when rotation starts; the first pause-edge dispatch takes it, so any
/// further attempt in the same stillness period finds it empty.
#[derive(Debug, Default)]
pub struct PauseLatch {
    armed: AtomicBool,
}

impl PauseLatch {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub fn take(&self) -> bool {
        self.armed.swap(false, Ordering::AcqRel)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.05;

    fn machine() -> MotionStateMachine {
        MotionStateMachine::new(MotionConfig { high_threshold: 200.0, hold_secs: 2.0 })
    }

    /// Feed `speed` from `start` for `secs`, collecting edges.
    fn feed(m: &mut MotionStateMachine, speed: f64, start: f64, secs: f64) -> Vec<MotionEdge> {
        let steps = (secs / DT).round() as usize;
        (0..steps)
            .filter_map(|i| m.update(speed, start + i as f64 * DT))
            .collect()
    }

    #[test]
    fn test_boot_without_motion_never_pauses() {
        let mut m = machine();
        let edges = feed(&mut m, 0.0, 0.0, 10.0);
        assert!(edges.is_empty());
        assert_eq!(m.phase(), MotionPhase::Still);
    }

    #[test]
    fn test_resume_is_immediate() {
        let mut m = machine();
        assert_eq!(m.update(250.0, 0.0), Some(MotionEdge::Resume));
        assert_eq!(m.phase(), MotionPhase::Rotating);
        assert_eq!(m.rotations(), 1);
    }

    #[test]
    fn test_negative_speed_counts_as_rotation() {
        let mut m = machine();
        assert_eq!(m.update(-250.0, 0.0), Some(MotionEdge::Resume));
    }

    #[test]
    fn test_pause_fires_once_after_hold() {
        let mut m = machine();
        let spin = feed(&mut m, 300.0, 0.0, 3.0);
        assert_eq!(spin, vec![MotionEdge::Resume]);

        // Still for 1.9 s: below threshold but hold not yet elapsed
        let early = feed(&mut m, 0.0, 3.0, 1.9);
        assert!(early.is_empty());
        assert_eq!(m.phase(), MotionPhase::Rotating);

        let late = feed(&mut m, 0.0, 4.9, 5.0);
        assert_eq!(late.len(), 1);
        assert!(matches!(late[0], MotionEdge::Pause(_)));
        assert_eq!(m.phase(), MotionPhase::Still);
    }

    #[test]
    fn test_hold_must_be_strictly_exceeded() {
        let mut m = machine();
        assert_eq!(m.update(300.0, 1.0), Some(MotionEdge::Resume));
        // Exactly the hold after the last motion: not yet
        assert_eq!(m.update(0.0, 3.0), None);
        assert_eq!(m.phase(), MotionPhase::Rotating);
        assert!(matches!(m.update(0.0, 3.25), Some(MotionEdge::Pause(_))));
    }

    #[test]
    fn test_mid_band_speed_keeps_rotating() {
        let mut m = machine();
        feed(&mut m, 300.0, 0.0, 1.0);
        // Between 100 and 200 deg/s: no longer qualifying, but not released
        let edges = feed(&mut m, 150.0, 1.0, 5.0);
        assert!(edges.is_empty());
        assert!(m.is_spinning());

        let edges = feed(&mut m, 50.0, 6.0, 2.5);
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_brief_spike_restarts_hold() {
        let mut m = machine();
        feed(&mut m, 300.0, 0.0, 1.0);
        feed(&mut m, 0.0, 1.0, 1.5);
        // Spike while still rotating: refreshes last motion, no new resume
        assert_eq!(m.update(300.0, 2.5), None);
        let edges = feed(&mut m, 0.0, 2.55, 1.9);
        assert!(edges.is_empty());
        let edges = feed(&mut m, 0.0, 4.45, 1.0);
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_pause_summary() {
        let mut m = machine();
        feed(&mut m, 360.0, 0.0, 2.0);
        let edges = feed(&mut m, 0.0, 2.0, 3.0);
        match edges.as_slice() {
            [MotionEdge::Pause(summary)] => {
                assert!((summary.peak_speed - 360.0).abs() < 1e-9);
                assert!((summary.revolutions() - 1.95).abs() < 0.06);
                assert!(summary.duration_secs > 1.9);
            }
            other => panic!("unexpected edges: {:?}", other),
        }
    }

    #[test]
    fn test_repeated_cycles() {
        let mut m = machine();
        let mut pauses = 0;
        let mut resumes = 0;
        for cycle in 0..3 {
            let start = cycle as f64 * 10.0;
            for edge in feed(&mut m, 300.0, start, 3.0).into_iter().chain(feed(&mut m, 0.0, start + 3.0, 7.0)) {
                match edge {
                    MotionEdge::Resume => resumes += 1,
                    MotionEdge::Pause(_) => pauses += 1,
                }
            }
        }
        assert_eq!(resumes, 3);
        assert_eq!(pauses, 3);
        assert_eq!(m.rotations(), 3);
    }

    #[test]
    fn test_latch_is_one_shot() {
        let latch = PauseLatch::default();
        assert!(!latch.take());
        latch.arm();
        assert!(latch.is_armed());
        assert!(latch.take());
        assert!(!latch.take());
    }
}
