// conditioner.rs: gyro bias calibration and smoothing
//
// Pure computation: raw RotationSample in, calibrated single-axis rate out.
// Nothing here touches the runtime, so recorded sessions replay through it
// unchanged.

use crate::types::{Axis, RotationSample};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationPhase {
    Calibrating,
    Ready,
}

/// Bias accumulated over the startup window.
#[derive(Clone, Debug)]
pub struct CalibrationState {
    sum: f64,
    count: u64,
    started_at: Option<f64>,
    offset: f64,
    phase: CalibrationPhase,
}

impl CalibrationState {
    fn new() -> Self {
        Self {
            sum: 0.0,
            count: 0,
            started_at: None,
            offset: 0.0,
            phase: CalibrationPhase::Calibrating,
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn sample_count(&self) -> u64 {
        self.count
    }
}

/// Output of one conditioning step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Conditioned {
    /// Axis value before bias removal (sign-corrected).
    pub raw: f64,
    /// `None` until calibration has finished.
    pub calibrated: Option<f64>,
    /// Low-passed magnitude for display.
    pub filtered: f64,
}

pub struct SignalConditioner {
    axis: Axis,
    window_secs: f64,
    alpha: f64,
    calibration: CalibrationState,
    filtered: f64,
}

impl SignalConditioner {
    pub fn new(axis: Axis, window_secs: f64, alpha: f64) -> Self {
        Self {
            axis,
            window_secs,
            alpha,
            calibration: CalibrationState::new(),
            filtered: 0.0,
        }
    }

    pub fn condition(&mut self, sample: &RotationSample) -> Conditioned {
        let raw = self.axis.select(sample);

        if self.calibration.phase == CalibrationPhase::Calibrating {
            let started_at = *self.calibration.started_at.get_or_insert(sample.timestamp);
            if sample.timestamp - started_at < self.window_secs {
                self.calibration.sum += raw;
                self.calibration.count += 1;
                return Conditioned { raw, calibrated: None, filtered: self.filtered };
            }
            self.finish_calibration();
        }

        let calibrated = raw - self.calibration.offset;
        self.filtered = self.alpha * calibrated.abs() + (1.0 - self.alpha) * self.filtered;

        Conditioned { raw, calibrated: Some(calibrated), filtered: self.filtered }
    }

    fn finish_calibration(&mut self) {
        let cal = &mut self.calibration;
        cal.offset = if cal.count > 0 { cal.sum / cal.count as f64 } else { 0.0 };
        cal.phase = CalibrationPhase::Ready;
        // No plausibility check: a saturated sensor calibrates to garbage.
        log::info!(
            "[CALIB] Gyro offset {:.3} deg/s from {} samples ({:?} axis)",
            cal.offset,
            cal.count,
            self.axis
        );
    }

    pub fn is_ready(&self) -> bool {
        self.calibration.phase == CalibrationPhase::Ready
    }

    pub fn calibration(&self) -> &CalibrationState {
        &self.calibration
    }

    pub fn filtered_speed(&self) -> f64 {
        self.filtered
    }
}
