use serde_json::Value;
use std::process::Command;
use std::time::Instant;
use tokio::time::{sleep, Duration};

use crate::error::{ControllerError, Result};
use crate::types::RotationSample;
use crate::watchdog::Watchdog;

const RAD_TO_DEG: f64 = 57.295_779_513_082_32;

/// Capability yielding angular-rate samples in deg/s.
pub trait GyroSource: Send {
    /// Check the device answers at all. Called during bring-up.
    fn probe(&mut self) -> Result<()>;
    fn read(&mut self) -> Result<RotationSample>;
}

/// Gyroscope read through Termux:API's `termux-sensor`.
pub struct TermuxGyro {
    started: Instant,
}

impl TermuxGyro {
    pub fn new() -> Self {
        Self { started: Instant::now() }
    }
}

impl Default for TermuxGyro {
    fn default() -> Self {
        Self::new()
    }
}

impl GyroSource for TermuxGyro {
    fn probe(&mut self) -> Result<()> {
        self.read().map(|_| ())
    }

    fn read(&mut self) -> Result<RotationSample> {
        let output = Command::new("termux-sensor")
            .args(["-n", "1", "-s", "gyroscope"])
            .output()
            .map_err(|e| ControllerError::SensorRead(format!("termux-sensor: {}", e)))?;
        let text = String::from_utf8_lossy(&output.stdout);
        let [x, y, z] = parse_termux_gyro(&text)?;

        Ok(RotationSample {
            timestamp: self.started.elapsed().as_secs_f64(),
            x: x * RAD_TO_DEG,
            y: y * RAD_TO_DEG,
            z: z * RAD_TO_DEG,
        })
    }
}

/// Pull `[x, y, z]` (rad/s) out of a termux-sensor dump.
///
/// The sensor key is vendor-specific (e.g. "BMI160 Gyroscope"), so the first
/// entry carrying a three-element `values` array is taken.
pub fn parse_termux_gyro(text: &str) -> Result<[f64; 3]> {
    let root: Value = serde_json::from_str(text.trim())
        .map_err(|e| ControllerError::SensorRead(format!("bad sensor output: {}", e)))?;

    let values = root
        .as_object()
        .and_then(|sensors| sensors.values().find_map(|s| s.get("values")?.as_array()))
        .ok_or_else(|| ControllerError::SensorRead("no gyroscope values".to_string()))?;

    match values.as_slice() {
        [x, y, z, ..] => match (x.as_f64(), y.as_f64(), z.as_f64()) {
            (Some(x), Some(y), Some(z)) => Ok([x, y, z]),
            _ => Err(ControllerError::SensorRead("non-numeric gyroscope values".to_string())),
        },
        _ => Err(ControllerError::SensorRead(format!("expected 3 values, got {}", values.len()))),
    }
}

/// Bench source: spins about Y for `spin_secs`, then rests for `rest_secs`.
pub struct SimulatedGyro {
    started: Instant,
    clock: Option<f64>,
    step: f64,
    spin_secs: f64,
    rest_secs: f64,
    rate: f64,
    bias: f64,
}

impl SimulatedGyro {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            clock: None,
            step: 0.0,
            spin_secs: 6.0,
            rest_secs: 4.0,
            rate: 360.0,
            bias: 1.5,
        }
    }

    /// Deterministic clock advancing `step` seconds per read, for tests.
    pub fn stepped(step: f64) -> Self {
        Self { clock: Some(0.0), step, ..Self::new() }
    }

    fn now(&mut self) -> f64 {
        match self.clock.as_mut() {
            Some(t) => {
                let now = *t;
                *t += self.step;
                now
            }
            None => self.started.elapsed().as_secs_f64(),
        }
    }

    /// Rate about Y at time `t`. Cycles start at rest so calibration sees
    /// only the bias.
    pub fn rate_at(&self, t: f64) -> f64 {
        let period = self.spin_secs + self.rest_secs;
        let phase = t % period;
        if phase < self.rest_secs {
            self.bias + (t * 7.0).sin() * 0.5
        } else {
            self.bias + self.rate
        }
    }
}

impl Default for SimulatedGyro {
    fn default() -> Self {
        Self::new()
    }
}

impl GyroSource for SimulatedGyro {
    fn probe(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<RotationSample> {
        let t = self.now();
        Ok(RotationSample {
            timestamp: t,
            x: (t * 0.5).sin() * 0.3,
            y: self.rate_at(t),
            z: (t * 0.3).cos() * 0.2,
        })
    }
}

/// Probe the sensor up to `retries` times, feeding the watchdog between
/// attempts. `None` means motion is disabled for this session.
pub async fn bring_up(
    mut source: Box<dyn GyroSource>,
    retries: u32,
    delay: Duration,
    watchdog: &Watchdog,
) -> Option<Box<dyn GyroSource>> {
    for attempt in 1..=retries {
        watchdog.feed();
        match source.probe() {
            Ok(()) => {
                log::info!("[SENSOR] ✓ Gyroscope ready (attempt {}/{})", attempt, retries);
                return Some(source);
            }
            Err(e) => {
                log::warn!("[SENSOR] Attempt {}/{} failed: {}", attempt, retries, e);
                if attempt < retries {
                    sleep(delay).await;
                }
            }
        }
    }

    log::error!("[SENSOR] ✗ {}, motion detection disabled", ControllerError::SensorUnavailable(retries));
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_termux_output() {
        let text = r#"{
  "BMI160 Gyroscope": {
    "values": [0.01, 3.14159, -0.5]
  }
}"#;
        let [x, y, z] = parse_termux_gyro(text).unwrap();
        assert_relative_eq!(x, 0.01);
        assert_relative_eq!(y, 3.14159);
        assert_relative_eq!(z, -0.5);
    }

    #[test]
    fn test_parse_rejects_empty_and_short() {
        assert!(parse_termux_gyro("").is_err());
        assert!(parse_termux_gyro("{}").is_err());
        assert!(parse_termux_gyro(r#"{"gyro": {"values": [1.0, 2.0]}}"#).is_err());
    }

    #[test]
    fn test_simulator_alternates_rest_and_spin() {
        let sim = SimulatedGyro::new();
        assert!(sim.rate_at(1.0).abs() < 5.0);
        assert!(sim.rate_at(5.0) > 300.0);
        assert!(sim.rate_at(11.0).abs() < 5.0);
    }

    #[test]
    fn test_stepped_clock_advances() {
        let mut sim = SimulatedGyro::stepped(0.05);
        let a = sim.read().unwrap();
        let b = sim.read().unwrap();
        assert_relative_eq!(a.timestamp, 0.0);
        assert_relative_eq!(b.timestamp, 0.05);
    }

    struct Flaky {
        failures_left: u32,
    }

    impl GyroSource for Flaky {
        fn probe(&mut self) -> Result<()> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                Err(ControllerError::SensorRead("i2c nack".to_string()))
            } else {
                Ok(())
            }
        }

        fn read(&mut self) -> Result<RotationSample> {
            Err(ControllerError::SensorRead("unused".to_string()))
        }
    }

    fn watchdog() -> Watchdog {
        Watchdog::new(Duration::from_secs(10), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_bring_up_retries_then_succeeds() {
        let source = Box::new(Flaky { failures_left: 2 });
        let ready = bring_up(source, 5, Duration::from_millis(1), &watchdog()).await;
        assert!(ready.is_some());
    }

    #[tokio::test]
    async fn test_bring_up_gives_up() {
        let source = Box::new(Flaky { failures_left: 10 });
        let ready = bring_up(source, 5, Duration::from_millis(1), &watchdog()).await;
        assert!(ready.is_none());
    }
}
