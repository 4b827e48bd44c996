use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::connectivity::NetworkProfile;
use crate::error::{ControllerError, Result};
use crate::types::Axis;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Upper bound on a per-peer selection send.
pub const MAX_SEND_TIMEOUT_MS: u64 = 2_000;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    // ── Sensor ──
    pub axis: Axis,
    pub poll_interval_ms: u64,
    pub sensor_retries: u32,
    pub sensor_retry_delay_ms: u64,

    // ── Conditioning ──
    pub calibration_window_ms: u64,
    pub filter_alpha: f64,

    // ── Motion ──
    /// deg/s; the release threshold is always half of this.
    pub high_threshold: f64,
    pub hold_ms: u64,

    // ── Peers ──
    pub peers: Vec<String>,
    pub send_timeout_ms: u64,
    pub discovery_timeout_ms: u64,

    // ── Connectivity ──
    pub connect_timeout_ms: u64,
    pub connect_poll_ms: u64,
    pub access_point_name: String,
    pub fallback: NetworkProfile,
    pub settings_blob: String,

    // ── Watchdog ──
    pub watchdog_interval_ms: u64,
    pub watchdog_ceiling_ms: u64,

    // ── Service ──
    pub portal_port: u16,
    pub debug: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            axis: Axis::Y,
            poll_interval_ms: 50,
            sensor_retries: 5,
            sensor_retry_delay_ms: 500,
            calibration_window_ms: 3_000,
            filter_alpha: 0.2,
            high_threshold: 200.0,
            hold_ms: 2_000,
            peers: vec!["192.168.1.1".to_string(), "192.168.1.78".to_string()],
            send_timeout_ms: 1_000,
            discovery_timeout_ms: 5_000,
            connect_timeout_ms: 20_000,
            connect_poll_ms: 500,
            access_point_name: "Spinner-Config".to_string(),
            fallback: NetworkProfile::default(),
            settings_blob: "settings.json".to_string(),
            watchdog_interval_ms: 1_000,
            watchdog_ceiling_ms: 10_000,
            portal_port: 80,
            debug: false,
        }
    }
}

impl ControllerConfig {
    /// Load from a JSON file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ControllerError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| ControllerError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.high_threshold > 0.0) {
            return Err(ControllerError::Config(format!(
                "high_threshold must be positive, got {}",
                self.high_threshold
            )));
        }
        if !(self.filter_alpha > 0.0 && self.filter_alpha <= 1.0) {
            return Err(ControllerError::Config(format!(
                "filter_alpha must be in (0, 1], got {}",
                self.filter_alpha
            )));
        }
        let timeouts = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("send_timeout_ms", self.send_timeout_ms),
            ("discovery_timeout_ms", self.discovery_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("connect_poll_ms", self.connect_poll_ms),
            ("watchdog_interval_ms", self.watchdog_interval_ms),
            ("watchdog_ceiling_ms", self.watchdog_ceiling_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ControllerError::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.watchdog_ceiling_ms <= self.poll_interval_ms {
            return Err(ControllerError::Config(
                "watchdog_ceiling_ms must exceed poll_interval_ms".to_string(),
            ));
        }
        if self.send_timeout_ms > MAX_SEND_TIMEOUT_MS {
            return Err(ControllerError::Config(format!(
                "send_timeout_ms must be at most {}, got {}",
                MAX_SEND_TIMEOUT_MS, self.send_timeout_ms
            )));
        }
        // A single blocking request must never outlast the watchdog
        for (name, value) in [
            ("send_timeout_ms", self.send_timeout_ms),
            ("discovery_timeout_ms", self.discovery_timeout_ms),
        ] {
            if value >= self.watchdog_ceiling_ms {
                return Err(ControllerError::Config(format!(
                    "{} ({}) must be below watchdog_ceiling_ms ({})",
                    name, value, self.watchdog_ceiling_ms
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn calibration_window_secs(&self) -> f64 {
        self.calibration_window_ms as f64 / 1000.0
    }

    pub fn hold_secs(&self) -> f64 {
        self.hold_ms as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.high_threshold, 200.0);
        assert_eq!(config.hold_ms, 2_000);
        assert_eq!(config.peers.len(), 2);
    }

    #[test]
    fn test_rejects_bad_alpha() {
        let config = ControllerConfig { filter_alpha: 1.5, ..Default::default() };
        assert!(matches!(config.validate(), Err(ControllerError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = ControllerConfig { send_timeout_ms: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_long_send_timeout() {
        let config = ControllerConfig { send_timeout_ms: 5_000, ..Default::default() };
        assert!(matches!(config.validate(), Err(ControllerError::Config(_))));

        let config = ControllerConfig { send_timeout_ms: MAX_SEND_TIMEOUT_MS, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeouts_must_fit_under_watchdog() {
        let config = ControllerConfig { discovery_timeout_ms: 15_000, ..Default::default() };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            watchdog_ceiling_ms: 1_500,
            send_timeout_ms: 1_500,
            discovery_timeout_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{"high_threshold": 120.0, "axis": "z"}"#).unwrap();
        assert_eq!(config.high_threshold, 120.0);
        assert_eq!(config.axis, Axis::Z);
        assert_eq!(config.hold_ms, 2_000);
    }
}
