use serde::{Deserialize, Serialize};
use std::fmt;

/// One angular-rate reading in deg/s.
///
/// `timestamp` is seconds on the source's monotonic clock.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RotationSample {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Physical axis the device spins around.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Mounted reversed, so readings are sign-inverted.
    X,
    #[default]
    Y,
    Z,
}

impl Axis {
    pub fn select(self, sample: &RotationSample) -> f64 {
        match self {
            Axis::X => -sample.x,
            Axis::Y => sample.y,
            Axis::Z => sample.z,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionPhase {
    Rotating,
    Still,
}

impl MotionPhase {
    pub fn as_u8(self) -> u8 {
        match self {
            MotionPhase::Rotating => 1,
            MotionPhase::Still => 0,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        if value == 1 {
            MotionPhase::Rotating
        } else {
            MotionPhase::Still
        }
    }
}

pub const PATTERN_MIN: u8 = 8;
pub const PATTERN_MAX: u8 = 69;

/// Remote-selectable pattern number understood by peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(pub u8);

impl PatternId {
    /// Accepts only the range peers understand.
    pub fn new(value: i64) -> Option<Self> {
        if (PATTERN_MIN as i64..=PATTERN_MAX as i64).contains(&value) {
            Some(PatternId(value as u8))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
