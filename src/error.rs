use thiserror::Error;

/// Controller error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("Sensor unavailable after {0} attempts")]
    SensorUnavailable(u32),

    #[error("Sensor read failed: {0}")]
    SensorRead(String),

    #[error("Peer {peer} unreachable: {reason}")]
    Transport { peer: String, reason: String },

    #[error("Peer {peer} returned HTTP {status}")]
    HttpStatus { peer: String, status: u16 },

    #[error("Malformed listing from {peer}: {reason}")]
    Listing { peer: String, reason: String },

    #[error("No peer returned a pattern listing")]
    NoListing,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network link error: {0}")]
    Link(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Connectivity supervisor stopped")]
    SupervisorGone,
}

pub type Result<T> = std::result::Result<T, ControllerError>;
