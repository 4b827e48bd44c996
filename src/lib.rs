//! Gyroscope-driven pattern controller.
//!
//! Reads an angular-rate sensor, turns spin/stop cycles into motion edges,
//! and on each pause tells every peer on the network to switch to the next
//! pattern from a catalog learned at connect time. A connectivity supervisor
//! and a liveness watchdog keep it running unattended.

pub mod catalog;
pub mod conditioner;
pub mod config;
pub mod connectivity;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod live_status;
pub mod motion;
pub mod peer_client;
pub mod portal;
pub mod sensors;
pub mod storage;
pub mod types;
pub mod watchdog;

pub use config::ControllerConfig;
pub use controller::Controller;
pub use error::{ControllerError, Result};
