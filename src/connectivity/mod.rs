pub mod link;
pub mod profiles;
pub mod supervisor;

pub use link::{NmcliLink, StaticLink, WifiLink};
pub use profiles::{NetworkProfile, NetworkSettings, FALLBACK_SLOT, MAX_PROFILES};
pub use supervisor::{
    ConnectivityState, ConnectivitySupervisor, ProfileSlot, SupervisorCommand, SupervisorConfig,
};
