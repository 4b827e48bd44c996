use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};
use crate::storage::BlobStore;

pub const MAX_PROFILES: usize = 3;

/// Slot index reported for the built-in fallback network.
pub const FALLBACK_SLOT: u8 = MAX_PROFILES as u8;

/// Credentials for one network.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    #[serde(rename = "ssid", default)]
    pub name: String,
    #[serde(rename = "password", default)]
    pub secret: String,
    #[serde(default)]
    pub enabled: bool,
}

impl NetworkProfile {
    pub fn new(name: &str, secret: &str) -> Self {
        Self { name: name.to_string(), secret: secret.to_string(), enabled: true }
    }

    /// Worth an attempt: switched on and named.
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.name.is_empty()
    }

    pub fn redacted(&self) -> Self {
        Self { secret: String::new(), ..self.clone() }
    }
}

/// Persisted user networks plus the fallback switch.
///
/// Stored as one JSON blob:
/// `{"networks":[{"ssid","password","enabled"} x3],"fallbackEnabled","currentNetwork"}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSettings {
    #[serde(default)]
    pub networks: Vec<NetworkProfile>,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    #[serde(default)]
    pub current_network: u8,
}

fn default_true() -> bool {
    true
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            networks: vec![NetworkProfile::default(); MAX_PROFILES],
            fallback_enabled: true,
            current_network: 0,
        }
    }
}

impl NetworkSettings {
    /// Pad or truncate to exactly `MAX_PROFILES` slots.
    pub fn normalized(mut self) -> Self {
        self.networks.resize(MAX_PROFILES, NetworkProfile::default());
        if self.current_network > FALLBACK_SLOT {
            self.current_network = 0;
        }
        self
    }

    pub fn redacted(&self) -> Self {
        Self {
            networks: self.networks.iter().map(NetworkProfile::redacted).collect(),
            ..self.clone()
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ControllerError::Storage(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice::<Self>(bytes)
            .map(Self::normalized)
            .map_err(|e| ControllerError::Storage(e.to_string()))
    }

    pub fn save(&self, store: &dyn BlobStore, blob: &str) -> Result<()> {
        store.set(blob, &self.to_bytes()?)
    }

    /// Load persisted settings; a missing or malformed blob is replaced by
    /// defaults, which are written back.
    pub fn load_or_reset(store: &dyn BlobStore, blob: &str) -> Self {
        let loaded = match store.get(blob) {
            Ok(Some(bytes)) => Self::from_bytes(&bytes).map_err(|e| {
                log::warn!("[WIFI] Failed to parse network settings: {}", e);
            }),
            Ok(None) => {
                log::info!("[WIFI] No network settings found, using defaults");
                Err(())
            }
            Err(e) => {
                log::warn!("[WIFI] Failed to read network settings: {}", e);
                Err(())
            }
        };

        loaded.unwrap_or_else(|_| {
            let defaults = Self::default();
            if let Err(e) = defaults.save(store, blob) {
                log::error!("[WIFI] Failed to persist default settings: {}", e);
            }
            defaults
        })
    }
}
