use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Duration, Instant};

use super::link::WifiLink;
use super::profiles::{NetworkProfile, NetworkSettings, FALLBACK_SLOT};
use crate::error::Result;
use crate::live_status::SharedStatus;
use crate::storage::BlobStore;
use crate::watchdog::Watchdog;

/// Which profile carries the current connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileSlot {
    User(usize),
    Fallback,
}

impl ProfileSlot {
    pub fn index(self) -> u8 {
        match self {
            ProfileSlot::User(i) => i as u8,
            ProfileSlot::Fallback => FALLBACK_SLOT,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectivityState {
    pub active: Option<ProfileSlot>,
    pub connected: bool,
}

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub attempt_timeout: Duration,
    pub poll_interval: Duration,
    pub access_point_name: String,
    pub settings_blob: String,
}

/// Requests from the service loop. The supervisor is the only writer of the
/// persisted settings, so saves and resets go through here.
pub enum SupervisorCommand {
    Save { settings: NetworkSettings, reply: oneshot::Sender<Result<()>> },
    Reset { reply: oneshot::Sender<Result<()>> },
    Snapshot { reply: oneshot::Sender<NetworkSettings> },
}

/// Ordered multi-network connection with access-point fallback.
///
/// # Policy
/// - Enabled, named user profiles in slot order, each bounded by the attempt
///   timeout
/// - Then the built-in fallback, if enabled
/// - Then DISCONNECTED: start the local access point and stop trying until a
///   save supplies new settings
pub struct ConnectivitySupervisor<L> {
    link: L,
    store: Arc<dyn BlobStore>,
    settings: NetworkSettings,
    fallback: NetworkProfile,
    config: SupervisorConfig,
    watchdog: Arc<Watchdog>,
    status: Arc<SharedStatus>,
    state: ConnectivityState,
    portal_active: bool,
}

impl<L: WifiLink> ConnectivitySupervisor<L> {
    pub fn new(
        link: L,
        store: Arc<dyn BlobStore>,
        fallback: NetworkProfile,
        config: SupervisorConfig,
        watchdog: Arc<Watchdog>,
        status: Arc<SharedStatus>,
    ) -> Self {
        let settings = NetworkSettings::load_or_reset(store.as_ref(), &config.settings_blob);
        Self {
            link,
            store,
            settings,
            fallback,
            config,
            watchdog,
            status,
            state: ConnectivityState::default(),
            portal_active: false,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    pub fn is_portal_active(&self) -> bool {
        self.portal_active
    }

    /// Walk the profiles once. Falls back to access-point mode on failure.
    pub async fn connect(&mut self) -> ConnectivityState {
        self.state = ConnectivityState::default();

        let mut candidates: Vec<(ProfileSlot, NetworkProfile)> = self
            .settings
            .networks
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_usable())
            .map(|(i, p)| (ProfileSlot::User(i), p.clone()))
            .collect();
        if self.settings.fallback_enabled && !self.fallback.name.is_empty() {
            candidates.push((ProfileSlot::Fallback, self.fallback.clone()));
        }

        for (slot, profile) in candidates {
            if self.attempt(&profile).await {
                log::info!("[WIFI] ✓ Connected to {} ({:?})", profile.name, slot);
                self.settings.current_network = slot.index();
                self.state = ConnectivityState { active: Some(slot), connected: true };
                if self.portal_active {
                    if let Err(e) = self.link.stop_access_point() {
                        log::warn!("[WIFI] Failed to stop access point: {}", e);
                    }
                    self.portal_active = false;
                }
                self.publish();
                return self.state;
            }
        }

        log::warn!("[WIFI] All networks failed, starting access point {}", self.config.access_point_name);
        match self.link.start_access_point(&self.config.access_point_name) {
            Ok(()) => self.portal_active = true,
            Err(e) => log::error!("[WIFI] Failed to start access point: {}", e),
        }
        self.publish();
        self.state
    }

    async fn attempt(&mut self, profile: &NetworkProfile) -> bool {
        log::info!("[WIFI] Connecting to {}", profile.name);
        if let Err(e) = self.link.begin(&profile.name, &profile.secret) {
            log::warn!("[WIFI] {}", e);
            return false;
        }

        let deadline = Instant::now() + self.config.attempt_timeout;
        loop {
            // Shares the control loop's stamp, so a stalled loop goes unseen
            // until the connection sequence ends
            self.watchdog.feed();
            if self.link.is_connected() {
                return true;
            }
            if Instant::now() >= deadline {
                log::warn!("[WIFI] {} timed out after {:?}", profile.name, self.config.attempt_timeout);
                return false;
            }
            sleep(self.config.poll_interval).await;
        }
    }

    fn publish(&self) {
        self.status
            .set_link(self.state.connected, self.portal_active, self.settings.current_network);
    }

    /// Replace the whole record, persist it, and retry if currently offline.
    pub async fn save(&mut self, settings: NetworkSettings) -> Result<()> {
        let mut settings = settings.normalized();
        settings.current_network = self.settings.current_network;
        settings.save(self.store.as_ref(), &self.config.settings_blob)?;
        self.settings = settings;
        log::info!("[WIFI] Settings saved");
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        let defaults = NetworkSettings::default();
        defaults.save(self.store.as_ref(), &self.config.settings_blob)?;
        self.settings = defaults;
        log::info!("[WIFI] Settings reset to defaults");
        Ok(())
    }

    /// Serve commands until every sender is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SupervisorCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                SupervisorCommand::Save { settings, reply } => {
                    let result = self.save(settings).await;
                    let saved = result.is_ok();
                    let _ = reply.send(result);
                    if saved && !self.state.connected {
                        log::info!("[WIFI] Attempting to reconnect with new settings");
                        self.connect().await;
                    }
                }
                SupervisorCommand::Reset { reply } => {
                    let _ = reply.send(self.reset());
                }
                SupervisorCommand::Snapshot { reply } => {
                    let _ = reply.send(self.settings.clone());
                }
            }
        }
        log::info!("[WIFI] Supervisor command channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControllerError;
    use crate::storage::MemoryBlobStore;
    use crate::watchdog::Verdict;
    use std::sync::Mutex;

    /// Link that joins only the named networks, recording every call.
    #[derive(Clone, Default)]
    struct ScriptedLink {
        reachable: Vec<String>,
        calls: Arc<Mutex<Vec<String>>>,
        joined: Option<String>,
    }

    impl WifiLink for ScriptedLink {
        fn begin(&mut self, name: &str, _secret: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("begin:{}", name));
            self.joined = self.reachable.iter().find(|n| *n == name).cloned();
            Ok(())
        }

        fn is_connected(&mut self) -> bool {
            self.joined.is_some()
        }

        fn start_access_point(&mut self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("ap:{}", name));
            Ok(())
        }

        fn stop_access_point(&mut self) -> Result<()> {
            self.calls.lock().unwrap().push("ap-stop".to_string());
            Ok(())
        }
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            attempt_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(5),
            access_point_name: "Spinner-Config".to_string(),
            settings_blob: "settings.json".to_string(),
        }
    }

    fn store_with(settings: &NetworkSettings) -> Arc<dyn BlobStore> {
        let store = MemoryBlobStore::default();
        settings.save(&store, "settings.json").unwrap();
        Arc::new(store)
    }

    fn supervisor(link: ScriptedLink, store: Arc<dyn BlobStore>, fallback: NetworkProfile) -> ConnectivitySupervisor<ScriptedLink> {
        ConnectivitySupervisor::new(
            link,
            store,
            fallback,
            config(),
            Arc::new(Watchdog::new(Duration::from_secs(10), Duration::from_secs(1))),
            Arc::new(SharedStatus::new()),
        )
    }

    #[tokio::test]
    async fn test_everything_disabled_goes_straight_to_access_point() {
        let settings = NetworkSettings { fallback_enabled: false, ..Default::default() };
        let link = ScriptedLink::default();
        let calls = link.calls.clone();
        let mut sup = supervisor(link, store_with(&settings), NetworkProfile::new("fallback", "pw"));

        let state = sup.connect().await;

        assert!(!state.connected);
        assert_eq!(state.active, None);
        assert!(sup.is_portal_active());
        assert_eq!(*calls.lock().unwrap(), vec!["ap:Spinner-Config".to_string()]);
        assert!(sup.status.is_portal_active());
    }

    #[tokio::test]
    async fn test_profiles_tried_in_order_then_fallback() {
        let mut settings = NetworkSettings::default();
        settings.networks[0] = NetworkProfile::new("first", "a");
        settings.networks[1] = NetworkProfile { enabled: false, ..NetworkProfile::new("skipped", "b") };
        settings.networks[2] = NetworkProfile::new("third", "c");
        let link = ScriptedLink { reachable: vec!["fallback".to_string()], ..Default::default() };
        let calls = link.calls.clone();
        let mut sup = supervisor(link, store_with(&settings), NetworkProfile::new("fallback", "pw"));

        let state = sup.connect().await;

        assert_eq!(state, ConnectivityState { active: Some(ProfileSlot::Fallback), connected: true });
        assert_eq!(sup.settings().current_network, FALLBACK_SLOT);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["begin:first".to_string(), "begin:third".to_string(), "begin:fallback".to_string()]
        );
        assert!(sup.status.is_connected());
    }

    #[tokio::test]
    async fn test_connection_attempts_keep_watchdog_fed() {
        let mut settings = NetworkSettings { fallback_enabled: false, ..Default::default() };
        settings.networks[0] = NetworkProfile::new("unreachable", "a");
        let ceiling = Duration::from_millis(100);
        let watchdog = Arc::new(Watchdog::new(ceiling, Duration::from_millis(10)));
        let mut sup = ConnectivitySupervisor::new(
            ScriptedLink::default(),
            store_with(&settings),
            NetworkProfile::new("fallback", "pw"),
            SupervisorConfig { attempt_timeout: Duration::from_millis(400), ..config() },
            watchdog.clone(),
            Arc::new(SharedStatus::new()),
        );

        // Sample the silence while the attempt runs three ceilings long
        let sampler = {
            let watchdog = watchdog.clone();
            tokio::spawn(async move {
                let mut longest = Duration::ZERO;
                for _ in 0..60 {
                    longest = longest.max(watchdog.silence_at(Instant::now()));
                    sleep(Duration::from_millis(5)).await;
                }
                longest
            })
        };

        let started = Instant::now();
        let state = sup.connect().await;
        assert!(!state.connected);
        assert!(started.elapsed() >= Duration::from_millis(400));
        assert_eq!(watchdog.check_at(Instant::now(), false), Verdict::Alive);
        assert!(sampler.await.unwrap() < ceiling);
    }

    #[tokio::test]
    async fn test_first_reachable_profile_wins() {
        let mut settings = NetworkSettings::default();
        settings.networks[0] = NetworkProfile::new("down", "a");
        settings.networks[1] = NetworkProfile::new("up", "b");
        let link = ScriptedLink { reachable: vec!["up".to_string(), "fallback".to_string()], ..Default::default() };
        let mut sup = supervisor(link, store_with(&settings), NetworkProfile::new("fallback", "pw"));

        let state = sup.connect().await;
        assert_eq!(state.active, Some(ProfileSlot::User(1)));
        assert_eq!(sup.settings().current_network, 1);
    }

    #[tokio::test]
    async fn test_save_while_offline_reconnects() {
        let settings = NetworkSettings { fallback_enabled: false, ..Default::default() };
        let store = store_with(&settings);
        let link = ScriptedLink { reachable: vec!["new".to_string()], ..Default::default() };
        let calls = link.calls.clone();
        let mut sup = supervisor(link, store.clone(), NetworkProfile::default());
        sup.connect().await;
        let status = sup.status.clone();

        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(sup.run(rx));

        let mut update = NetworkSettings::default();
        update.networks[0] = NetworkProfile::new("new", "secret");
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(SupervisorCommand::Save { settings: update.clone(), reply: reply_tx }).await.unwrap();
        reply_rx.await.unwrap().unwrap();

        drop(tx);
        task.await.unwrap();

        let stored = NetworkSettings::from_bytes(&store.get("settings.json").unwrap().unwrap()).unwrap();
        assert_eq!(stored.networks[0], update.networks[0]);
        assert!(status.is_connected());
        assert!(!status.is_portal_active());
        assert!(calls.lock().unwrap().contains(&"ap-stop".to_string()));
    }

    #[tokio::test]
    async fn test_reset_restores_defaults() {
        let mut settings = NetworkSettings { fallback_enabled: false, ..Default::default() };
        settings.networks[0] = NetworkProfile::new("home", "pw");
        let store = store_with(&settings);
        let mut sup = supervisor(ScriptedLink::default(), store.clone(), NetworkProfile::default());

        sup.reset().unwrap();
        assert_eq!(sup.settings(), &NetworkSettings::default());
        let stored = NetworkSettings::from_bytes(&store.get("settings.json").unwrap().unwrap()).unwrap();
        assert_eq!(stored, NetworkSettings::default());
    }

    struct FailingStore;

    impl BlobStore for FailingStore {
        fn get(&self, _name: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        fn set(&self, _name: &str, _bytes: &[u8]) -> Result<()> {
            Err(ControllerError::Storage("read-only".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_settings() {
        let mut sup = supervisor(ScriptedLink::default(), Arc::new(FailingStore), NetworkProfile::default());
        let mut update = NetworkSettings::default();
        update.networks[0] = NetworkProfile::new("new", "secret");

        assert!(sup.save(update).await.is_err());
        assert_eq!(sup.settings(), &NetworkSettings::default());
    }
}
