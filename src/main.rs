use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use pattern_spinner::config::ControllerConfig;
use pattern_spinner::connectivity::{
    ConnectivitySupervisor, NetworkProfile, NmcliLink, StaticLink, SupervisorCommand, SupervisorConfig,
    WifiLink,
};
use pattern_spinner::controller::Controller;
use pattern_spinner::dispatch::Dispatcher;
use pattern_spinner::live_status::SharedStatus;
use pattern_spinner::peer_client::HttpPeerClient;
use pattern_spinner::portal::{self, PortalState};
use pattern_spinner::sensors::{self, GyroSource, SimulatedGyro, TermuxGyro};
use pattern_spinner::storage::{BlobStore, FileBlobStore};
use pattern_spinner::types::Axis;
use pattern_spinner::watchdog::{watchdog_task, ExitRestart, Watchdog, RESTART_EXIT_CODE};

#[derive(Parser, Debug)]
#[command(name = "pattern_spinner")]
#[command(about = "Spin to cycle patterns on networked peers", long_about = None)]
struct Args {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rotation axis
    #[arg(long, value_enum)]
    axis: Option<Axis>,

    /// Rotation threshold in deg/s (release is half)
    #[arg(long)]
    threshold: Option<f64>,

    /// Stillness hold before a pause fires, in ms
    #[arg(long)]
    hold_ms: Option<u64>,

    /// Peer address (repeatable, replaces configured peers)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Directory for persisted network settings
    #[arg(long, default_value = "spinner_data")]
    data_dir: PathBuf,

    /// Configuration service port
    #[arg(long)]
    port: Option<u16>,

    /// Access point name shown when no network is reachable
    #[arg(long)]
    access_point_name: Option<String>,

    /// Built-in fallback network
    #[arg(long)]
    fallback_ssid: Option<String>,

    #[arg(long, default_value = "")]
    fallback_password: String,

    /// Write a live status JSON snapshot here every 2s
    #[arg(long)]
    status_file: Option<String>,

    /// Simulated sensor and an always-online link
    #[arg(long)]
    simulate: bool,

    /// Per-sample telemetry
    #[arg(long)]
    debug: bool,

    /// Relaunch the controller whenever the watchdog restarts it
    #[arg(long)]
    supervise: bool,
}

impl Args {
    fn load_config(&self) -> Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::from_file(path)?,
            None => ControllerConfig::default(),
        };

        if let Some(axis) = self.axis {
            config.axis = axis;
        }
        if let Some(threshold) = self.threshold {
            config.high_threshold = threshold;
        }
        if let Some(hold_ms) = self.hold_ms {
            config.hold_ms = hold_ms;
        }
        if !self.peers.is_empty() {
            config.peers = self.peers.clone();
        }
        if let Some(port) = self.port {
            config.portal_port = port;
        }
        if let Some(name) = &self.access_point_name {
            config.access_point_name = name.clone();
        }
        if let Some(ssid) = &self.fallback_ssid {
            config.fallback = NetworkProfile::new(ssid, &self.fallback_password);
        }
        config.debug |= self.debug;

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if args.supervise {
        return supervise().await;
    }

    let config = args.load_config().context("loading configuration")?;

    println!("[{}] Pattern Spinner Starting", ts_now());
    println!("  Axis: {:?}", config.axis);
    println!("  Threshold: {} deg/s (release {})", config.high_threshold, config.high_threshold / 2.0);
    println!("  Hold: {} ms", config.hold_ms);
    println!("  Peers: {}", config.peers.join(", "));
    println!("  Data Dir: {}", args.data_dir.display());
    println!("  Mode: {}", if args.simulate { "simulated" } else { "termux + nmcli" });

    let status = Arc::new(SharedStatus::new());
    let watchdog = Arc::new(Watchdog::new(
        Duration::from_millis(config.watchdog_ceiling_ms),
        Duration::from_millis(config.watchdog_interval_ms),
    ));
    tokio::spawn(watchdog_task(watchdog.clone(), status.clone(), ExitRestart));

    // Connectivity runs alongside the control loop; it never gates motion
    let store: Arc<dyn BlobStore> = Arc::new(
        FileBlobStore::new(args.data_dir.clone())
            .with_context(|| format!("opening {}", args.data_dir.display()))?,
    );
    let (commands, command_rx) = mpsc::channel(8);
    if args.simulate {
        start_supervisor(StaticLink::new(true), &config, store, &watchdog, &status, command_rx);
    } else {
        start_supervisor(NmcliLink::new(), &config, store, &watchdog, &status, command_rx);
    }

    let client = HttpPeerClient::new(config.send_timeout(), config.discovery_timeout())?;
    let dispatcher = Dispatcher::new(Arc::new(client), config.peers.clone(), config.send_timeout());

    let portal_state = PortalState {
        status: status.clone(),
        supervisor: commands,
        dispatcher: dispatcher.clone(),
    };
    let port = config.portal_port;
    tokio::spawn(async move {
        if let Err(e) = portal::serve(portal_state, port).await {
            log::error!("[PORTAL] {}", e);
        }
    });

    let source: Box<dyn GyroSource> = if args.simulate {
        Box::new(SimulatedGyro::new())
    } else {
        Box::new(TermuxGyro::new())
    };
    let source = sensors::bring_up(
        source,
        config.sensor_retries,
        Duration::from_millis(config.sensor_retry_delay_ms),
        &watchdog,
    )
    .await;

    let controller =
        Controller::new(&config, dispatcher, status.clone(), watchdog.clone()).with_status_file(args.status_file.clone());

    println!("[{}] Running (Ctrl+C to stop)", ts_now());
    tokio::select! {
        _ = controller.run(source) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("[{}] Interrupted, stopping...", ts_now());
        }
    }

    if let Some(path) = &args.status_file {
        let _ = status.snapshot().save(path);
    }
    Ok(())
}

fn start_supervisor<L: WifiLink + 'static>(
    link: L,
    config: &ControllerConfig,
    store: Arc<dyn BlobStore>,
    watchdog: &Arc<Watchdog>,
    status: &Arc<SharedStatus>,
    commands: mpsc::Receiver<SupervisorCommand>,
) {
    let mut supervisor = ConnectivitySupervisor::new(
        link,
        store,
        config.fallback.clone(),
        SupervisorConfig {
            attempt_timeout: Duration::from_millis(config.connect_timeout_ms),
            poll_interval: Duration::from_millis(config.connect_poll_ms),
            access_point_name: config.access_point_name.clone(),
            settings_blob: config.settings_blob.clone(),
        },
        watchdog.clone(),
        status.clone(),
    );
    tokio::spawn(async move {
        supervisor.connect().await;
        supervisor.run(commands).await;
    });
}

/// Relaunch this binary (minus `--supervise`) each time it exits for a
/// watchdog restart or is killed by a signal.
async fn supervise() -> Result<()> {
    let exe = std::env::current_exe().context("locating own executable")?;
    let args: Vec<String> = std::env::args().skip(1).filter(|a| a != "--supervise").collect();

    loop {
        log::info!("[SUPERVISE] Launching {}", exe.display());
        let exit = tokio::process::Command::new(&exe)
            .args(&args)
            .status()
            .await
            .context("launching controller")?;

        match exit.code() {
            Some(0) => return Ok(()),
            Some(RESTART_EXIT_CODE) | None => {
                log::warn!("[SUPERVISE] Controller exited ({}), relaunching", exit);
                sleep(Duration::from_secs(1)).await;
            }
            Some(code) => bail!("controller failed with exit code {}", code),
        }
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
