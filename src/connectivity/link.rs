use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use crate::error::{ControllerError, Result};

/// Radio-level network operations the supervisor drives.
///
/// `begin` starts joining and returns immediately; the supervisor polls
/// `is_connected` under its own timeout.
pub trait WifiLink: Send {
    fn begin(&mut self, name: &str, secret: &str) -> Result<()>;
    fn is_connected(&mut self) -> bool;
    fn start_access_point(&mut self, name: &str) -> Result<()>;
    fn stop_access_point(&mut self) -> Result<()>;
}

/// NetworkManager backend driven through `nmcli`.
///
/// A join counts only once its `connect` child has exited cleanly and the
/// wifi device reports the requested network as active. Another uplink
/// (ethernet, a different SSID) never satisfies `is_connected`.
pub struct NmcliLink {
    program: PathBuf,
    pending: Option<Child>,
    target: Option<String>,
    joined: Option<bool>,
    hotspot_active: bool,
}

impl NmcliLink {
    pub fn new() -> Self {
        Self::with_program("nmcli")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            pending: None,
            target: None,
            joined: None,
            hotspot_active: false,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| ControllerError::Link(format!("nmcli: {}", e)))?;
        if !output.status.success() {
            return Err(ControllerError::Link(format!(
                "nmcli {}: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn reap_pending(&mut self) {
        if let Some(mut child) = self.pending.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Default for NmcliLink {
    fn default() -> Self {
        Self::new()
    }
}

impl WifiLink for NmcliLink {
    fn begin(&mut self, name: &str, secret: &str) -> Result<()> {
        self.reap_pending();
        self.target = Some(name.to_string());
        self.joined = None;

        let mut command = Command::new(&self.program);
        command.args(["device", "wifi", "connect", name]);
        if !secret.is_empty() {
            command.args(["password", secret]);
        }
        let child = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ControllerError::Link(format!("nmcli: {}", e)))?;
        self.pending = Some(child);
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        if let Some(child) = self.pending.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.joined = Some(status.success());
                    self.pending = None;
                }
                Ok(None) => return false,
                Err(_) => {
                    self.joined = Some(false);
                    self.pending = None;
                }
            }
        }

        // Failed joins stay failed until the next begin
        if self.joined != Some(true) {
            return false;
        }
        match (&self.target, self.run(&["-t", "-f", "ACTIVE,SSID", "device", "wifi"])) {
            (Some(target), Ok(listing)) => active_ssid(&listing).as_deref() == Some(target.as_str()),
            _ => false,
        }
    }

    fn start_access_point(&mut self, name: &str) -> Result<()> {
        self.reap_pending();
        self.joined = None;
        self.run(&["device", "wifi", "hotspot", "ssid", name])?;
        self.hotspot_active = true;
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<()> {
        if self.hotspot_active {
            self.run(&["connection", "down", "Hotspot"])?;
            self.hotspot_active = false;
        }
        Ok(())
    }
}

/// SSID of the `yes:` row in `nmcli -t -f ACTIVE,SSID device wifi` output.
/// Terse mode escapes colons inside the SSID as `\:`.
fn active_ssid(listing: &str) -> Option<String> {
    listing
        .lines()
        .find_map(|line| line.strip_prefix("yes:"))
        .map(|ssid| ssid.replace("\\:", ":"))
}

impl Drop for NmcliLink {
    fn drop(&mut self) {
        self.reap_pending();
    }
}

/// Fixed-answer link for bench runs on a host that is already online (or
/// deliberately offline).
pub struct StaticLink {
    online: bool,
}

impl StaticLink {
    pub fn new(online: bool) -> Self {
        Self { online }
    }
}

impl WifiLink for StaticLink {
    fn begin(&mut self, name: &str, _secret: &str) -> Result<()> {
        log::debug!("[WIFI] static link: join {} -> {}", name, self.online);
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.online
    }

    fn start_access_point(&mut self, name: &str) -> Result<()> {
        log::debug!("[WIFI] static link: access point {}", name);
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<()> {
        Ok(())
    }
}
