//! adb-backed device session.
//!
//! Every adb invocation runs through [`run_with_timeout`] with the budget
//! configured for its kind: probing (`version`, `devices`, `connect`),
//! capture, or generic shell commands.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::core::types::Point;
use crate::io::config::{AdbConfig, EmulatorKind};
use crate::io::device::{Device, DeviceError, Frame};
use crate::io::process::{CommandOutput, DEFAULT_OUTPUT_LIMIT, run_with_timeout};

/// Small text outputs (`devices`, `wm size`, ...).
const TEXT_OUTPUT_LIMIT: usize = 256 * 1024;

/// How [`AdbSession::connect`] picks an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectHint {
    /// Bind to this endpoint if it is currently listed.
    Device(String),
    /// Probe the local ports of an emulator family.
    Emulator(EmulatorKind),
}

/// A session with at most one bound endpoint.
#[derive(Debug, Clone)]
pub struct AdbSession {
    adb: PathBuf,
    config: AdbConfig,
    serial: Option<String>,
}

impl AdbSession {
    pub fn new(adb: impl Into<PathBuf>, config: AdbConfig) -> Self {
        Self {
            adb: adb.into(),
            config,
            serial: None,
        }
    }

    /// Use `adb.path` when configured, otherwise discover the executable.
    pub fn from_config(config: &AdbConfig) -> Self {
        let adb = config.path.clone().unwrap_or_else(find_adb);
        debug!(adb = %adb.display(), "using adb executable");
        Self::new(adb, config.clone())
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb
    }

    pub fn is_connected(&self) -> bool {
        self.serial.is_some()
    }

    /// True when `adb version` runs and exits zero.
    pub fn check_available(&self) -> bool {
        match self.run_global(&["version"], self.config.probe_timeout()) {
            Ok(out) if out.status.success() => true,
            Ok(out) => {
                error!(adb = %self.adb.display(), stderr = %out.stderr_text(), "adb version failed");
                false
            }
            Err(err) => {
                error!(adb = %self.adb.display(), %err, "adb is not available; install Android platform-tools");
                false
            }
        }
    }

    /// Serials currently reported by `adb devices` in the `device` state.
    pub fn list_endpoints(&self) -> Vec<String> {
        match self.run_global(&["devices"], self.config.probe_timeout()) {
            Ok(out) if out.status.success() => parse_devices(&out.stdout_text()),
            Ok(out) => {
                warn!(stderr = %out.stderr_text(), "adb devices failed");
                Vec::new()
            }
            Err(err) => {
                warn!(%err, "adb devices failed");
                Vec::new()
            }
        }
    }

    /// Bind to an endpoint according to `hint`.
    ///
    /// - `Device(id)`: bind only if `id` is currently listed.
    /// - `Emulator(Auto)`: bind to the first listed endpoint, else probe the auto ports.
    /// - `Emulator(Ldplayer)`: probe the LDPlayer ports.
    #[instrument(skip_all, fields(hint = ?hint))]
    pub fn connect(&mut self, hint: &ConnectHint) -> bool {
        if !self.check_available() {
            return false;
        }
        match hint {
            ConnectHint::Device(id) => self.connect_to_endpoint(id),
            ConnectHint::Emulator(EmulatorKind::Ldplayer) => {
                let ports = self.config.ldplayer_ports.clone();
                if self.probe_ports(&ports) {
                    return true;
                }
                warn!(?ports, "LDPlayer not found on known ports");
                false
            }
            ConnectHint::Emulator(EmulatorKind::Auto) => {
                if let Some(first) = self.list_endpoints().into_iter().next() {
                    self.bind(first);
                    return true;
                }
                let ports = self.config.auto_ports.clone();
                if self.probe_ports(&ports) {
                    return true;
                }
                warn!("no emulator or device connected");
                false
            }
        }
    }

    /// Bind to `id`; fails when it is not in the current enumeration.
    pub fn connect_to_endpoint(&mut self, id: &str) -> bool {
        if self.list_endpoints().iter().any(|e| e == id) {
            self.bind(id.to_string());
            true
        } else {
            warn!(device = id, "device not found");
            false
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(serial) = self.serial.take() {
            debug!(%serial, "session unbound");
        }
    }

    fn bind(&mut self, serial: String) {
        info!(%serial, "connected to device");
        self.serial = Some(serial);
    }

    fn probe_ports(&mut self, ports: &[u16]) -> bool {
        ports.iter().any(|port| self.try_port(*port))
    }

    fn try_port(&mut self, port: u16) -> bool {
        let address = format!("127.0.0.1:{port}");
        debug!(%address, "probing");
        if let Err(err) = self.run_global(&["connect", &address], self.config.probe_timeout()) {
            debug!(%address, %err, "adb connect failed");
            return false;
        }
        let suffix = format!(":{port}");
        match self
            .list_endpoints()
            .into_iter()
            .find(|e| e.ends_with(&suffix))
        {
            Some(serial) => {
                self.bind(serial);
                true
            }
            None => false,
        }
    }

    fn run_global(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, DeviceError> {
        let mut cmd = Command::new(&self.adb);
        cmd.args(args);
        execute(cmd, &format!("adb {}", args.join(" ")), timeout, TEXT_OUTPUT_LIMIT)
    }

    fn run_device(
        &self,
        args: &[&str],
        timeout: Duration,
        output_limit: usize,
    ) -> Result<CommandOutput, DeviceError> {
        let serial = self.serial.as_deref().ok_or(DeviceError::NotConnected)?;
        let mut cmd = Command::new(&self.adb);
        cmd.arg("-s").arg(serial).args(args);
        let out = execute(cmd, &format!("adb -s {serial} {}", args.join(" ")), timeout, output_limit)?;
        if !out.status.success() {
            return Err(DeviceError::CommandFailed {
                command: args.join(" "),
                status: out.status.to_string(),
                stderr: out.stderr_text(),
            });
        }
        Ok(out)
    }

    fn shell(&self, args: &[&str]) -> Result<String, DeviceError> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        self.run_device(&full, self.config.command_timeout(), TEXT_OUTPUT_LIMIT)
            .map(|out| out.stdout_text())
    }

    fn shell_action(&self, label: &str, args: &[&str]) -> bool {
        match self.shell(args) {
            Ok(_) => true,
            Err(DeviceError::NotConnected) => {
                warn!(action = label, "device not connected");
                false
            }
            Err(err) => {
                warn!(action = label, serial = ?self.serial, %err, "adb command failed");
                false
            }
        }
    }
}

impl Device for AdbSession {
    fn serial(&self) -> Option<String> {
        self.serial.clone()
    }

    #[instrument(skip_all, fields(serial = ?self.serial))]
    fn capture(&self) -> Result<Frame, DeviceError> {
        let result = self
            .run_device(
                &["exec-out", "screencap", "-p"],
                self.config.capture_timeout(),
                DEFAULT_OUTPUT_LIMIT,
            )
            .and_then(|out| {
                if out.stdout_truncated > 0 {
                    return Err(DeviceError::MalformedFrame(format!(
                        "screencap exceeded {DEFAULT_OUTPUT_LIMIT} bytes"
                    )));
                }
                Frame::decode(&out.stdout)
            });
        match &result {
            Ok(frame) => debug!(width = frame.width(), height = frame.height(), "captured frame"),
            Err(DeviceError::NotConnected) => warn!("capture requested but no device is connected"),
            Err(err) => error!(serial = ?self.serial, %err, "capture failed"),
        }
        result
    }

    fn tap(&self, at: Point) -> bool {
        debug!(%at, "tap");
        self.shell_action(
            "tap",
            &["input", "tap", &at.x.to_string(), &at.y.to_string()],
        )
    }

    fn swipe(&self, from: Point, to: Point, duration_ms: u64) -> bool {
        debug!(%from, %to, duration_ms, "swipe");
        self.shell_action(
            "swipe",
            &[
                "input",
                "swipe",
                &from.x.to_string(),
                &from.y.to_string(),
                &to.x.to_string(),
                &to.y.to_string(),
                &duration_ms.to_string(),
            ],
        )
    }

    fn input_text(&self, text: &str) -> bool {
        let escaped = escape_input_text(text);
        self.shell_action("text", &["input", "text", &escaped])
    }

    fn press_key(&self, key: &str) -> bool {
        self.shell_action("key", &["input", "keyevent", key])
    }

    fn screen_size(&self) -> Option<(u32, u32)> {
        match self.shell(&["wm", "size"]) {
            Ok(out) => {
                let size = parse_wm_size(&out);
                if size.is_none() {
                    warn!(output = %out.trim(), "unrecognized wm size output");
                }
                size
            }
            Err(err) => {
                warn!(%err, "wm size failed");
                None
            }
        }
    }
}

fn execute(
    cmd: Command,
    label: &str,
    timeout: Duration,
    output_limit: usize,
) -> Result<CommandOutput, DeviceError> {
    let out = run_with_timeout(cmd, timeout, output_limit)
        .map_err(|e| DeviceError::Transport(format!("{label}: {e:#}")))?;
    if out.timed_out {
        return Err(DeviceError::Timeout {
            command: label.to_string(),
            timeout_secs: timeout.as_secs(),
        });
    }
    Ok(out)
}

/// Serials in the `device` state from `adb devices` output.
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('*') && !line.starts_with("List of"))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            (parts.next() == Some("device")).then(|| serial.to_string())
        })
        .collect()
}

/// `(width, height)` from the last `WxH` token of `wm size` output.
pub fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let token = output.split_whitespace().last()?;
    let (w, h) = token.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

/// `input text` treats spaces as argument breaks and `&` as a shell operator.
pub fn escape_input_text(text: &str) -> String {
    text.replace(' ', "%s").replace('&', "\\&")
}

/// Locate an adb executable: `PATH`, then common install locations, then plain `adb`.
pub fn find_adb() -> PathBuf {
    if let Ok(path) = which::which("adb") {
        return path;
    }
    if let Some(found) = known_adb_locations().into_iter().find(|p| p.is_file()) {
        return found;
    }
    PathBuf::from("adb")
}

fn known_adb_locations() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from);
    let mut paths: Vec<PathBuf> = Vec::new();
    if cfg!(windows) {
        paths.extend(
            [
                r"D:\platform-tools\adb.exe",
                r"C:\platform-tools\adb.exe",
            ]
            .map(PathBuf::from),
        );
        if let Some(home) = &home {
            paths.push(home.join(r"platform-tools\adb.exe"));
        }
        paths.extend(
            [
                r"C:\LDPlayer\LDPlayer4.0\adb.exe",
                r"C:\LDPlayer\LDPlayer\adb.exe",
                r"C:\LDPlayer64\LDPlayer4.0\adb.exe",
                r"C:\LDPlayer64\LDPlayer\adb.exe",
            ]
            .map(PathBuf::from),
        );
        if let Some(home) = &home {
            paths.push(home.join(r"LDPlayer\LDPlayer4.0\adb.exe"));
            paths.push(home.join(r"LDPlayer\LDPlayer\adb.exe"));
        }
        paths.push(PathBuf::from(r"C:\Android\platform-tools\adb.exe"));
        if let Some(home) = &home {
            paths.push(home.join(r"AppData\Local\Android\Sdk\platform-tools\adb.exe"));
            paths.push(home.join(r"Android\Sdk\platform-tools\adb.exe"));
        }
    } else if let Some(home) = &home {
        paths.push(home.join("platform-tools/adb"));
        paths.push(home.join("Android/Sdk/platform-tools/adb"));
        paths.push(home.join("Library/Android/sdk/platform-tools/adb"));
    }
    paths
}
