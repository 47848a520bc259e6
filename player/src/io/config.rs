//! Player configuration stored in `player.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "player.toml";

/// Player configuration (TOML).
///
/// Edited by hand; every field has a default so a partial file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    pub adb: AdbConfig,
    pub paths: PathsConfig,
    pub matching: MatchingConfig,
    pub run: RunConfig,
    pub ocr: OcrConfig,
}

/// Which emulator family to probe ports for when no device is named.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EmulatorKind {
    #[default]
    Auto,
    Ldplayer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdbConfig {
    /// Explicit adb executable. When unset the executable is discovered.
    pub path: Option<PathBuf>,
    pub emulator: EmulatorKind,
    pub auto_ports: Vec<u16>,
    pub ldplayer_ports: Vec<u16>,
    /// Budget for `devices`, `connect` and `version`.
    pub probe_timeout_secs: u64,
    pub capture_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            path: None,
            emulator: EmulatorKind::Auto,
            auto_ports: vec![5555, 5557, 5565, 5575],
            ldplayer_ports: vec![5555, 5557, 5565, 5575, 5585],
            probe_timeout_secs: 5,
            capture_timeout_secs: 10,
            command_timeout_secs: 10,
        }
    }
}

impl AdbConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn ports_for(&self, kind: EmulatorKind) -> &[u16] {
        match kind {
            EmulatorKind::Auto => &self.auto_ports,
            EmulatorKind::Ldplayer => &self.ldplayer_ports,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Game documents (`<name>.toml` or `<name>.json`).
    pub games_dir: PathBuf,
    /// Shared templates; game-scoped ones live in `<templates_dir>/<game>/`.
    pub templates_dir: PathBuf,
    pub screenshots_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            games_dir: PathBuf::from("config/games"),
            templates_dir: PathBuf::from("config/templates"),
            screenshots_dir: PathBuf::from("screenshots"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatchingConfig {
    /// Used by ad-hoc `find` when no threshold is given. Steps carry their own.
    pub default_threshold: f64,
    pub poll_interval_ms: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            default_threshold: crate::program::DEFAULT_THRESHOLD,
            poll_interval_ms: 500,
        }
    }
}

impl MatchingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// How long a notification waits for an answer before continuing.
    pub notification_timeout_secs: u64,
    pub repeat_delay_ms: u64,
    /// Check the stop signal between template polls, not only between steps.
    pub cancel_during_polls: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            notification_timeout_secs: 300,
            repeat_delay_ms: 500,
            cancel_during_polls: true,
        }
    }
}

impl RunConfig {
    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_secs)
    }

    pub fn repeat_delay(&self) -> Duration {
        Duration::from_millis(self.repeat_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OcrConfig {
    /// Explicit tesseract executable; `tesseract` on `PATH` otherwise.
    pub tesseract_path: Option<PathBuf>,
    pub lang: String,
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_path: None,
            lang: "eng".to_string(),
            timeout_secs: 10,
        }
    }
}

impl PlayerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.adb.probe_timeout_secs == 0 {
            return Err(anyhow!("adb.probe_timeout_secs must be > 0"));
        }
        if self.adb.capture_timeout_secs == 0 {
            return Err(anyhow!("adb.capture_timeout_secs must be > 0"));
        }
        if self.adb.command_timeout_secs == 0 {
            return Err(anyhow!("adb.command_timeout_secs must be > 0"));
        }
        if self.adb.auto_ports.is_empty() && self.adb.ldplayer_ports.is_empty() {
            return Err(anyhow!("adb.auto_ports and adb.ldplayer_ports are both empty"));
        }
        let threshold = self.matching.default_threshold;
        if threshold.is_nan() || threshold <= 0.0 || threshold > 1.0 {
            return Err(anyhow!(
                "matching.default_threshold must be in (0, 1] (got {threshold})"
            ));
        }
        if self.matching.poll_interval_ms == 0 {
            return Err(anyhow!("matching.poll_interval_ms must be > 0"));
        }
        if self.run.notification_timeout_secs == 0 {
            return Err(anyhow!("run.notification_timeout_secs must be > 0"));
        }
        if self.ocr.lang.trim().is_empty() {
            return Err(anyhow!("ocr.lang must not be empty"));
        }
        if self.ocr.timeout_secs == 0 {
            return Err(anyhow!("ocr.timeout_secs must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PlayerConfig::default()`.
pub fn load_config(path: &Path) -> Result<PlayerConfig> {
    if !path.exists() {
        let cfg = PlayerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PlayerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PlayerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, PlayerConfig::default());
        assert_eq!(cfg.adb.probe_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.run.notification_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("player.toml");
        let mut cfg = PlayerConfig::default();
        cfg.adb.emulator = EmulatorKind::Ldplayer;
        cfg.adb.path = Some(PathBuf::from("/opt/platform-tools/adb"));
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("player.toml");
        fs::write(&path, "[adb]\nemulator = \"ldplayer\"\n\n[matching]\npoll_interval_ms = 250\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.adb.emulator, EmulatorKind::Ldplayer);
        assert_eq!(cfg.adb.ports_for(cfg.adb.emulator), &[5555, 5557, 5565, 5575, 5585]);
        assert_eq!(cfg.matching.poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.paths, PathsConfig::default());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("player.toml");
        fs::write(&path, "[matching]\ndefault_threshold = 1.5\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("default_threshold"));
    }
}
