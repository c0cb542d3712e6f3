//! Configuration loading and management
//!
//! Defaults, then `config.json` in the data directory, then environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::emulator::DOUBLE_TAP_GAP;
use crate::hotkey::{ChordRepeat, HOLD_THRESHOLD};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// How long a key stays down before HOLD is reported
    pub hold_threshold: Duration,

    /// Gap between the taps of an emulated double tap
    pub double_tap_gap: Duration,

    pub chord_repeat: ChordRepeat,
}

/// Optional overrides read from `config.json`
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    socket_path: Option<PathBuf>,
    hold_ms: Option<u64>,
    double_tap_ms: Option<u64>,
    chord_repeat: Option<ChordRepeat>,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Self::load_from(Path::new(&home), |name| std::env::var(name).ok())
    }

    /// Load relative to `home`, reading variables through `env`
    pub fn load_from<F>(home: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = home.join(".local").join("share").join("keyplex");

        let mut config = Self {
            socket_path: data_dir.join("daemon.sock"),
            hold_threshold: HOLD_THRESHOLD,
            double_tap_gap: DOUBLE_TAP_GAP,
            chord_repeat: ChordRepeat::default(),
            data_dir,
        };

        let config_path = config.config_path();
        if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            let file: FileConfig = serde_json::from_str(&raw)
                .with_context(|| format!("invalid config file {}", config_path.display()))?;
            config.apply_file(file);
        }

        config.apply_env(env)?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(path) = file.socket_path {
            self.socket_path = path;
        }
        if let Some(ms) = file.hold_ms {
            self.hold_threshold = Duration::from_millis(ms);
        }
        if let Some(ms) = file.double_tap_ms {
            self.double_tap_gap = Duration::from_millis(ms);
        }
        if let Some(repeat) = file.chord_repeat {
            self.chord_repeat = repeat;
        }
    }

    fn apply_env<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = env("KEYPLEX_SOCKET") {
            self.socket_path = PathBuf::from(path);
        }
        if let Some(ms) = env("KEYPLEX_HOLD_MS") {
            self.hold_threshold = parse_millis("KEYPLEX_HOLD_MS", &ms)?;
        }
        if let Some(ms) = env("KEYPLEX_DOUBLE_TAP_MS") {
            self.double_tap_gap = parse_millis("KEYPLEX_DOUBLE_TAP_MS", &ms)?;
        }
        if let Some(repeat) = env("KEYPLEX_CHORD_REPEAT") {
            self.chord_repeat = repeat
                .parse()
                .map_err(anyhow::Error::msg)
                .context("invalid KEYPLEX_CHORD_REPEAT")?;
        }
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn parse_millis(name: &str, value: &str) -> Result<Duration> {
    let ms: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid {name}: expected milliseconds, got '{value}'"))?;
    Ok(Duration::from_millis(ms))
}
