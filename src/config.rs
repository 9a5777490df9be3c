//! Configuration loading.
//!
//! Reads an optional JSON file named by `EXTLINK_CONFIG`, then applies
//! environment overrides. Every field has a default, so an empty or partial
//! file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

use crate::wire::framing::DEFAULT_MAX_FRAME_SIZE;
use crate::wire::Rgba;

/// What the crash controller does on a fatal signal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StackTraceMode {
    /// Skip the debugger; go straight to the fatal exit.
    Never,
    /// Attach the debugger once and print its backtrace.
    #[default]
    Always,
}

impl std::str::FromStr for StackTraceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "always" => Ok(Self::Always),
            other => anyhow::bail!("unknown stack-trace mode '{other}' (expected never|always)"),
        }
    }
}

/// Configuration shared by the host and extension sides.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Largest payload accepted by the frame codec, in bytes.
    pub max_frame_size: u64,
    /// Crash controller behaviour.
    pub stack_trace: StackTraceMode,
    /// Debugger executable, looked up on `PATH`.
    pub debugger: PathBuf,
    /// Commands fed to the debugger after it attaches.
    pub debugger_commands: Vec<String>,
    /// Poll timeout of the debugger capture loop, in milliseconds.
    pub poll_interval_ms: u64,
    /// Host answer to a foreground color query.
    pub foreground: Rgba,
    /// Host answer to a background color query.
    pub background: Rgba,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            stack_trace: StackTraceMode::Always,
            debugger: PathBuf::from("gdb"),
            debugger_commands: vec!["bt".to_string(), "quit".to_string()],
            poll_interval_ms: 1000,
            foreground: Rgba {
                r: 0.0,
                g: 0.0,
                b: 0.0,
                a: 1.0,
            },
            background: Rgba {
                r: 1.0,
                g: 1.0,
                b: 1.0,
                a: 1.0,
            },
        }
    }
}

impl Config {
    /// Loads configuration from `EXTLINK_CONFIG` (if set), with environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os("EXTLINK_CONFIG") {
            Some(path) => Self::load_from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Reads one JSON config file. Missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(mode) = std::env::var("EXTLINK_STACK_TRACE") {
            match mode.parse() {
                Ok(mode) => self.stack_trace = mode,
                Err(e) => log::warn!("[config] ignoring EXTLINK_STACK_TRACE: {e}"),
            }
        }

        if let Ok(max) = std::env::var("EXTLINK_MAX_FRAME_SIZE") {
            if let Ok(max) = max.parse::<u64>() {
                self.max_frame_size = max;
            }
        }

        if let Ok(debugger) = std::env::var("EXTLINK_DEBUGGER") {
            self.debugger = PathBuf::from(debugger);
        }
    }

    /// Persist to `path` as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write config {}", path.display()))
    }
}
