//! Settings for the window-position daemon
//!
//! Stored as JSON under the user's config directory. Every field has a default,
//! so a partial file is valid; out-of-range values are clamped with a warning.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::constants::{capture, paths, platform, restore, timing};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Debounce for location-change bursts
    #[serde(default = "default_capture_latency_ms")]
    pub capture_latency_ms: u64,
    /// Delay before a follow-up restore pass
    #[serde(default = "default_restore_latency_ms")]
    pub restore_latency_ms: u64,
    /// Restore delay after resume/unlock
    #[serde(default = "default_default_restore_latency_ms")]
    pub default_restore_latency_ms: u64,
    /// Quiet period that ends a restore session
    #[serde(default = "default_max_restore_latency_ms")]
    pub max_restore_latency_ms: u64,
    #[serde(default = "default_min_restore_passes")]
    pub min_restore_passes: u32,
    #[serde(default = "default_max_restore_passes_local")]
    pub max_restore_passes_local: u32,
    #[serde(default = "default_max_restore_passes_remote")]
    pub max_restore_passes_remote: u32,
    /// Burst size above which moves are attributed to the OS
    #[serde(default = "default_min_os_move_windows")]
    pub min_os_move_windows: usize,
    #[serde(default = "default_max_history_len")]
    pub max_history_len: usize,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// WM_CLASS class (second field) of the panel dragged back into place
    #[serde(default = "default_taskbar_class")]
    pub taskbar_class: String,
    /// Process-name fragments never restored
    #[serde(default = "default_skip_processes")]
    pub skip_processes: Vec<String>,
    /// Log restore actions without touching any window
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_capture_latency_ms() -> u64 {
    timing::CAPTURE_LATENCY_MS
}

fn default_restore_latency_ms() -> u64 {
    timing::RESTORE_LATENCY_MS
}

fn default_default_restore_latency_ms() -> u64 {
    timing::DEFAULT_RESTORE_LATENCY_MS
}

fn default_max_restore_latency_ms() -> u64 {
    timing::MAX_RESTORE_LATENCY_MS
}

fn default_min_restore_passes() -> u32 {
    restore::MIN_RESTORE_PASSES
}

fn default_max_restore_passes_local() -> u32 {
    restore::MAX_RESTORE_PASSES_LOCAL
}

fn default_max_restore_passes_remote() -> u32 {
    restore::MAX_RESTORE_PASSES_REMOTE
}

fn default_min_os_move_windows() -> usize {
    capture::MIN_OS_MOVE_WINDOWS
}

fn default_max_history_len() -> usize {
    capture::MAX_HISTORY_LEN
}

fn default_worker_threads() -> usize {
    capture::WORKER_THREADS
}

fn default_taskbar_class() -> String {
    platform::TASKBAR_CLASS.to_string()
}

fn default_skip_processes() -> Vec<String> {
    platform::DEFAULT_SKIP_PROCESSES.iter().map(|s| s.to_string()).collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            capture_latency_ms: default_capture_latency_ms(),
            restore_latency_ms: default_restore_latency_ms(),
            default_restore_latency_ms: default_default_restore_latency_ms(),
            max_restore_latency_ms: default_max_restore_latency_ms(),
            min_restore_passes: default_min_restore_passes(),
            max_restore_passes_local: default_max_restore_passes_local(),
            max_restore_passes_remote: default_max_restore_passes_remote(),
            min_os_move_windows: default_min_os_move_windows(),
            max_history_len: default_max_history_len(),
            worker_threads: default_worker_threads(),
            taskbar_class: default_taskbar_class(),
            skip_processes: default_skip_processes(),
            dry_run: false,
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(paths::APP_DIR);
        path.push(paths::CONFIG_FILENAME);
        path
    }

    /// Load without clamping; a missing file yields the defaults
    pub fn read_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Settings::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings JSON from {:?}", path))
    }

    /// Write the defaults to `path` unless a file is already there
    pub fn write_defaults_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        Settings::default().save_to(path)?;
        Ok(true)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, json).with_context(|| format!("Failed to write settings to {:?}", path))?;
        Ok(())
    }

    /// Fix values that would stall or break the engine
    pub fn validate_and_clamp(&mut self) {
        if self.min_restore_passes == 0 {
            warn!(min_restore_passes = 0, "min_restore_passes must be at least 1, using 1");
            self.min_restore_passes = 1;
        }
        if self.max_restore_passes_local < self.min_restore_passes {
            warn!(
                max_restore_passes_local = self.max_restore_passes_local,
                min = self.min_restore_passes,
                "max_restore_passes_local below min_restore_passes, clamping"
            );
            self.max_restore_passes_local = self.min_restore_passes;
        }
        if self.max_restore_passes_remote < self.max_restore_passes_local {
            warn!(
                max_restore_passes_remote = self.max_restore_passes_remote,
                local = self.max_restore_passes_local,
                "max_restore_passes_remote below local ceiling, clamping"
            );
            self.max_restore_passes_remote = self.max_restore_passes_local;
        }
        if self.max_history_len == 0 {
            warn!(using = default_max_history_len(), "max_history_len must be non-zero, using default");
            self.max_history_len = default_max_history_len();
        }
        if self.worker_threads == 0 {
            warn!(using = default_worker_threads(), "worker_threads must be non-zero, using default");
            self.worker_threads = default_worker_threads();
        }
        if self.taskbar_class.is_empty() {
            warn!(using = %platform::TASKBAR_CLASS, "taskbar_class empty, using default");
            self.taskbar_class = default_taskbar_class();
        }
        if self.restore_latency_ms == 0 {
            warn!(using = default_restore_latency_ms(), "restore_latency_ms must be non-zero, using default");
            self.restore_latency_ms = default_restore_latency_ms();
        }
    }

    pub fn capture_latency(&self) -> Duration {
        Duration::from_millis(self.capture_latency_ms)
    }

    pub fn restore_latency(&self) -> Duration {
        Duration::from_millis(self.restore_latency_ms)
    }

    pub fn default_restore_latency(&self) -> Duration {
        Duration::from_millis(self.default_restore_latency_ms)
    }

    pub fn max_restore_latency(&self) -> Duration {
        Duration::from_millis(self.max_restore_latency_ms)
    }

    /// Restore pass ceiling for the session type
    pub fn max_restore_passes(&self, remote: bool) -> u32 {
        if remote {
            self.max_restore_passes_remote
        } else {
            self.max_restore_passes_local
        }
    }

    pub fn is_skipped_process(&self, process_name: &str) -> bool {
        self.skip_processes
            .iter()
            .any(|skip| !skip.is_empty() && process_name.contains(skip.as_str()))
    }
}
