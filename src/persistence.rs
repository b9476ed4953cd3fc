//! Disk snapshots for the explicit capture-to-disk / restore-from-disk actions
//!
//! In-memory capture and restore never touch this; it only backs the two
//! user-requested disk operations.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::constants::paths;
use crate::types::{CapturedMetrics, DisplayKey};

/// Key-value store of captured windows, partitioned by display key
pub trait SnapshotDb: Send {
    /// Swap the whole record set under `display_key` for `windows`, one record per
    /// identity. Either every window lands or the previous set is kept.
    fn replace(&mut self, display_key: &DisplayKey, windows: Vec<CapturedMetrics>) -> Result<()>;

    fn find_by_title(&self, display_key: &DisplayKey, title: &str) -> Option<CapturedMetrics>;

    fn find_by_process_name(&self, display_key: &DisplayKey, process_name: &str) -> Option<CapturedMetrics>;

    fn has_configuration(&self, display_key: &DisplayKey) -> bool;
}

/// On-disk document layout
#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotDocument {
    #[serde(default)]
    configurations: BTreeMap<String, Vec<CapturedMetrics>>,
}

impl SnapshotDocument {
    /// Returns the set that was there before, for [`Self::put_back`]
    fn replace(&mut self, display_key: &DisplayKey, windows: Vec<CapturedMetrics>) -> Option<Vec<CapturedMetrics>> {
        let mut records: Vec<CapturedMetrics> = Vec::with_capacity(windows.len());
        for metrics in windows {
            match records.iter_mut().find(|m| m.identity == metrics.identity) {
                Some(existing) => *existing = metrics,
                None => records.push(metrics),
            }
        }

        if records.is_empty() {
            self.configurations.remove(display_key.as_str())
        } else {
            self.configurations.insert(display_key.0.clone(), records)
        }
    }

    fn put_back(&mut self, display_key: &DisplayKey, previous: Option<Vec<CapturedMetrics>>) {
        match previous {
            Some(windows) => self.configurations.insert(display_key.0.clone(), windows),
            None => self.configurations.remove(display_key.as_str()),
        };
    }

    fn find<F>(&self, display_key: &DisplayKey, predicate: F) -> Option<CapturedMetrics>
    where
        F: Fn(&CapturedMetrics) -> bool,
    {
        self.configurations
            .get(display_key.as_str())?
            .iter()
            .find(|m| predicate(m))
            .cloned()
    }

    fn has_configuration(&self, display_key: &DisplayKey) -> bool {
        self.configurations
            .get(display_key.as_str())
            .is_some_and(|windows| !windows.is_empty())
    }
}

/// Single JSON document, rewritten on every change
pub struct JsonSnapshotDb {
    path: PathBuf,
    document: SnapshotDocument,
}

impl JsonSnapshotDb {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(paths::APP_DIR);
        path.push(paths::SNAPSHOT_DB_FILENAME);
        path
    }

    /// Open `path`, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read snapshot database {:?}", path))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse snapshot database {:?}", path))?
        } else {
            debug!(path = %path.display(), "Snapshot database not found, starting empty");
            SnapshotDocument::default()
        };

        info!(
            path = %path.display(),
            configurations = document.configurations.len(),
            "Opened snapshot database"
        );
        Ok(Self { path, document })
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create snapshot directory {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(&self.document).context("Failed to serialize snapshots")?;

        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, &self.path).with_context(|| format!("Failed to replace {:?}", self.path))?;
        Ok(())
    }
}

impl SnapshotDb for JsonSnapshotDb {
    fn replace(&mut self, display_key: &DisplayKey, windows: Vec<CapturedMetrics>) -> Result<()> {
        let previous = self.document.replace(display_key, windows);
        if let Err(e) = self.write() {
            self.document.put_back(display_key, previous);
            return Err(e);
        }
        Ok(())
    }

    fn find_by_title(&self, display_key: &DisplayKey, title: &str) -> Option<CapturedMetrics> {
        self.document.find(display_key, |m| m.title == title)
    }

    fn find_by_process_name(&self, display_key: &DisplayKey, process_name: &str) -> Option<CapturedMetrics> {
        self.document.find(display_key, |m| m.identity.process_name == process_name)
    }

    fn has_configuration(&self, display_key: &DisplayKey) -> bool {
        self.document.has_configuration(display_key)
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySnapshotDb {
    document: SnapshotDocument,
}

#[cfg(test)]
impl SnapshotDb for MemorySnapshotDb {
    fn replace(&mut self, display_key: &DisplayKey, windows: Vec<CapturedMetrics>) -> Result<()> {
        self.document.replace(display_key, windows);
        Ok(())
    }

    fn find_by_title(&self, display_key: &DisplayKey, title: &str) -> Option<CapturedMetrics> {
        self.document.find(display_key, |m| m.title == title)
    }

    fn find_by_process_name(&self, display_key: &DisplayKey, process_name: &str) -> Option<CapturedMetrics> {
        self.document.find(display_key, |m| m.identity.process_name == process_name)
    }

    fn has_configuration(&self, display_key: &DisplayKey) -> bool {
        self.document.has_configuration(display_key)
    }
}
