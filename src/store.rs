//! In-memory window snapshot store
//!
//! Display key → window identity → bounded history. Configurations are created
//! lazily on first capture and live for the whole process. Entries leave only
//! through the history cap, restore-time truncation, or handle reuse.

use std::collections::HashMap;

use tracing::debug;

use crate::detector::{self, Assessment, DetectContext, HistoryAction};
use crate::history::History;
use crate::types::{CapturedMetrics, DisplayKey, WindowIdentity};

#[derive(Debug)]
pub struct SnapshotStore {
    configurations: HashMap<DisplayKey, HashMap<WindowIdentity, History>>,
    max_history_len: usize,
}

impl SnapshotStore {
    pub fn new(max_history_len: usize) -> Self {
        Self {
            configurations: HashMap::new(),
            max_history_len,
        }
    }

    /// Run the move detector without recording anything.
    ///
    /// Applies the detector's side effects (truncation, stale-history removal).
    pub fn assess(&mut self, display_key: &DisplayKey, live: &mut CapturedMetrics, ctx: &DetectContext) -> Assessment {
        let windows = self.configurations.entry(display_key.clone()).or_default();
        let assessment = detector::assess(windows.get_mut(&live.identity), live, ctx);
        if assessment.action == HistoryAction::Discard {
            debug!(display = %display_key, window = %live.identity, "Dropping stale history after handle reuse");
            windows.remove(&live.identity);
        }
        assessment
    }

    /// Append `live` to its history if the detector judges it a move
    pub fn record_if_moved(&mut self, display_key: &DisplayKey, mut live: CapturedMetrics, ctx: &DetectContext) -> bool {
        if !self.assess(display_key, &mut live, ctx).moved {
            return false;
        }
        self.push(display_key, live);
        true
    }

    /// Append unconditionally (used to inject restore targets from snapshots and disk)
    pub fn push(&mut self, display_key: &DisplayKey, metrics: CapturedMetrics) {
        let capacity = self.max_history_len;
        self.configurations
            .entry(display_key.clone())
            .or_default()
            .entry(metrics.identity.clone())
            .or_insert_with(|| History::new(capacity))
            .push(metrics);
    }

    pub fn last_known(&self, display_key: &DisplayKey, identity: &WindowIdentity) -> Option<&CapturedMetrics> {
        self.configurations.get(display_key)?.get(identity)?.last()
    }

    pub fn has_configuration(&self, display_key: &DisplayKey) -> bool {
        self.configurations
            .get(display_key)
            .is_some_and(|windows| !windows.is_empty())
    }

    pub fn contains(&self, display_key: &DisplayKey, identity: &WindowIdentity) -> bool {
        self.configurations
            .get(display_key)
            .is_some_and(|windows| windows.contains_key(identity))
    }

    #[cfg(test)]
    pub fn history_len(&self, display_key: &DisplayKey, identity: &WindowIdentity) -> usize {
        self.configurations
            .get(display_key)
            .and_then(|windows| windows.get(identity))
            .map_or(0, History::len)
    }

    /// Latest metrics of every window known under `display_key`
    #[cfg(test)]
    pub fn latest(&self, display_key: &DisplayKey) -> impl Iterator<Item = &CapturedMetrics> {
        self.configurations
            .get(display_key)
            .into_iter()
            .flat_map(|windows| windows.values().filter_map(History::last))
    }

    pub fn configuration_count(&self) -> usize {
        self.configurations.len()
    }

    pub fn window_count(&self, display_key: &DisplayKey) -> usize {
        self.configurations.get(display_key).map_or(0, HashMap::len)
    }
}
