//! Display configuration identity
//!
//! Every snapshot is partitioned by a key derived from the live monitor set.
//! The key must be deterministic for a given hardware state, so monitors are
//! sorted by position before formatting regardless of enumeration order.

use crate::types::{DisplayKey, Rect};

/// A monitor as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Monitor {
    pub bounds: Rect,
    pub primary: bool,
}

impl Monitor {
    pub const fn new(bounds: Rect, primary: bool) -> Self {
        Self { bounds, primary }
    }
}

/// Build the key for a monitor set: `WxH@X,Y` per monitor, `;`-separated
pub fn display_key(monitors: &[Monitor]) -> DisplayKey {
    let mut bounds: Vec<Rect> = monitors.iter().map(|m| m.bounds).collect();
    bounds.sort_by_key(|r| (r.left, r.top, r.width, r.height));

    let key = bounds
        .iter()
        .map(|r| format!("{}x{}@{},{}", r.width, r.height, r.left, r.top))
        .collect::<Vec<_>>()
        .join(";");
    DisplayKey(key)
}
