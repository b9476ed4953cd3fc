//! Move detection
//!
//! Decides whether a live observation of a window is a genuine move worth
//! recording, given that window's history under the active display key.
//! Rules are applied in order; the first one that fires decides.

use chrono::{DateTime, Utc};
use tracing::{trace, warn};

use crate::constants::platform::SMALL_NEGATIVE_TOP;
use crate::history::History;
use crate::platform::WindowInfo;
use crate::types::{CaptureTrigger, CapturedMetrics, WindowIdentity};

/// Conditions under which an observation is judged
#[derive(Debug, Clone, Copy)]
pub struct DetectContext {
    pub trigger: CaptureTrigger,
    /// A restore session is in progress
    pub restoring: bool,
    /// Comparison time: capture time for live events, the restore cut-off during restore
    pub time: DateTime<Utc>,
}

/// What the store must do with the existing history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Keep,
    /// Handle was reused by another process; the old history is stale
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub moved: bool,
    pub action: HistoryAction,
}

impl Assessment {
    const fn moved() -> Self {
        Self { moved: true, action: HistoryAction::Keep }
    }

    const fn unchanged() -> Self {
        Self { moved: false, action: HistoryAction::Keep }
    }
}

/// Build metrics from a live window, or `None` if the window is not tracked.
///
/// Windows without a class are ignored; untitled windows are ignored unless
/// they are the taskbar.
pub fn measure(info: &WindowInfo, taskbar_class: &str, time: DateTime<Utc>) -> Option<CapturedMetrics> {
    if info.class_name.is_empty() {
        return None;
    }

    let is_taskbar = info.class_name == taskbar_class;
    if !is_taskbar && info.title.is_empty() {
        return None;
    }

    let mut screen_position = info.screen_position;
    screen_position.top = sanitize_top(screen_position.top);

    Some(CapturedMetrics {
        identity: WindowIdentity::new(info.handle, info.process_name.clone()),
        process_id: info.process_id,
        class_name: info.class_name.clone(),
        title: info.title.clone(),
        is_taskbar,
        screen_position,
        placement: info.placement,
        capture_time: time,
        needs_placement_update: false,
    })
}

/// Snapped and maximized windows can report a top a few units above 0
pub fn sanitize_top(top: i32) -> i32 {
    if top < 0 && top > SMALL_NEGATIVE_TOP { 0 } else { top }
}

/// Judge `live` against `history`.
///
/// May truncate `history` (restore-time cut-off) and may set
/// `live.needs_placement_update`.
pub fn assess(history: Option<&mut History>, live: &mut CapturedMetrics, ctx: &DetectContext) -> Assessment {
    let Some(history) = history.filter(|h| !h.is_empty()) else {
        return Assessment::moved();
    };

    if ctx.restoring && ctx.trigger == CaptureTrigger::Batch {
        if !history.is_chronological() {
            warn!(window = %live.identity, "Capture history out of order, skipping comparison");
            return Assessment::unchanged();
        }

        // Entries newer than the cut-off are artifacts of the disruption itself
        let keep = history.iter().take_while(|m| m.capture_time <= ctx.time).count();
        if keep == 0 {
            trace!(window = %live.identity, cutoff = %ctx.time, "No capture before restore cut-off");
            return Assessment::unchanged();
        }
        if keep < history.len() {
            trace!(window = %live.identity, kept = keep, dropped = history.len() - keep, "Truncated capture history");
            history.truncate(keep);
        }
    }

    let Some(prev) = history.last() else {
        return Assessment::moved();
    };

    if prev.process_id != live.process_id || prev.class_name != live.class_name {
        trace!(
            window = %live.identity,
            old_pid = prev.process_id,
            new_pid = live.process_id,
            "Window handle reused by a different process"
        );
        return Assessment {
            moved: true,
            action: HistoryAction::Discard,
        };
    }

    if ctx.trigger.is_foreground() {
        // Reactivating an existing window must not overwrite good history
        return Assessment::unchanged();
    }

    if live.is_taskbar {
        return if prev.screen_position != live.screen_position {
            Assessment::moved()
        } else {
            Assessment::unchanged()
        };
    }

    if !prev.equal_placement(live) {
        live.needs_placement_update = true;
        return Assessment::moved();
    }

    if prev.screen_position != live.screen_position {
        return Assessment::moved();
    }

    Assessment::unchanged()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::platform::TASKBAR_CLASS;
    use crate::testing::{at, metrics_at, window_info};
    use crate::types::{Placement, Rect, ShowState, WindowEventKind, WindowHandle};

    fn live_ctx(trigger: CaptureTrigger) -> DetectContext {
        DetectContext { trigger, restoring: false, time: at(1000) }
    }

    fn history_of(entries: Vec<CapturedMetrics>) -> History {
        let mut history = History::new(20);
        for entry in entries {
            history.push(entry);
        }
        history
    }

    #[test]
    fn test_measure_ignores_window_without_class() {
        let mut info = window_info(1, "app", Rect::new(0, 0, 100, 100));
        info.class_name.clear();
        assert!(measure(&info, TASKBAR_CLASS, at(0)).is_none());
    }

    #[test]
    fn test_measure_ignores_untitled_unless_taskbar() {
        let mut info = window_info(1, "app", Rect::new(0, 0, 100, 100));
        info.title.clear();
        assert!(measure(&info, TASKBAR_CLASS, at(0)).is_none());

        info.class_name = TASKBAR_CLASS.to_string();
        let metrics = measure(&info, TASKBAR_CLASS, at(0)).unwrap();
        assert!(metrics.is_taskbar);
    }

    #[test]
    fn test_small_negative_top_is_normalized() {
        let info = window_info(1, "app", Rect::new(10, -10, 100, 100));
        let metrics = measure(&info, TASKBAR_CLASS, at(0)).unwrap();
        assert_eq!(metrics.screen_position.top, 0);
    }

    #[test]
    fn test_large_negative_top_is_kept() {
        let info = window_info(1, "app", Rect::new(10, -20, 100, 100));
        let metrics = measure(&info, TASKBAR_CLASS, at(0)).unwrap();
        assert_eq!(metrics.screen_position.top, -20);
        assert_eq!(sanitize_top(-15), -15);
        assert_eq!(sanitize_top(-14), 0);
    }

    #[test]
    fn test_first_sighting_is_a_move() {
        let mut live = metrics_at(Rect::new(0, 0, 100, 100), 0);
        let verdict = assess(None, &mut live, &live_ctx(CaptureTrigger::Batch));
        assert_eq!(verdict, Assessment::moved());
    }

    #[test]
    fn test_identical_observation_is_not_a_move() {
        let mut history = history_of(vec![metrics_at(Rect::new(0, 0, 100, 100), 0)]);
        let mut live = metrics_at(Rect::new(0, 0, 100, 100), 5);
        let verdict = assess(Some(&mut history), &mut live, &live_ctx(CaptureTrigger::Batch));
        assert!(!verdict.moved);
    }

    #[test]
    fn test_position_change_is_a_move() {
        let mut history = history_of(vec![metrics_at(Rect::new(0, 0, 100, 100), 0)]);
        let mut live = metrics_at(Rect::new(0, 0, 100, 100), 5);
        live.screen_position = Rect::new(50, 0, 100, 100);
        let verdict = assess(Some(&mut history), &mut live, &live_ctx(CaptureTrigger::Batch));
        assert!(verdict.moved);
        assert!(!live.needs_placement_update);
    }

    #[test]
    fn test_placement_change_flags_update() {
        let mut history = history_of(vec![metrics_at(Rect::new(0, 0, 100, 100), 0)]);
        let mut live = metrics_at(Rect::new(0, 0, 100, 100), 5);
        live.placement = Placement::new(Rect::new(0, 0, 100, 100), ShowState::Maximized);
        let verdict = assess(
            Some(&mut history),
            &mut live,
            &live_ctx(CaptureTrigger::Event(WindowEventKind::MoveSizeEnd)),
        );
        assert!(verdict.moved);
        assert!(live.needs_placement_update);
    }

    #[test]
    fn test_foreground_activation_is_not_a_move() {
        let mut history = history_of(vec![metrics_at(Rect::new(0, 0, 100, 100), 0)]);
        let mut live = metrics_at(Rect::new(300, 300, 100, 100), 5);
        let verdict = assess(
            Some(&mut history),
            &mut live,
            &live_ctx(CaptureTrigger::Event(WindowEventKind::Foreground)),
        );
        assert!(!verdict.moved);
    }

    #[test]
    fn test_handle_reuse_discards_history() {
        let mut history = history_of(vec![metrics_at(Rect::new(0, 0, 100, 100), 0)]);
        let mut live = metrics_at(Rect::new(0, 0, 100, 100), 5);
        live.process_id += 1;
        // Collision wins over foreground suppression
        let verdict = assess(
            Some(&mut history),
            &mut live,
            &live_ctx(CaptureTrigger::Event(WindowEventKind::Foreground)),
        );
        assert_eq!(verdict, Assessment { moved: true, action: HistoryAction::Discard });
    }

    #[test]
    fn test_taskbar_moves_on_rect_only() {
        let mut prev = metrics_at(Rect::new(0, 1040, 1920, 40), 0);
        prev.is_taskbar = true;
        let mut history = history_of(vec![prev]);

        let mut live = metrics_at(Rect::new(0, 0, 1920, 40), 5);
        live.is_taskbar = true;
        // Placement kept identical to prove only the rectangle is compared
        live.placement = history.last().unwrap().placement;
        let verdict = assess(Some(&mut history), &mut live, &live_ctx(CaptureTrigger::Batch));
        assert!(verdict.moved);
        assert!(!live.needs_placement_update);

        let mut same = metrics_at(Rect::new(0, 1040, 1920, 40), 6);
        same.is_taskbar = true;
        same.placement = Placement::new(Rect::new(1, 2, 3, 4), ShowState::Maximized);
        let verdict = assess(Some(&mut history), &mut same, &live_ctx(CaptureTrigger::Batch));
        assert!(!verdict.moved);
    }

    #[test]
    fn test_restore_truncates_entries_after_cutoff() {
        let mut history = history_of(vec![
            metrics_at(Rect::new(100, 100, 800, 600), 0),
            metrics_at(Rect::new(10, 10, 800, 600), 50),
            metrics_at(Rect::new(20, 20, 800, 600), 60),
        ]);
        let mut live = metrics_at(Rect::new(20, 20, 800, 600), 70);
        let ctx = DetectContext { trigger: CaptureTrigger::Batch, restoring: true, time: at(40) };

        let verdict = assess(Some(&mut history), &mut live, &ctx);
        assert!(verdict.moved);
        assert_eq!(history.len(), 1);
        assert_eq!(history.last().unwrap().screen_position, Rect::new(100, 100, 800, 600));
    }

    #[test]
    fn test_restore_with_nothing_before_cutoff_is_not_a_move() {
        let mut history = history_of(vec![metrics_at(Rect::new(0, 0, 100, 100), 50)]);
        let mut live = metrics_at(Rect::new(500, 500, 100, 100), 70);
        let ctx = DetectContext { trigger: CaptureTrigger::Batch, restoring: true, time: at(10) };

        let verdict = assess(Some(&mut history), &mut live, &ctx);
        assert!(!verdict.moved);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_restore_with_out_of_order_history_is_not_a_move() {
        let mut history = history_of(vec![
            metrics_at(Rect::new(0, 0, 100, 100), 30),
            metrics_at(Rect::new(5, 0, 100, 100), 10),
        ]);
        let mut live = metrics_at(Rect::new(500, 500, 100, 100), 70);
        let ctx = DetectContext { trigger: CaptureTrigger::Batch, restoring: true, time: at(40) };

        assert!(!assess(Some(&mut history), &mut live, &ctx).moved);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_no_truncation_outside_restore() {
        let mut history = history_of(vec![
            metrics_at(Rect::new(0, 0, 100, 100), 0),
            metrics_at(Rect::new(5, 0, 100, 100), 50),
        ]);
        let mut live = metrics_at(Rect::new(5, 0, 100, 100), 70);
        let ctx = DetectContext { trigger: CaptureTrigger::Batch, restoring: false, time: at(10) };

        assert!(!assess(Some(&mut history), &mut live, &ctx).moved);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_measure_keeps_identity_fields() {
        let info = window_info(7, "editor", Rect::new(0, 0, 640, 480));
        let metrics = measure(&info, TASKBAR_CLASS, at(0)).unwrap();
        assert_eq!(metrics.identity, WindowIdentity::new(WindowHandle(7), "editor"));
        assert_eq!(metrics.process_id, info.process_id);
    }
}
