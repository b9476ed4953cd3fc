//! Capture side: event filtering, debounce, batch capture and session bookkeeping

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::{DataState, Engine};
use crate::constants::timing::SESSION_END_MARGIN_MS;
use crate::detector::{self, DetectContext};
use crate::platform::{WindowEvent, WindowInfo};
use crate::types::{CaptureTrigger, CapturedMetrics, DisplayKey, WindowEventKind, WindowHandle};

impl Engine {
    /// Route one window notification.
    ///
    /// Location changes are debounced; the other kinds capture the single
    /// window on a worker. During a restore only location changes matter, and
    /// only to re-arm the next pass.
    pub(crate) fn handle_window_event(self: &Arc<Self>, event: WindowEvent) {
        let info = match self.platform.inspect(event.handle) {
            Ok(Some(info)) => info,
            Ok(None) => return,
            Err(e) => {
                trace!(window = %event.handle, error = ?e, "Window vanished before inspection");
                return;
            }
        };
        if !info.is_of_interest() || info.title.is_empty() {
            return;
        }

        let now = self.clock.now();
        {
            let mut control = self.control.lock();
            if control.paused {
                return;
            }

            if control.is_restoring() {
                if event.kind == WindowEventKind::LocationChange
                    && control
                        .session()
                        .is_some_and(|s| s.pass_count >= self.settings.min_restore_passes)
                {
                    // Something else moved a window mid-restore: go again
                    self.restore_timer.start(self.settings.restore_latency());
                }
                return;
            }

            if event.kind == WindowEventKind::LocationChange {
                // Cannot tell a user snap from an OS reflow yet; wait for the burst to settle
                if control.pending_windows.is_empty() {
                    self.capture_timer.start(self.settings.capture_latency());
                }
                control.pending_windows.insert(event.handle);
                return;
            }
        }

        let key = self.current_key();
        {
            let mut control = self.control.lock();
            if key != control.valid_key {
                control.capture_disabled = true;
                trace!(display = %key, expected = %control.valid_key, "Discarding capture for unexpected display");
                return;
            }
        }

        let engine = Arc::clone(self);
        let handle = event.handle;
        let kind = event.kind;
        self.workers.submit("capture-window", move || {
            engine.capture_event_window(handle, kind, now, &key);
        });
    }

    /// Capture one window after a user-level notification
    pub(crate) fn capture_event_window(&self, handle: WindowHandle, kind: WindowEventKind, now: DateTime<Utc>, key: &DisplayKey) -> bool {
        let info = match self.platform.inspect(handle) {
            Ok(Some(info)) => info,
            _ => return false,
        };

        let mut data = self.data.lock();
        let recorded = self.capture_one(&mut data, &info, CaptureTrigger::Event(kind), now, key).is_some();
        if kind != WindowEventKind::Foreground {
            // A deliberate user action: the epoch is live again
            self.remove_session_end();
        }
        recorded
    }

    /// Record `info` if the detector judges it moved; returns the recorded metrics
    fn capture_one(
        &self,
        data: &mut DataState,
        info: &WindowInfo,
        trigger: CaptureTrigger,
        now: DateTime<Utc>,
        key: &DisplayKey,
    ) -> Option<CapturedMetrics> {
        let live = detector::measure(info, &self.settings.taskbar_class, now)?;
        let ctx = DetectContext { trigger, restoring: false, time: now };
        let snapshot = live.clone();
        if !data.store.record_if_moved(key, live, &ctx) {
            return None;
        }
        trace!(
            window = %snapshot.identity,
            display = %key,
            rect = %snapshot.screen_position,
            placement = %snapshot.placement.normal_position,
            state = ?snapshot.placement.show_state,
            title = %snapshot.title,
            "Captured window"
        );
        Some(snapshot)
    }

    /// Capture every window of interest under `key`; returns the live metrics seen
    pub(super) fn capture_live_windows(&self, data: &mut DataState, key: &DisplayKey, now: DateTime<Utc>) -> (usize, Vec<CapturedMetrics>) {
        let mut recorded = 0;
        let mut observed = Vec::new();
        for info in self.live_windows() {
            if self.capture_one(data, &info, CaptureTrigger::Batch, now, key).is_some() {
                recorded += 1;
            }
            if let Some(metrics) = detector::measure(&info, &self.settings.taskbar_class, now) {
                observed.push(metrics);
            }
        }
        (recorded, observed)
    }

    /// Debounce expiry: a large burst means the OS is reshuffling windows
    pub(crate) fn on_capture_timer(self: &Arc<Self>) {
        {
            let mut control = self.control.lock();
            if control.capture_disabled || control.paused {
                return;
            }

            let burst = control.pending_windows.len();
            if burst > self.settings.min_os_move_windows {
                debug!(windows = burst, "Location burst looks OS-initiated, marking session end");
                let key = control.valid_key.clone();
                control.session_end.entry(key).or_insert_with(|| self.clock.now());
            }
            control.pending_windows.clear();
        }

        trace!("Capture timer expired");
        let engine = Arc::clone(self);
        self.workers.submit("batch-capture", move || {
            engine.batch_capture();
        });
    }

    /// Capture all windows for the current epoch. Returns how many were recorded.
    pub fn batch_capture(&self) -> usize {
        let key = self.current_key();
        {
            let mut control = self.control.lock();
            if key != control.valid_key {
                control.capture_disabled = true;
                trace!(display = %key, expected = %control.valid_key, "Discarding batch capture for unexpected display");
                return 0;
            }
        }

        let now = self.clock.now();
        let mut data = self.data.lock();
        let (recorded, _) = self.capture_live_windows(&mut data, &key, now);
        if recorded > 0 {
            debug!(display = %key, windows = recorded, "Batch capture recorded windows");
        }
        recorded
    }

    /// Stop capturing and remember when this epoch was last trustworthy
    pub(crate) fn end_display_session(&self) {
        self.capture_timer.cancel();
        self.reset_state();
        self.record_session_end(self.clock.now(), false);
    }

    /// Clear restore counters and capture statistics
    pub(crate) fn reset_state(&self) {
        let mut control = self.control.lock();
        self.restore_timer.cancel();
        if let Some(session) = control.session_mut() {
            session.pass_count = 0;
            session.nesting_depth = 0;
        }
        control.capture_disabled = false;
        control.pending_windows.clear();
    }

    pub(crate) fn record_session_end(&self, time: DateTime<Utc>, force: bool) {
        let mut control = self.control.lock();
        let key = control.valid_key.clone();
        if force || !control.session_end.contains_key(&key) {
            info!(display = %key, time = %time, "Recorded session end");
            control.session_end.insert(key, time);
        }
    }

    pub(crate) fn remove_session_end(&self) {
        let mut control = self.control.lock();
        let key = control.valid_key.clone();
        control.session_end.remove(&key);
    }

    /// Comparison time for restoring `key` from memory
    pub(super) fn restore_cutoff(&self, key: &DisplayKey) -> DateTime<Utc> {
        let margin = ChronoDuration::milliseconds(self.settings.capture_latency_ms as i64 + SESSION_END_MARGIN_MS);
        match self.control.lock().session_end.get(key) {
            Some(end) => *end - margin,
            None => self.clock.now(),
        }
    }
}
