//! Restore side: the bounded, self-terminating pass loop
//!
//! A session starts `Idle → Restoring`. Each pass re-resolves the display key
//! and re-applies the last known-good metrics of every window that differs.
//! The first few passes are forced on a short timer because the window system
//! does not report every correction it makes; later passes only happen when a
//! location change arrives. Every pass re-arms the finished timer, and once it
//! expires quietly the session ends.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

use super::{DataState, Engine, Notification, RestorePhase, RestoreSession, RestoreSource};
use crate::constants::restore::MAX_NESTING_DEPTH;
use crate::detector::{self, DetectContext};
use crate::dispatch::run_guarded;
use crate::types::{CaptureTrigger, CapturedMetrics, DisplayKey, Placement, ShowState};

/// Outcome of asking for another restore pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassRequest {
    Dispatched,
    /// Too many passes already in flight
    Busy,
    NotRestoring,
    /// Worker queue refused the job
    Rejected,
}

impl Engine {
    pub(crate) fn on_restore_timer(self: &Arc<Self>) {
        trace!("Restore timer expired");
        self.request_restore_pass();
    }

    /// Enter a restore session (or retarget the running one) and arm the first pass
    pub(crate) fn begin_restore(&self, source: RestoreSource, delay: Duration, reference_time: Option<DateTime<Utc>>) -> bool {
        let (started, key) = {
            let mut control = self.control.lock();
            if control.paused && source == RestoreSource::Memory {
                debug!("Auto restore paused, ignoring trigger");
                return false;
            }

            let started = match control.session_mut() {
                Some(session) => {
                    session.source = source;
                    session.reference_time = reference_time;
                    false
                }
                None => {
                    control.phase = RestorePhase::Restoring(RestoreSession::new(source, reference_time));
                    true
                }
            };
            self.restore_timer.start(delay);
            (started, control.valid_key.clone())
        };

        if started {
            info!(source = ?source, delay_ms = delay.as_millis() as u64, "Restore session started");
            self.notify(Notification::RestoreStarted { display_key: key.0 });
        }
        true
    }

    /// Dispatch one pass unless the nesting guard refuses it
    pub fn request_restore_pass(self: &Arc<Self>) -> PassRequest {
        let entered = self.enter_pass();
        if entered != PassRequest::Dispatched {
            return entered;
        }

        let engine = Arc::clone(self);
        let submitted = self.workers.submit("restore-pass", move || {
            run_guarded("restore-pass", || {
                engine.run_restore_pass();
            });
            engine.leave_pass();
        });
        if !submitted {
            self.leave_pass();
            return PassRequest::Rejected;
        }
        PassRequest::Dispatched
    }

    fn enter_pass(&self) -> PassRequest {
        let mut control = self.control.lock();
        let Some(session) = control.session_mut() else {
            return PassRequest::NotRestoring;
        };
        if session.nesting_depth > MAX_NESTING_DEPTH {
            debug!(nesting = session.nesting_depth, "Restore busy, dropping pass");
            return PassRequest::Busy;
        }
        session.nesting_depth += 1;
        PassRequest::Dispatched
    }

    fn leave_pass(&self) {
        if let Some(session) = self.control.lock().session_mut() {
            session.nesting_depth = session.nesting_depth.saturating_sub(1);
        }
    }

    /// Body of one restore pass. Returns `false` when no pass was issued.
    pub(crate) fn run_restore_pass(&self) -> bool {
        let mut data = self.data.lock();
        self.finished_timer.cancel();

        let key = self.current_key();
        let (pass_count, reference_time) = {
            let mut control = self.control.lock();
            let remote = control.remote;
            let Some(session) = control.session() else {
                return false;
            };
            let (pass_count, reference_time) = (session.pass_count, session.reference_time);

            if pass_count >= self.settings.max_restore_passes(remote) {
                debug!(passes = pass_count, remote, "Restore pass ceiling reached");
                self.finished_timer.start(Duration::ZERO);
                return false;
            }
            control.valid_key = key.clone();
            (pass_count, reference_time)
        };

        let cutoff = match reference_time {
            Some(time) => time,
            None => self.restore_cutoff(&key),
        };
        let restored = self.restore_windows(&mut data, &key, pass_count, cutoff);

        let passes = {
            let mut control = self.control.lock();
            match control.session_mut() {
                Some(session) => {
                    session.pass_count += 1;
                    session.pass_count
                }
                None => pass_count + 1,
            }
        };
        info!(display = %key, pass = passes, windows = restored, "Restore pass complete");

        self.finished_timer.start(self.settings.max_restore_latency());
        if passes < self.settings.min_restore_passes {
            self.restore_timer.start(self.settings.restore_latency());
        }
        true
    }

    /// Quiet period elapsed: leave the session and resume capture
    pub(crate) fn finish_restore(&self) {
        let (key, passes) = {
            let mut control = self.control.lock();
            let Some(session) = control.session() else {
                return;
            };
            let passes = session.pass_count;
            control.phase = RestorePhase::Finishing;
            (control.valid_key.clone(), passes)
        };

        self.reset_state();
        self.remove_session_end();
        self.control.lock().phase = RestorePhase::Idle;

        info!(display = %key, passes, "Restore finished");
        self.notify(Notification::RestoreFinished { display_key: key.0, passes });
    }

    fn restore_windows(&self, data: &mut DataState, key: &DisplayKey, pass_count: u32, cutoff: DateTime<Utc>) -> usize {
        if !data.store.has_configuration(key) {
            debug!(display = %key, "Display configuration never captured, nothing to restore");
            return 0;
        }

        trace!(display = %key, cutoff = %cutoff, "Restoring windows");
        let ctx = DetectContext {
            trigger: CaptureTrigger::Batch,
            restoring: true,
            time: cutoff,
        };

        let mut restored = 0;
        for info in self.live_windows() {
            if self.settings.is_skipped_process(&info.process_name) {
                trace!(window = %info.handle, process = %info.process_name, "Skipping excluded process");
                continue;
            }
            let Some(mut live) = detector::measure(&info, &self.settings.taskbar_class, self.clock.now()) else {
                continue;
            };
            if !data.store.contains(key, &live.identity) {
                continue;
            }
            if !data.store.assess(key, &mut live, &ctx).moved {
                continue;
            }
            let Some(target) = data.store.last_known(key, &live.identity).cloned() else {
                continue;
            };

            self.restore_window(&live, &target, pass_count);
            restored += 1;
        }
        restored
    }

    /// Re-apply `target` to the live window. Failures are logged and do not stop the batch.
    fn restore_window(&self, live: &CapturedMetrics, target: &CapturedMetrics, pass_count: u32) -> bool {
        let handle = live.identity.handle;
        let rect = target.screen_position;
        let dry_run = self.settings.dry_run;

        if live.is_taskbar {
            let (x, y) = rect.center();
            if dry_run {
                info!(window = %live.identity, x, y, "Dry run: would drag taskbar");
                return true;
            }
            return match self.platform.drag_taskbar_to(handle, x, y) {
                Ok(()) => {
                    info!(window = %live.identity, x, y, "Dragged taskbar");
                    true
                }
                Err(e) => {
                    error!(window = %live.identity, error = %e, "Failed to drag taskbar");
                    false
                }
            };
        }

        let mut success = true;
        if pass_count >= self.settings.min_restore_passes || live.needs_placement_update {
            let placement = target.placement;
            if dry_run {
                info!(window = %live.identity, normal = %placement.normal_position, state = ?placement.show_state, "Dry run: would set placement");
            } else {
                if placement.show_state == ShowState::Maximized {
                    // Maximizing straight onto a new layout can leave the window short of the work area
                    let normal = Placement::new(placement.normal_position, ShowState::Normal);
                    if let Err(e) = self.platform.set_placement(handle, &normal) {
                        debug!(window = %live.identity, error = %e, "Failed to unmaximize before placement");
                    }
                }
                match self.platform.set_placement(handle, &placement) {
                    Ok(()) => info!(window = %live.identity, normal = %placement.normal_position, state = ?placement.show_state, "Set placement"),
                    Err(e) => {
                        error!(window = %live.identity, error = %e, "Failed to set placement");
                        success = false;
                    }
                }
            }
        }

        if dry_run {
            info!(window = %live.identity, rect = %rect, "Dry run: would move window");
            return success;
        }
        match self.platform.move_window(handle, rect) {
            Ok(()) => info!(window = %live.identity, rect = %rect, "Moved window"),
            Err(e) => {
                error!(window = %live.identity, rect = %rect, error = %e, "Failed to move window");
                success = false;
            }
        }
        success
    }
}
