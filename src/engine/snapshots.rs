//! User-requested operations: named snapshots, disk capture, pause/resume

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::info;

use super::{Engine, Notification, RestoreSource};
use crate::constants::snapshot::{MAX_USER_SNAPSHOT, PREVIOUS_WORKSPACE};
use crate::detector;
use crate::types::{CapturedMetrics, WindowIdentity};

impl Engine {
    /// Record the live layout of the current display as snapshot `id`
    pub fn take_snapshot(&self, id: u8) -> Result<usize> {
        if id > MAX_USER_SNAPSHOT {
            bail!("Snapshot id {} out of range (0-{})", id, MAX_USER_SNAPSHOT);
        }

        let key = self.current_key();
        let now = self.clock.now();
        let windows = {
            let mut data = self.data.lock();
            let layout = self.measure_live_windows(now);
            let count = layout.len();
            data.snapshots.entry(key.clone()).or_default().insert(id, layout);
            count
        };

        info!(id, display = %key, windows, "Snapshot captured");
        self.notify(Notification::SnapshotCaptured { id, windows });
        Ok(windows)
    }

    /// Restore snapshot `id`; the layout being replaced becomes the previous workspace
    pub fn restore_snapshot(&self, id: u8) -> Result<usize> {
        if id > PREVIOUS_WORKSPACE {
            bail!("Snapshot id {} out of range (0-{})", id, PREVIOUS_WORKSPACE);
        }

        let key = self.current_key();
        let now = self.clock.now();
        let injected = {
            let mut data = self.data.lock();
            let Some(snapshot) = data.snapshots.get(&key).and_then(|s| s.get(&id)).cloned() else {
                bail!("Snapshot {} was never captured for display {}", id, key);
            };

            let current = self.measure_live_windows(now);
            let live: HashSet<WindowIdentity> = current.iter().map(|m| m.identity.clone()).collect();
            if id != PREVIOUS_WORKSPACE {
                data.snapshots.entry(key.clone()).or_default().insert(PREVIOUS_WORKSPACE, current);
            }

            let mut injected = 0;
            for mut target in snapshot {
                if !live.contains(&target.identity) {
                    continue;
                }
                target.capture_time = now;
                data.store.push(&key, target);
                injected += 1;
            }
            injected
        };

        info!(id, display = %key, windows = injected, "Restoring snapshot");
        self.reset_state();
        self.begin_restore(RestoreSource::Snapshot(id), self.settings.restore_latency(), Some(now));
        Ok(injected)
    }

    /// Batch capture that also writes every observed window to the disk database
    pub fn capture_to_disk(&self) -> Result<usize> {
        let key = self.current_key();
        {
            let control = self.control.lock();
            if key != control.valid_key {
                bail!("Display changed to {} while expecting {}, capture discarded", key, control.valid_key);
            }
        }

        let now = self.clock.now();
        let saved = {
            let mut data = self.data.lock();
            let (_, observed) = self.capture_live_windows(&mut data, &key, now);
            let saved = observed.len();
            data.db.replace(&key, observed)?;
            saved
        };

        info!(display = %key, windows = saved, "Captured windows to disk");
        self.notify(Notification::DiskRestoreAvailable);
        Ok(saved)
    }

    /// Restore the live windows from the disk capture of the current display.
    ///
    /// Records are matched by title, then by process name, and must agree on
    /// class name. Matches are re-keyed to the live window and pushed into
    /// history so the restore passes compare against them.
    pub fn restore_from_disk(&self) -> Result<usize> {
        let key = self.current_key();
        let now = self.clock.now();
        let injected = {
            let mut data = self.data.lock();
            if !data.db.has_configuration(&key) {
                bail!("No disk capture for display {}", key);
            }

            let mut injected = 0;
            for info in self.live_windows() {
                if self.settings.is_skipped_process(&info.process_name) {
                    continue;
                }
                let record = data
                    .db
                    .find_by_title(&key, &info.title)
                    .or_else(|| data.db.find_by_process_name(&key, &info.process_name));
                let Some(mut target) = record else {
                    continue;
                };
                if target.class_name != info.class_name {
                    continue;
                }

                target.identity = WindowIdentity::new(info.handle, info.process_name.clone());
                target.process_id = info.process_id;
                target.capture_time = now;
                data.store.push(&key, target);
                injected += 1;
            }
            injected
        };

        info!(display = %key, windows = injected, "Restoring from disk");
        self.reset_state();
        self.begin_restore(RestoreSource::Disk, self.settings.restore_latency(), Some(now));
        Ok(injected)
    }

    pub fn pause_auto_restore(&self) {
        let mut control = self.control.lock();
        control.paused = true;
        control.pending_windows.clear();
        self.capture_timer.cancel();
        info!("Auto restore paused");
    }

    pub fn resume_auto_restore(&self) {
        self.control.lock().paused = false;
        info!("Auto restore resumed");
        self.reset_state();
        self.begin_restore(RestoreSource::Memory, self.settings.restore_latency(), None);
    }

    fn measure_live_windows(&self, now: DateTime<Utc>) -> Vec<CapturedMetrics> {
        self.live_windows()
            .iter()
            .filter_map(|info| detector::measure(info, &self.settings.taskbar_class, now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::platform::WindowEvent;
    use crate::testing::{Call, window_info};
    use crate::types::{Rect, SystemEvent, WindowEventKind, WindowHandle};

    const A: Rect = Rect::new(100, 100, 800, 600);
    const B: Rect = Rect::new(50, 50, 400, 300);

    #[test]
    fn test_snapshot_round_trip_through_restore() {
        let f = fixture();
        let rx = f.engine.subscribe();
        f.fake.add_window(window_info(1, "editor", A));
        assert_eq!(f.engine.take_snapshot(2).unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), Notification::SnapshotCaptured { id: 2, windows: 1 });

        f.clock.advance(60);
        f.fake.set_rect(WindowHandle(1), B);
        f.engine.batch_capture();
        f.clock.advance(60);

        assert_eq!(f.engine.restore_snapshot(2).unwrap(), 1);
        assert_eq!(f.engine.status().restore_source, Some(RestoreSource::Snapshot(2)));
        assert!(f.engine.run_restore_pass());
        assert!(f.fake.calls().contains(&Call::Move(WindowHandle(1), A)));
    }

    #[test]
    fn test_restoring_snapshot_saves_previous_workspace() {
        let f = fixture();
        f.fake.add_window(window_info(1, "editor", A));
        f.engine.take_snapshot(0).unwrap();
        f.fake.set_rect(WindowHandle(1), B);

        f.engine.restore_snapshot(0).unwrap();
        let data = f.engine.data.lock();
        let previous = &data.snapshots.values().next().unwrap()[&PREVIOUS_WORKSPACE];
        assert_eq!(previous[0].screen_position, B);
    }

    #[test]
    fn test_snapshot_ids_are_validated() {
        let f = fixture();
        assert!(f.engine.take_snapshot(4).is_err());
        assert!(f.engine.restore_snapshot(5).is_err());
        assert!(f.engine.restore_snapshot(1).is_err());
        assert!(!f.engine.status().restoring);
    }

    #[test]
    fn test_snapshot_is_per_display() {
        let f = fixture();
        f.fake.add_window(window_info(1, "editor", A));
        f.engine.take_snapshot(1).unwrap();
        f.fake.set_monitors(monitors(D2));
        assert!(f.engine.restore_snapshot(1).is_err());
    }

    #[test]
    fn test_disk_round_trip_matches_by_title() {
        let f = fixture();
        let rx = f.engine.subscribe();
        f.fake.add_window(window_info(1, "editor", A));
        assert_eq!(f.engine.capture_to_disk().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), Notification::DiskRestoreAvailable);
        assert!(f.engine.status().disk_snapshot_available);

        // Same application relaunched under a new handle, somewhere else
        f.fake.remove_window(WindowHandle(1));
        f.fake.add_window(window_info(7, "editor", B));
        f.clock.advance(60);

        assert_eq!(f.engine.restore_from_disk().unwrap(), 1);
        assert!(f.engine.run_restore_pass());
        assert!(f.fake.calls().contains(&Call::Move(WindowHandle(7), A)));
    }

    #[test]
    fn test_disk_restore_rejects_class_mismatch() {
        let f = fixture();
        f.fake.add_window(window_info(1, "editor", A));
        f.engine.capture_to_disk().unwrap();

        let mut other = window_info(2, "editor", B);
        other.class_name = "OtherClass".to_string();
        f.fake.remove_window(WindowHandle(1));
        f.fake.add_window(other);

        assert_eq!(f.engine.restore_from_disk().unwrap(), 0);
    }

    #[test]
    fn test_disk_restore_without_capture_fails() {
        let f = fixture();
        assert!(f.engine.restore_from_disk().is_err());
        assert!(!f.engine.status().restoring);
    }

    #[test]
    fn test_capture_to_disk_refused_mid_transition() {
        let f = fixture();
        f.fake.set_monitors(monitors(D2));
        assert!(f.engine.capture_to_disk().is_err());
    }

    #[test]
    fn test_pause_makes_triggers_inert() {
        let f = fixture();
        f.fake.add_window(window_info(1, "editor", A));
        f.engine.pause_auto_restore();

        f.engine.handle_window_event(WindowEvent {
            kind: WindowEventKind::LocationChange,
            handle: WindowHandle(1),
        });
        assert_eq!(f.engine.status().pending_windows, 0);

        f.engine.handle_system_event(SystemEvent::DisplaySettingsChanged);
        assert!(!f.engine.status().restoring);

        f.engine.resume_auto_restore();
        let status = f.engine.status();
        assert!(!status.paused);
        assert!(status.restoring);
        assert_eq!(status.restore_source, Some(RestoreSource::Memory));
    }
}
