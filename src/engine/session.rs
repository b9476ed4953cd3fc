//! Display, power and session notifications

use std::sync::Arc;
use tracing::{info, trace};

use super::{Engine, RestoreSource};
use crate::types::{SessionSwitch, SystemEvent};

impl Engine {
    pub fn handle_system_event(self: &Arc<Self>, event: SystemEvent) {
        match event {
            SystemEvent::DisplaySettingsChanging => {
                info!("Display settings changing");
                self.end_display_session();
            }
            SystemEvent::DisplaySettingsChanged => {
                info!("Display settings changed");
                if self.control.lock().locked {
                    // Unlock will start the restore
                    return;
                }
                self.reset_state();
                self.begin_restore(RestoreSource::Memory, self.settings.restore_latency(), None);
            }
            SystemEvent::PowerSuspend => {
                info!("System suspending");
                if !self.control.lock().locked {
                    self.end_display_session();
                }
            }
            SystemEvent::PowerResume => {
                info!("System resuming");
                // The display change notification is not guaranteed after resume
                if !self.control.lock().locked {
                    self.begin_restore(RestoreSource::Memory, self.settings.default_restore_latency(), None);
                }
            }
            SystemEvent::Session(reason) => self.handle_session_switch(reason),
        }
    }

    fn handle_session_switch(&self, reason: SessionSwitch) {
        match reason {
            SessionSwitch::Lock => {
                trace!(reason = ?reason, "Session closing");
                self.control.lock().locked = true;
                self.end_display_session();
            }
            SessionSwitch::Unlock => {
                trace!(reason = ?reason, "Session opening");
                self.control.lock().locked = false;
                self.begin_restore(RestoreSource::Memory, self.settings.default_restore_latency(), None);
            }
            SessionSwitch::RemoteConnect => {
                trace!(reason = ?reason, "Session opening");
                self.control.lock().remote = true;
            }
            SessionSwitch::ConsoleConnect => {
                trace!(reason = ?reason, "Session opening");
                self.control.lock().remote = false;
            }
            SessionSwitch::RemoteDisconnect | SessionSwitch::ConsoleDisconnect => {
                trace!(reason = ?reason, "Session closing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::types::DisplayKey;

    fn d1() -> DisplayKey {
        DisplayKey("1920x1080@0,0".to_string())
    }

    #[test]
    fn test_display_change_starts_restore() {
        let f = fixture();
        f.engine.handle_system_event(SystemEvent::DisplaySettingsChanging);
        assert!(f.engine.control.lock().session_end.contains_key(&d1()));
        assert!(!f.engine.status().restoring);

        f.engine.handle_system_event(SystemEvent::DisplaySettingsChanged);
        let status = f.engine.status();
        assert!(status.restoring);
        assert_eq!(status.restore_source, Some(RestoreSource::Memory));
        assert_eq!(status.pass_count, 0);
    }

    #[test]
    fn test_display_change_while_locked_is_deferred() {
        let f = fixture();
        f.engine.handle_system_event(SystemEvent::Session(SessionSwitch::Lock));
        assert!(f.engine.status().locked);
        assert!(f.engine.control.lock().session_end.contains_key(&d1()));

        f.engine.handle_system_event(SystemEvent::DisplaySettingsChanged);
        assert!(!f.engine.status().restoring);

        f.engine.handle_system_event(SystemEvent::Session(SessionSwitch::Unlock));
        let status = f.engine.status();
        assert!(!status.locked);
        assert!(status.restoring);
    }

    #[test]
    fn test_suspend_while_locked_keeps_lock_time() {
        let f = fixture();
        f.clock.set(10);
        f.engine.handle_system_event(SystemEvent::Session(SessionSwitch::Lock));
        f.clock.set(20);
        f.engine.handle_system_event(SystemEvent::PowerSuspend);
        f.engine.handle_system_event(SystemEvent::PowerResume);

        assert_eq!(f.engine.control.lock().session_end.get(&d1()), Some(&crate::testing::at(10)));
        assert!(!f.engine.status().restoring);
    }

    #[test]
    fn test_resume_starts_restore() {
        let f = fixture();
        f.engine.handle_system_event(SystemEvent::PowerSuspend);
        f.engine.handle_system_event(SystemEvent::PowerResume);
        assert!(f.engine.status().restoring);
    }

    #[test]
    fn test_remote_flag_follows_connects() {
        let f = fixture();
        f.engine.handle_system_event(SystemEvent::Session(SessionSwitch::RemoteConnect));
        assert!(f.engine.status().remote);
        f.engine.handle_system_event(SystemEvent::Session(SessionSwitch::RemoteDisconnect));
        assert!(f.engine.status().remote);
        f.engine.handle_system_event(SystemEvent::Session(SessionSwitch::ConsoleConnect));
        assert!(!f.engine.status().remote);
    }

    #[test]
    fn test_display_change_resets_running_session() {
        let f = fixture();
        force_restoring(&f.engine);
        f.engine.control.lock().session_mut().unwrap().pass_count = 3;

        f.engine.handle_system_event(SystemEvent::DisplaySettingsChanged);
        assert_eq!(f.engine.status().pass_count, 0);
    }
}
