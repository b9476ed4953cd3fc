//! Capture/restore engine
//!
//! One owned instance holds every piece of mutable state behind two locks:
//! - `data` guards the snapshot store, named snapshots and the disk database.
//!   Capture and restore both run under it, so they never interleave.
//! - `control` guards the flags and counters that drive the timers. It is only
//!   held for short sections and never across a window-system call.
//!
//! Lock order is always `data` then `control`.

mod capture;
mod restore;
mod session;
mod snapshots;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Settings;
use crate::constants::capture::WORKER_QUEUE_LEN;
use crate::dispatch::WorkerPool;
use crate::display::display_key;
use crate::persistence::SnapshotDb;
use crate::platform::{EventSource, PlatformEvent, WindowInfo, WindowSystem};
use crate::store::SnapshotStore;
use crate::timer::RestartTimer;
use crate::types::{CapturedMetrics, DisplayKey, WindowHandle};

/// Where a restore session takes its targets from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreSource {
    /// Capture history from before the disruption
    Memory,
    /// Named snapshot injected at session start
    Snapshot(u8),
    /// Records loaded from the disk database
    Disk,
}

#[derive(Debug, Clone, Copy)]
struct RestoreSession {
    pass_count: u32,
    nesting_depth: u32,
    source: RestoreSource,
    /// Fixed comparison time for injected targets; `None` derives it from the session end
    reference_time: Option<DateTime<Utc>>,
}

impl RestoreSession {
    fn new(source: RestoreSource, reference_time: Option<DateTime<Utc>>) -> Self {
        Self {
            pass_count: 0,
            nesting_depth: 0,
            source,
            reference_time,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RestorePhase {
    Idle,
    Restoring(RestoreSession),
    Finishing,
}

struct ControlState {
    pending_windows: HashSet<WindowHandle>,
    capture_disabled: bool,
    /// Display key of the current capture epoch
    valid_key: DisplayKey,
    phase: RestorePhase,
    /// Last known-good moment per display key
    session_end: HashMap<DisplayKey, DateTime<Utc>>,
    locked: bool,
    remote: bool,
    paused: bool,
}

impl ControlState {
    fn is_restoring(&self) -> bool {
        !matches!(self.phase, RestorePhase::Idle)
    }

    fn session(&self) -> Option<&RestoreSession> {
        match &self.phase {
            RestorePhase::Restoring(session) => Some(session),
            _ => None,
        }
    }

    fn session_mut(&mut self) -> Option<&mut RestoreSession> {
        match &mut self.phase {
            RestorePhase::Restoring(session) => Some(session),
            _ => None,
        }
    }
}

struct DataState {
    store: SnapshotStore,
    /// Display key → snapshot id → captured layout
    snapshots: HashMap<DisplayKey, BTreeMap<u8, Vec<CapturedMetrics>>>,
    db: Box<dyn SnapshotDb>,
}

/// Events emitted for the control surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    RestoreStarted { display_key: String },
    RestoreFinished { display_key: String, passes: u32 },
    SnapshotCaptured { id: u8, windows: usize },
    /// A disk capture exists for the current display configuration
    DiskRestoreAvailable,
}

/// Point-in-time view of the engine, for `status` queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub display_key: String,
    pub valid_key: String,
    pub restoring: bool,
    pub restore_source: Option<RestoreSource>,
    pub pass_count: u32,
    pub nesting_depth: u32,
    pub pending_windows: usize,
    pub capture_disabled: bool,
    pub locked: bool,
    pub remote: bool,
    pub paused: bool,
    pub dry_run: bool,
    pub configurations: usize,
    pub tracked_windows: usize,
    pub disk_snapshot_available: bool,
}

struct Runtime {
    source: Box<dyn EventSource>,
    dispatcher: JoinHandle<()>,
}

pub struct Engine {
    platform: Arc<dyn WindowSystem>,
    settings: Settings,
    clock: Arc<dyn Clock>,
    data: Mutex<DataState>,
    control: Mutex<ControlState>,
    capture_timer: RestartTimer,
    restore_timer: RestartTimer,
    finished_timer: RestartTimer,
    workers: WorkerPool,
    subscribers: Mutex<Vec<Sender<Notification>>>,
    runtime: Mutex<Option<Runtime>>,
}

type EngineSlot = Arc<OnceLock<Weak<Engine>>>;

/// Timer callbacks resolve the engine lazily so timers never keep it alive
fn timer_callback(slot: &EngineSlot, action: fn(&Arc<Engine>)) -> impl Fn() + Send + 'static {
    let slot = Arc::clone(slot);
    move || {
        if let Some(engine) = slot.get().and_then(Weak::upgrade) {
            action(&engine);
        }
    }
}

impl Engine {
    pub fn new(
        platform: Arc<dyn WindowSystem>,
        db: Box<dyn SnapshotDb>,
        settings: Settings,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        let slot: EngineSlot = Arc::new(OnceLock::new());

        let capture_timer = RestartTimer::new("capture", timer_callback(&slot, Engine::on_capture_timer))?;
        let restore_timer = RestartTimer::new("restore", timer_callback(&slot, Engine::on_restore_timer))?;
        let finished_timer = RestartTimer::new("restore-finished", timer_callback(&slot, |engine| engine.finish_restore()))?;
        let workers = WorkerPool::new(settings.worker_threads, WORKER_QUEUE_LEN)?;

        let valid_key = match platform.monitors() {
            Ok(monitors) => display_key(&monitors),
            Err(e) => {
                warn!(error = ?e, "Failed to enumerate monitors at startup");
                DisplayKey(String::new())
            }
        };

        let engine = Arc::new(Self {
            data: Mutex::new(DataState {
                store: SnapshotStore::new(settings.max_history_len),
                snapshots: HashMap::new(),
                db,
            }),
            control: Mutex::new(ControlState {
                pending_windows: HashSet::new(),
                capture_disabled: false,
                valid_key,
                phase: RestorePhase::Idle,
                session_end: HashMap::new(),
                locked: false,
                remote: false,
                paused: false,
            }),
            platform,
            settings,
            clock,
            capture_timer,
            restore_timer,
            finished_timer,
            workers,
            subscribers: Mutex::new(Vec::new()),
            runtime: Mutex::new(None),
        });
        let _ = slot.set(Arc::downgrade(&engine));
        Ok(engine)
    }

    /// Subscribe to engine notifications; dropped receivers are pruned on the next emit
    pub fn subscribe(&self) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn notify(&self, notification: Notification) {
        debug!(notification = ?notification, "Engine notification");
        self.subscribers.lock().retain(|tx| tx.send(notification.clone()).is_ok());
    }

    /// Begin the first capture epoch and start consuming `source`
    pub fn start(self: &Arc<Self>, mut source: Box<dyn EventSource>) -> Result<()> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            warn!("Engine already started");
            return Ok(());
        }

        let key = self.current_key();
        self.control.lock().valid_key = key.clone();
        info!(display = %key, "Starting capture");

        let engine = Arc::clone(self);
        self.workers.submit("initial-capture", move || {
            engine.batch_capture();
        });

        let (tx, rx) = mpsc::channel::<PlatformEvent>();
        let weak = Arc::downgrade(self);
        let dispatcher = thread::Builder::new()
            .name("event-dispatch".to_string())
            .spawn(move || {
                for event in rx {
                    let Some(engine) = weak.upgrade() else {
                        return;
                    };
                    engine.handle_event(event);
                }
                debug!("Event dispatcher exiting");
            })
            .context("Failed to spawn event dispatcher thread")?;

        source.start(tx).context("Failed to start event source")?;
        *runtime = Some(Runtime { source, dispatcher });
        Ok(())
    }

    /// Unregister every subscription and silence the timers
    pub fn stop(&self) {
        let runtime = self.runtime.lock().take();
        if let Some(mut runtime) = runtime {
            runtime.source.stop();
            if runtime.dispatcher.thread().id() != thread::current().id() {
                let _ = runtime.dispatcher.join();
            }
        }

        self.capture_timer.cancel();
        self.restore_timer.cancel();
        self.finished_timer.cancel();
        info!("Engine stopped");
    }

    pub fn handle_event(self: &Arc<Self>, event: PlatformEvent) {
        match event {
            PlatformEvent::Window(event) => self.handle_window_event(event),
            PlatformEvent::System(event) => self.handle_system_event(event),
        }
    }

    pub fn status(&self) -> EngineStatus {
        let display_key = self.current_key();
        let data = self.data.lock();
        let control = self.control.lock();
        let session = control.session();

        EngineStatus {
            valid_key: control.valid_key.to_string(),
            restoring: control.is_restoring(),
            restore_source: session.map(|s| s.source),
            pass_count: session.map_or(0, |s| s.pass_count),
            nesting_depth: session.map_or(0, |s| s.nesting_depth),
            pending_windows: control.pending_windows.len(),
            capture_disabled: control.capture_disabled,
            locked: control.locked,
            remote: control.remote,
            paused: control.paused,
            dry_run: self.settings.dry_run,
            configurations: data.store.configuration_count(),
            tracked_windows: data.store.window_count(&display_key),
            disk_snapshot_available: data.db.has_configuration(&display_key),
            display_key: display_key.0,
        }
    }

    /// Key of the live monitor layout; empty if monitors cannot be read
    fn current_key(&self) -> DisplayKey {
        match self.platform.monitors() {
            Ok(monitors) => display_key(&monitors),
            Err(e) => {
                warn!(error = ?e, "Failed to enumerate monitors");
                DisplayKey(String::new())
            }
        }
    }

    /// Top-level, visible, ownerless windows
    fn live_windows(&self) -> Vec<WindowInfo> {
        let handles = match self.platform.top_level_windows() {
            Ok(handles) => handles,
            Err(e) => {
                warn!(error = ?e, "Failed to enumerate top-level windows");
                return Vec::new();
            }
        };

        handles
            .into_iter()
            .filter_map(|handle| match self.platform.inspect(handle) {
                Ok(info) => info,
                Err(e) => {
                    debug!(window = %handle, error = ?e, "Failed to inspect window");
                    None
                }
            })
            .filter(WindowInfo::is_of_interest)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::display::Monitor;
    use crate::persistence::MemorySnapshotDb;
    use crate::testing::{FakeWindowSystem, ManualClock};
    use crate::types::Rect;

    pub const D1: Rect = Rect::new(0, 0, 1920, 1080);
    pub const D2: Rect = Rect::new(0, 0, 1280, 720);

    pub fn monitors(bounds: Rect) -> Vec<Monitor> {
        vec![Monitor::new(bounds, true)]
    }

    /// Timers long enough that they never fire during a test
    pub fn quiet_settings() -> Settings {
        Settings {
            capture_latency_ms: 60_000,
            restore_latency_ms: 60_000,
            default_restore_latency_ms: 60_000,
            max_restore_latency_ms: 60_000,
            worker_threads: 1,
            ..Settings::default()
        }
    }

    pub struct Fixture {
        pub engine: Arc<Engine>,
        pub fake: Arc<FakeWindowSystem>,
        pub clock: Arc<ManualClock>,
    }

    pub fn fixture_with(settings: Settings) -> Fixture {
        let fake = Arc::new(FakeWindowSystem::new(monitors(D1)));
        let clock = Arc::new(ManualClock::new(0));
        let engine = Engine::new(
            Arc::clone(&fake) as Arc<dyn WindowSystem>,
            Box::new(MemorySnapshotDb::default()),
            settings,
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .unwrap();
        Fixture { engine, fake, clock }
    }

    pub fn fixture() -> Fixture {
        fixture_with(quiet_settings())
    }

    /// Put the engine in a restore session without waiting for a timer
    pub fn force_restoring(engine: &Engine) {
        engine.control.lock().phase = RestorePhase::Restoring(RestoreSession::new(RestoreSource::Memory, None));
    }
}
