//! Shared fixtures for unit tests

use anyhow::{Result, bail};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::clock::Clock;
use crate::display::Monitor;
use crate::platform::{WindowInfo, WindowSystem};
use crate::types::{CapturedMetrics, Placement, Rect, ShowState, WindowHandle, WindowIdentity};

const BASE_TIMESTAMP: i64 = 1_700_000_000;

/// Fixed test time, `secs` after an arbitrary epoch
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(BASE_TIMESTAMP + secs, 0).unwrap()
}

pub fn metrics_at(rect: Rect, secs: i64) -> CapturedMetrics {
    CapturedMetrics {
        identity: WindowIdentity::new(WindowHandle(1), "app"),
        process_id: 100,
        class_name: "AppClass".to_string(),
        title: "App".to_string(),
        is_taskbar: false,
        screen_position: rect,
        placement: Placement::new(rect, ShowState::Normal),
        capture_time: at(secs),
        needs_placement_update: false,
    }
}

pub fn window_info(handle: u64, process: &str, rect: Rect) -> WindowInfo {
    WindowInfo {
        handle: WindowHandle(handle),
        parent: None,
        visible: true,
        class_name: "AppClass".to_string(),
        title: "App".to_string(),
        process_id: 100,
        process_name: process.to_string(),
        screen_position: rect,
        placement: Placement::new(rect, ShowState::Normal),
    }
}

pub fn taskbar_info(handle: u64, rect: Rect) -> WindowInfo {
    WindowInfo {
        class_name: crate::constants::platform::TASKBAR_CLASS.to_string(),
        title: String::new(),
        process_name: "panel".to_string(),
        ..window_info(handle, "panel", rect)
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(secs: i64) -> Self {
        Self { now: Mutex::new(at(secs)) }
    }

    pub fn set(&self, secs: i64) {
        *self.now.lock() = at(secs);
    }

    pub fn advance(&self, secs: i64) {
        *self.now.lock() += Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Mutation recorded by [`FakeWindowSystem`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetPlacement(WindowHandle, Placement),
    Move(WindowHandle, Rect),
    DragTaskbar(WindowHandle, i32, i32),
}

#[derive(Default)]
struct FakeState {
    monitors: Vec<Monitor>,
    windows: BTreeMap<WindowHandle, WindowInfo>,
    calls: Vec<Call>,
    fail_mutations: bool,
}

/// Scripted desktop: mutations are recorded and applied to the fake windows
#[derive(Default)]
pub struct FakeWindowSystem {
    state: Mutex<FakeState>,
}

impl FakeWindowSystem {
    pub fn new(monitors: Vec<Monitor>) -> Self {
        let fake = Self::default();
        fake.set_monitors(monitors);
        fake
    }

    pub fn set_monitors(&self, monitors: Vec<Monitor>) {
        self.state.lock().monitors = monitors;
    }

    pub fn add_window(&self, info: WindowInfo) {
        self.state.lock().windows.insert(info.handle, info);
    }

    pub fn remove_window(&self, handle: WindowHandle) {
        self.state.lock().windows.remove(&handle);
    }

    /// Simulate the OS moving a window
    pub fn set_rect(&self, handle: WindowHandle, rect: Rect) {
        if let Some(info) = self.state.lock().windows.get_mut(&handle) {
            info.screen_position = rect;
            info.placement.normal_position = rect;
        }
    }

    pub fn window(&self, handle: WindowHandle) -> Option<WindowInfo> {
        self.state.lock().windows.get(&handle).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.state.lock().fail_mutations = fail;
    }
}

impl WindowSystem for FakeWindowSystem {
    fn monitors(&self) -> Result<Vec<Monitor>> {
        Ok(self.state.lock().monitors.clone())
    }

    fn top_level_windows(&self) -> Result<Vec<WindowHandle>> {
        Ok(self.state.lock().windows.keys().copied().collect())
    }

    fn inspect(&self, handle: WindowHandle) -> Result<Option<WindowInfo>> {
        Ok(self.state.lock().windows.get(&handle).cloned())
    }

    fn set_placement(&self, handle: WindowHandle, placement: &Placement) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::SetPlacement(handle, *placement));
        if state.fail_mutations {
            bail!("BadWindow");
        }
        if let Some(info) = state.windows.get_mut(&handle) {
            info.placement = *placement;
            if placement.show_state == ShowState::Normal {
                info.screen_position = placement.normal_position;
            }
        }
        Ok(())
    }

    fn move_window(&self, handle: WindowHandle, rect: Rect) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Move(handle, rect));
        if state.fail_mutations {
            bail!("BadWindow");
        }
        if let Some(info) = state.windows.get_mut(&handle) {
            info.screen_position = rect;
            if info.placement.show_state == ShowState::Normal {
                info.placement.normal_position = rect;
            }
        }
        Ok(())
    }

    fn drag_taskbar_to(&self, handle: WindowHandle, x: i32, y: i32) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::DragTaskbar(handle, x, y));
        if state.fail_mutations {
            bail!("BadWindow");
        }
        if let Some(info) = state.windows.get_mut(&handle) {
            let rect = info.screen_position;
            let moved = Rect::new(x - rect.width / 2, y - rect.height / 2, rect.width, rect.height);
            info.screen_position = moved;
            info.placement.normal_position = moved;
        }
        Ok(())
    }
}
