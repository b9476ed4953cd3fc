//! Core value types shared by the capture and restore engines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Screen rectangle in desktop coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self { left, top, width, height }
    }

    pub fn center(&self) -> (i32, i32) {
        (self.left + self.width / 2, self.top + self.height / 2)
    }

    pub fn is_horizontal(&self) -> bool {
        self.width > self.height
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) {}x{}", self.left, self.top, self.width, self.height)
    }
}

/// How a window is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShowState {
    #[default]
    Normal,
    Minimized,
    Maximized,
}

/// Normal (pre-snap, pre-maximize) rectangle plus show-state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Placement {
    pub normal_position: Rect,
    pub show_state: ShowState,
}

impl Placement {
    pub const fn new(normal_position: Rect, show_state: ShowState) -> Self {
        Self { normal_position, show_state }
    }
}

/// Platform window handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowHandle(pub u64);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// History key for a window: handle plus owning process name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowIdentity {
    pub handle: WindowHandle,
    pub process_name: String,
}

impl WindowIdentity {
    pub fn new(handle: WindowHandle, process_name: impl Into<String>) -> Self {
        Self {
            handle,
            process_name: process_name.into(),
        }
    }
}

impl fmt::Display for WindowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.handle, self.process_name)
    }
}

/// Identity of the current monitor layout
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DisplayKey(pub String);

impl DisplayKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DisplayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything recorded about a window at one moment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedMetrics {
    pub identity: WindowIdentity,
    pub process_id: u32,
    pub class_name: String,
    pub title: String,
    pub is_taskbar: bool,
    pub screen_position: Rect,
    pub placement: Placement,
    pub capture_time: DateTime<Utc>,
    /// Placement changed independently of the screen rectangle (snap/unsnap)
    #[serde(default)]
    pub needs_placement_update: bool,
}

impl CapturedMetrics {
    /// Same normal position and show-state
    pub fn equal_placement(&self, other: &CapturedMetrics) -> bool {
        self.placement == other.placement
    }
}

/// Window-level notification kinds delivered by the event source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowEventKind {
    /// Window created or brought to the foreground
    Foreground,
    MoveSizeEnd,
    MinimizeStart,
    MinimizeEnd,
    LocationChange,
}

/// What caused a window observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTrigger {
    /// Enumeration by the engine itself (batch capture or restore pass)
    Batch,
    Event(WindowEventKind),
}

impl CaptureTrigger {
    pub fn is_foreground(&self) -> bool {
        matches!(self, CaptureTrigger::Event(WindowEventKind::Foreground))
    }
}

/// Session switch reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionSwitch {
    Lock,
    Unlock,
    RemoteConnect,
    RemoteDisconnect,
    ConsoleConnect,
    ConsoleDisconnect,
}

/// Display, power and session notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemEvent {
    DisplaySettingsChanging,
    DisplaySettingsChanged,
    PowerSuspend,
    PowerResume,
    Session(SessionSwitch),
}
