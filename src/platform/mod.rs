//! Platform boundary: window inspection/mutation and the notification source
//!
//! The engine only talks to the desktop through these traits. The X11 backend
//! lives in [`x11`] and [`x11_events`]; tests use a scripted fake.

pub mod x11;
pub mod x11_events;

use anyhow::Result;
use std::sync::mpsc::Sender;

use crate::display::Monitor;
use crate::types::{Placement, Rect, SystemEvent, WindowEventKind, WindowHandle};

/// Live facts about one window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    /// Owner/transient-for window, if any
    pub parent: Option<WindowHandle>,
    pub visible: bool,
    pub class_name: String,
    pub title: String,
    pub process_id: u32,
    pub process_name: String,
    pub screen_position: Rect,
    pub placement: Placement,
}

impl WindowInfo {
    /// Top-level, visible, ownerless
    pub fn is_of_interest(&self) -> bool {
        self.parent.is_none() && self.visible
    }
}

/// Window inspection and mutation
pub trait WindowSystem: Send + Sync {
    /// Live monitor enumeration
    fn monitors(&self) -> Result<Vec<Monitor>>;

    /// All top-level windows, in stacking or creation order
    fn top_level_windows(&self) -> Result<Vec<WindowHandle>>;

    /// `Ok(None)` when the handle no longer names a valid window
    fn inspect(&self, handle: WindowHandle) -> Result<Option<WindowInfo>>;

    /// Apply normal position and show-state
    fn set_placement(&self, handle: WindowHandle, placement: &Placement) -> Result<()>;

    /// Move/resize to an exact screen rectangle
    fn move_window(&self, handle: WindowHandle, rect: Rect) -> Result<()>;

    /// Move the taskbar by simulating a user drag to `(x, y)`
    fn drag_taskbar_to(&self, handle: WindowHandle, x: i32, y: i32) -> Result<()>;
}

/// A window-level notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEvent {
    pub kind: WindowEventKind,
    pub handle: WindowHandle,
}

/// Anything the event source can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    Window(WindowEvent),
    System(SystemEvent),
}

/// Source of raw notifications.
///
/// `start` registers every subscription and begins delivering on `sender`;
/// `stop` removes all of them before returning.
pub trait EventSource: Send {
    fn start(&mut self, sender: Sender<PlatformEvent>) -> Result<()>;
    fn stop(&mut self);
}
