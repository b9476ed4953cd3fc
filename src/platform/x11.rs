//! X11/EWMH window system backend

use anyhow::{Context, Result, bail};
use std::fs;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};
use x11rb::connection::Connection;
use x11rb::protocol::randr::ConnectionExt as RandrExt;
use x11rb::protocol::xproto::*;
use x11rb::protocol::xtest::ConnectionExt as XTestExt;
use x11rb::rust_connection::RustConnection;

use super::{WindowInfo, WindowSystem};
use crate::constants::{platform, x11};
use crate::display::Monitor;
use crate::types::{Placement, Rect, ShowState, WindowHandle};

/// Pre-cached X11 atoms to avoid repeated roundtrips
pub struct CachedAtoms {
    pub net_wm_name: Atom,
    pub utf8_string: Atom,
    pub net_wm_pid: Atom,
    pub net_wm_state: Atom,
    pub net_wm_state_hidden: Atom,
    pub net_wm_state_maximized_vert: Atom,
    pub net_wm_state_maximized_horz: Atom,
    pub net_active_window: Atom,
    pub net_client_list: Atom,
    pub wm_change_state: Atom,
    pub net_frame_extents: Atom,
}

fn intern(conn: &RustConnection, name: &str) -> Result<Atom> {
    Ok(conn
        .intern_atom(false, name.as_bytes())
        .with_context(|| format!("Failed to intern {} atom", name))?
        .reply()
        .with_context(|| format!("Failed to get reply for {} atom", name))?
        .atom)
}

impl CachedAtoms {
    pub fn new(conn: &RustConnection) -> Result<Self> {
        // Do all intern_atom roundtrips once at startup
        Ok(Self {
            net_wm_name: intern(conn, "_NET_WM_NAME")?,
            utf8_string: intern(conn, "UTF8_STRING")?,
            net_wm_pid: intern(conn, "_NET_WM_PID")?,
            net_wm_state: intern(conn, "_NET_WM_STATE")?,
            net_wm_state_hidden: intern(conn, "_NET_WM_STATE_HIDDEN")?,
            net_wm_state_maximized_vert: intern(conn, "_NET_WM_STATE_MAXIMIZED_VERT")?,
            net_wm_state_maximized_horz: intern(conn, "_NET_WM_STATE_MAXIMIZED_HORZ")?,
            net_active_window: intern(conn, "_NET_ACTIVE_WINDOW")?,
            net_client_list: intern(conn, "_NET_CLIENT_LIST")?,
            wm_change_state: intern(conn, "WM_CHANGE_STATE")?,
            net_frame_extents: intern(conn, "_NET_FRAME_EXTENTS")?,
        })
    }
}

pub(crate) fn xid(handle: WindowHandle) -> Result<Window> {
    Window::try_from(handle.0).with_context(|| format!("Handle {} is not an X11 window id", handle))
}

/// Root property holding a window list (`_NET_CLIENT_LIST`, `_NET_ACTIVE_WINDOW`)
pub(crate) fn root_windows(conn: &RustConnection, root: Window, atom: Atom) -> Result<Vec<Window>> {
    let reply = conn
        .get_property(false, root, atom, AtomEnum::WINDOW, 0, u32::MAX)
        .context("Failed to query root window list property")?
        .reply()
        .context("Failed to get reply for root window list property")?;
    Ok(reply.value32().map(Iterator::collect).unwrap_or_default())
}

/// EWMH state atoms currently set on `window`
pub(crate) fn wm_state(conn: &RustConnection, window: Window, atoms: &CachedAtoms) -> Result<Vec<Atom>> {
    let reply = conn
        .get_property(false, window, atoms.net_wm_state, AtomEnum::ATOM, 0, 1024)
        .context(format!("Failed to query _NET_WM_STATE for window {}", window))?
        .reply()
        .context(format!("Failed to get _NET_WM_STATE reply for window {}", window))?;
    Ok(reply.value32().map(Iterator::collect).unwrap_or_default())
}

pub(crate) fn show_state(states: &[Atom], atoms: &CachedAtoms) -> ShowState {
    if states.contains(&atoms.net_wm_state_hidden) {
        ShowState::Minimized
    } else if states.contains(&atoms.net_wm_state_maximized_vert) && states.contains(&atoms.net_wm_state_maximized_horz) {
        ShowState::Maximized
    } else {
        ShowState::Normal
    }
}

/// Left and top decoration sizes from `_NET_FRAME_EXTENTS`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FrameExtents {
    left: i32,
    top: i32,
}

impl FrameExtents {
    /// `[left, right, top, bottom]`; anything shorter means no frame
    fn from_values(values: &[u32]) -> Self {
        match values {
            [left, _right, top, _bottom, ..] => Self {
                left: *left as i32,
                top: *top as i32,
            },
            _ => Self::default(),
        }
    }

    /// Rectangle a move request should carry for a client at `client`.
    ///
    /// The window manager places the frame's outer corner at a configure
    /// request's x/y, so the origin moves out by the decoration while the
    /// size stays the client's.
    fn frame_origin(&self, client: Rect) -> Rect {
        Rect::new(client.left - self.left, client.top - self.top, client.width, client.height)
    }
}

/// Class part of `WM_CLASS` ("instance\0class\0")
fn parse_wm_class(value: &[u8]) -> String {
    value
        .split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .nth(1)
        .map(|class| String::from_utf8_lossy(class).into_owned())
        .unwrap_or_default()
}

fn process_name(pid: u32) -> String {
    if pid == 0 {
        return String::new();
    }
    fs::read_to_string(platform::PROC_COMM_FORMAT.replace("{}", &pid.to_string()))
        .map(|comm| comm.trim_end().to_string())
        .unwrap_or_default()
}

pub struct X11WindowSystem {
    conn: RustConnection,
    root: Window,
    atoms: CachedAtoms,
}

impl X11WindowSystem {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)
            .context("Failed to connect to X11 server. Is DISPLAY set correctly?")?;
        let root = conn.setup().roots[screen_num].root;
        let atoms = CachedAtoms::new(&conn).context("Failed to cache X11 atoms at startup")?;
        debug!(screen = screen_num, root, "Connected window system backend");
        Ok(Self { conn, root, atoms })
    }

    fn title(&self, window: Window) -> Result<String> {
        let net_name = self
            .conn
            .get_property(false, window, self.atoms.net_wm_name, self.atoms.utf8_string, 0, 1024)
            .context(format!("Failed to query _NET_WM_NAME for window {}", window))?
            .reply()
            .context(format!("Failed to get _NET_WM_NAME reply for window {}", window))?;
        if !net_name.value.is_empty() {
            return Ok(String::from_utf8_lossy(&net_name.value).into_owned());
        }

        let name = self
            .conn
            .get_property(false, window, AtomEnum::WM_NAME, AtomEnum::STRING, 0, 1024)
            .context(format!("Failed to query WM_NAME for window {}", window))?
            .reply()
            .context(format!("Failed to get WM_NAME reply for window {}", window))?;
        Ok(String::from_utf8_lossy(&name.value).into_owned())
    }

    fn class_name(&self, window: Window) -> Result<String> {
        let reply = self
            .conn
            .get_property(false, window, AtomEnum::WM_CLASS, AtomEnum::STRING, 0, 1024)
            .context(format!("Failed to query WM_CLASS for window {}", window))?
            .reply()
            .context(format!("Failed to get WM_CLASS reply for window {}", window))?;
        Ok(parse_wm_class(&reply.value))
    }

    fn pid(&self, window: Window) -> Result<u32> {
        let reply = self
            .conn
            .get_property(false, window, self.atoms.net_wm_pid, AtomEnum::CARDINAL, 0, 1)
            .context(format!("Failed to query _NET_WM_PID for window {}", window))?
            .reply()
            .context(format!("Failed to get _NET_WM_PID reply for window {}", window))?;
        if reply.value.len() < x11::PID_PROPERTY_SIZE {
            return Ok(0);
        }
        Ok(u32::from_ne_bytes(
            reply.value[0..x11::PID_PROPERTY_SIZE]
                .try_into()
                .context("Invalid PID property format (expected 4 bytes)")?,
        ))
    }

    fn transient_for(&self, window: Window) -> Result<Option<WindowHandle>> {
        let reply = self
            .conn
            .get_property(false, window, AtomEnum::WM_TRANSIENT_FOR, AtomEnum::WINDOW, 0, 1)
            .context(format!("Failed to query WM_TRANSIENT_FOR for window {}", window))?
            .reply()
            .context(format!("Failed to get WM_TRANSIENT_FOR reply for window {}", window))?;
        Ok(reply
            .value32()
            .and_then(|mut owners| owners.next())
            .filter(|owner| *owner != x11rb::NONE)
            .map(|owner| WindowHandle(owner.into())))
    }

    fn frame_extents(&self, window: Window) -> Result<FrameExtents> {
        let reply = self
            .conn
            .get_property(false, window, self.atoms.net_frame_extents, AtomEnum::CARDINAL, 0, 4)
            .context(format!("Failed to query _NET_FRAME_EXTENTS for window {}", window))?
            .reply()
            .context(format!("Failed to get _NET_FRAME_EXTENTS reply for window {}", window))?;
        let values: Vec<u32> = reply.value32().map(Iterator::collect).unwrap_or_default();
        Ok(FrameExtents::from_values(&values))
    }

    /// Frame origin plus client size, the same reference `configure_window` moves by
    fn screen_rect(&self, window: Window) -> Result<Rect> {
        let client = self.client_rect(window)?;
        Ok(self.frame_extents(window)?.frame_origin(client))
    }

    /// Absolute on-screen rectangle of the client area
    fn client_rect(&self, window: Window) -> Result<Rect> {
        let geometry = self
            .conn
            .get_geometry(window)
            .context(format!("Failed to query geometry for window {}", window))?
            .reply()
            .context(format!("Failed to get geometry reply for window {}", window))?;
        let origin = self
            .conn
            .translate_coordinates(window, self.root, 0, 0)
            .context(format!("Failed to translate coordinates for window {}", window))?
            .reply()
            .context(format!("Failed to get translated coordinates for window {}", window))?;
        Ok(Rect::new(
            origin.dst_x.into(),
            origin.dst_y.into(),
            geometry.width.into(),
            geometry.height.into(),
        ))
    }

    fn send_wm_state(&self, window: Window, action: u32, first: Atom, second: Atom) -> Result<()> {
        let event = ClientMessageEvent {
            response_type: CLIENT_MESSAGE_EVENT,
            format: 32,
            sequence: 0,
            window,
            type_: self.atoms.net_wm_state,
            data: ClientMessageData::from([action, first, second, x11::SOURCE_INDICATION_PAGER, 0]),
        };
        self.conn
            .send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_NOTIFY | EventMask::SUBSTRUCTURE_REDIRECT,
                event,
            )
            .context(format!("Failed to send _NET_WM_STATE event for window {}", window))?;
        Ok(())
    }

    fn set_maximized(&self, window: Window, maximized: bool) -> Result<()> {
        let action = if maximized { x11::NET_WM_STATE_ADD } else { x11::NET_WM_STATE_REMOVE };
        self.send_wm_state(
            window,
            action,
            self.atoms.net_wm_state_maximized_vert,
            self.atoms.net_wm_state_maximized_horz,
        )
    }

    /// Iconify via ICCCM `WM_CHANGE_STATE`
    fn iconify(&self, window: Window) -> Result<()> {
        let event = ClientMessageEvent {
            response_type: CLIENT_MESSAGE_EVENT,
            format: 32,
            sequence: 0,
            window,
            type_: self.atoms.wm_change_state,
            data: ClientMessageData::from([x11::ICONIC_STATE, 0, 0, 0, 0]),
        };
        self.conn
            .send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_NOTIFY | EventMask::SUBSTRUCTURE_REDIRECT,
                event,
            )
            .context(format!("Failed to send WM_CHANGE_STATE event for window {}", window))?;
        Ok(())
    }

    /// `rect` uses the reference of [`Self::screen_rect`]: frame origin, client size
    fn configure(&self, window: Window, rect: Rect) -> Result<()> {
        if rect.width <= 0 || rect.height <= 0 {
            bail!("Refusing to configure window {} to empty rectangle {}", window, rect);
        }
        self.conn
            .configure_window(
                window,
                &ConfigureWindowAux::new()
                    .x(rect.left)
                    .y(rect.top)
                    .width(rect.width as u32)
                    .height(rect.height as u32),
            )
            .context(format!("Failed to configure window {}", window))?;
        Ok(())
    }

    fn fake_input(&self, kind: u8, detail: u8, x: i32, y: i32) -> Result<()> {
        let x = i16::try_from(x).context("Pointer x out of range")?;
        let y = i16::try_from(y).context("Pointer y out of range")?;
        self.conn
            .xtest_fake_input(kind, detail, x11rb::CURRENT_TIME, self.root, x, y, 0)
            .context("Failed to send XTEST input")?;
        self.conn.flush().context("Failed to flush X11 connection after XTEST input")?;
        Ok(())
    }
}

impl WindowSystem for X11WindowSystem {
    fn monitors(&self) -> Result<Vec<Monitor>> {
        let reply = self
            .conn
            .randr_get_monitors(self.root, true)
            .context("Failed to query RandR monitors. Is RandR 1.5 available?")?
            .reply()
            .context("Failed to get reply for RandR monitors query")?;
        Ok(reply
            .monitors
            .iter()
            .map(|m| Monitor::new(Rect::new(m.x.into(), m.y.into(), m.width.into(), m.height.into()), m.primary))
            .collect())
    }

    fn top_level_windows(&self) -> Result<Vec<WindowHandle>> {
        Ok(root_windows(&self.conn, self.root, self.atoms.net_client_list)?
            .into_iter()
            .map(|w| WindowHandle(w.into()))
            .collect())
    }

    fn inspect(&self, handle: WindowHandle) -> Result<Option<WindowInfo>> {
        let window = xid(handle)?;
        let Ok(attributes) = self.conn.get_window_attributes(window)?.reply() else {
            // BadWindow: the handle is gone
            return Ok(None);
        };

        let screen_position = self.screen_rect(window)?;
        let show_state = show_state(&wm_state(&self.conn, window, &self.atoms)?, &self.atoms);
        let process_id = self.pid(window)?;

        let info = WindowInfo {
            handle,
            parent: self.transient_for(window)?,
            visible: attributes.map_state == MapState::VIEWABLE,
            class_name: self.class_name(window)?,
            title: self.title(window)?,
            process_id,
            process_name: process_name(process_id),
            screen_position,
            // X11 keeps no restore geometry; the current frame stands in for it
            placement: Placement::new(screen_position, show_state),
        };
        trace!(window = %handle, class = %info.class_name, rect = %info.screen_position, "Inspected window");
        Ok(Some(info))
    }

    fn set_placement(&self, handle: WindowHandle, placement: &Placement) -> Result<()> {
        let window = xid(handle)?;
        match placement.show_state {
            ShowState::Normal => {
                self.set_maximized(window, false)?;
                self.configure(window, placement.normal_position)?;
            }
            ShowState::Maximized => {
                self.configure(window, placement.normal_position)?;
                self.set_maximized(window, true)?;
            }
            ShowState::Minimized => {
                self.configure(window, placement.normal_position)?;
                self.iconify(window)?;
            }
        }
        self.conn.flush().context("Failed to flush X11 connection after placement")?;
        Ok(())
    }

    fn move_window(&self, handle: WindowHandle, rect: Rect) -> Result<()> {
        self.configure(xid(handle)?, rect)?;
        self.conn.flush().context("Failed to flush X11 connection after move")?;
        Ok(())
    }

    fn drag_taskbar_to(&self, handle: WindowHandle, x: i32, y: i32) -> Result<()> {
        let rect = self.screen_rect(xid(handle)?)?;
        // Grab an edge of the panel rather than a launcher in its middle
        let (grab_x, grab_y) = if rect.is_horizontal() {
            (rect.left + 1, rect.top + rect.height / 2)
        } else {
            (rect.left + rect.width / 2, rect.top + 1)
        };
        let step = Duration::from_millis(x11::DRAG_STEP_DELAY_MS);

        self.fake_input(MOTION_NOTIFY_EVENT, 0, grab_x, grab_y)?;
        thread::sleep(step);
        self.fake_input(BUTTON_PRESS_EVENT, x11::DRAG_BUTTON, grab_x, grab_y)?;
        thread::sleep(step);
        self.fake_input(MOTION_NOTIFY_EVENT, 0, x, y)?;
        thread::sleep(step);
        self.fake_input(BUTTON_RELEASE_EVENT, x11::DRAG_BUTTON, x, y)?;
        debug!(window = %handle, from_x = grab_x, from_y = grab_y, x, y, "Simulated taskbar drag");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wm_class_takes_class_part() {
        assert_eq!(parse_wm_class(b"navigator\0Firefox\0"), "Firefox");
        assert_eq!(parse_wm_class(b"xterm\0XTerm"), "XTerm");
        assert_eq!(parse_wm_class(b"only-instance\0"), "");
        assert_eq!(parse_wm_class(b""), "");
    }

    #[test]
    fn test_process_name_of_unknown_pid_is_empty() {
        assert_eq!(process_name(0), "");
    }

    #[test]
    fn test_process_name_of_self() {
        let name = process_name(std::process::id());
        assert!(!name.is_empty());
        assert!(!name.ends_with('\n'));
    }

    #[test]
    fn test_frame_extents_shift_origin_only() {
        let extents = FrameExtents::from_values(&[2, 2, 24, 2]);
        assert_eq!(extents, FrameExtents { left: 2, top: 24 });

        // Client area at (102,124) inside a frame whose corner sits at (100,100)
        let client = Rect::new(102, 124, 800, 600);
        assert_eq!(extents.frame_origin(client), Rect::new(100, 100, 800, 600));
    }

    #[test]
    fn test_missing_frame_extents_leave_rect_unchanged() {
        let client = Rect::new(100, 124, 800, 600);
        assert_eq!(FrameExtents::from_values(&[]).frame_origin(client), client);
        assert_eq!(FrameExtents::from_values(&[3, 3]).frame_origin(client), client);
        assert_eq!(FrameExtents::from_values(&[0, 0, 0, 0]).frame_origin(client), client);
    }

    #[test]
    fn test_xid_rejects_wide_handles() {
        assert_eq!(xid(WindowHandle(0x0400_0001)).unwrap(), 0x0400_0001);
        assert!(xid(WindowHandle(u64::MAX)).is_err());
    }
}
