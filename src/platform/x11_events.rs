//! X11 notification source
//!
//! Runs on its own connection and thread. Translates RandR screen changes,
//! EWMH root properties and per-client structure/property events into
//! [`PlatformEvent`]s.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::randr::{self, ConnectionExt as RandrExt};
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use super::x11::{CachedAtoms, root_windows, wm_state};
use super::{EventSource, PlatformEvent, WindowEvent};
use crate::constants::x11::EVENT_POLL_INTERVAL_MS;
use crate::types::{SystemEvent, WindowEventKind, WindowHandle};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ClientFlags {
    minimized: bool,
    maximized: bool,
}

impl ClientFlags {
    fn from_states(states: &[Atom], atoms: &CachedAtoms) -> Self {
        Self {
            minimized: states.contains(&atoms.net_wm_state_hidden),
            maximized: states.contains(&atoms.net_wm_state_maximized_vert)
                && states.contains(&atoms.net_wm_state_maximized_horz),
        }
    }
}

/// Window event implied by a `_NET_WM_STATE` change
fn state_change(before: ClientFlags, after: ClientFlags) -> Option<WindowEventKind> {
    match (before.minimized, after.minimized) {
        (false, true) => Some(WindowEventKind::MinimizeStart),
        (true, false) => Some(WindowEventKind::MinimizeEnd),
        _ if before.maximized != after.maximized => Some(WindowEventKind::MoveSizeEnd),
        _ => None,
    }
}

/// Clients that appeared in and disappeared from `_NET_CLIENT_LIST`
fn diff_clients(known: &HashSet<Window>, current: &[Window]) -> (Vec<Window>, Vec<Window>) {
    let current_set: HashSet<Window> = current.iter().copied().collect();
    let added = current.iter().copied().filter(|w| !known.contains(w)).collect();
    let mut removed: Vec<Window> = known.difference(&current_set).copied().collect();
    removed.sort_unstable();
    (added, removed)
}

fn window_event(kind: WindowEventKind, window: Window) -> PlatformEvent {
    PlatformEvent::Window(WindowEvent {
        kind,
        handle: WindowHandle(window.into()),
    })
}

/// Connection-side state of the event thread
struct Watcher {
    conn: RustConnection,
    root: Window,
    atoms: CachedAtoms,
    clients: HashMap<Window, ClientFlags>,
}

impl Watcher {
    fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)
            .context("Failed to connect to X11 server for event monitoring")?;
        let root = conn.setup().roots[screen_num].root;
        let atoms = CachedAtoms::new(&conn).context("Failed to cache X11 atoms for event monitoring")?;

        conn.randr_query_version(1, 5)
            .context("Failed to query RandR version")?
            .reply()
            .context("RandR extension not available")?;
        conn.randr_select_input(root, randr::NotifyMask::SCREEN_CHANGE)
            .context("Failed to select RandR screen change events")?;
        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
        )
        .context("Failed to set event mask on root window")?;
        conn.flush().context("Failed to flush X11 connection after subscribing")?;

        debug!(screen = screen_num, root, "Event source connected");
        Ok(Self {
            conn,
            root,
            atoms,
            clients: HashMap::new(),
        })
    }

    /// Re-read `_NET_CLIENT_LIST`, subscribing to new clients
    fn refresh_clients(&mut self, out: &mut Vec<PlatformEvent>) -> Result<()> {
        let current = root_windows(&self.conn, self.root, self.atoms.net_client_list)?;
        let known: HashSet<Window> = self.clients.keys().copied().collect();
        let (added, removed) = diff_clients(&known, &current);

        for window in removed {
            self.clients.remove(&window);
            trace!(window, "Client removed");
        }
        for window in added {
            let subscribed = self.conn.change_window_attributes(
                window,
                &ChangeWindowAttributesAux::new()
                    .event_mask(EventMask::STRUCTURE_NOTIFY | EventMask::PROPERTY_CHANGE),
            );
            if let Err(e) = subscribed {
                debug!(window, error = %e, "Failed to subscribe to client, skipping");
                continue;
            }
            let flags = wm_state(&self.conn, window, &self.atoms)
                .map(|states| ClientFlags::from_states(&states, &self.atoms))
                .unwrap_or_default();
            self.clients.insert(window, flags);
            trace!(window, "Client added");
            out.push(window_event(WindowEventKind::Foreground, window));
        }
        self.conn.flush().context("Failed to flush X11 connection after client refresh")?;
        Ok(())
    }

    fn translate(&mut self, event: Event, out: &mut Vec<PlatformEvent>) -> Result<()> {
        match event {
            Event::RandrScreenChangeNotify(e) => {
                info!(width = e.width, height = e.height, "Screen configuration changed");
                out.push(PlatformEvent::System(SystemEvent::DisplaySettingsChanging));
                out.push(PlatformEvent::System(SystemEvent::DisplaySettingsChanged));
            }
            Event::ConfigureNotify(e) if self.clients.contains_key(&e.window) => {
                out.push(window_event(WindowEventKind::LocationChange, e.window));
            }
            Event::PropertyNotify(e) if e.window == self.root => {
                if e.atom == self.atoms.net_client_list {
                    self.refresh_clients(out)?;
                } else if e.atom == self.atoms.net_active_window {
                    let active = root_windows(&self.conn, self.root, self.atoms.net_active_window)?;
                    if let Some(&window) = active.first().filter(|w| **w != x11rb::NONE) {
                        out.push(window_event(WindowEventKind::Foreground, window));
                    }
                }
            }
            Event::PropertyNotify(e) if e.atom == self.atoms.net_wm_state => {
                let Some(before) = self.clients.get(&e.window).copied() else {
                    return Ok(());
                };
                let after = ClientFlags::from_states(&wm_state(&self.conn, e.window, &self.atoms)?, &self.atoms);
                self.clients.insert(e.window, after);
                if let Some(kind) = state_change(before, after) {
                    out.push(window_event(kind, e.window));
                }
            }
            Event::Error(e) => {
                // Usually a client vanished between notification and query
                trace!(error = ?e, "X11 error event");
            }
            _ => {}
        }
        Ok(())
    }

    fn run(mut self, sender: Sender<PlatformEvent>, stop: Arc<AtomicBool>) -> Result<()> {
        let mut pending = Vec::new();
        self.refresh_clients(&mut pending)?;
        // Clients present at startup are captured by the initial batch
        pending.clear();

        while !stop.load(Ordering::Relaxed) {
            let Some(event) = self.conn.poll_for_event().context("Failed to poll for X11 event")? else {
                thread::sleep(Duration::from_millis(EVENT_POLL_INTERVAL_MS));
                continue;
            };
            if let Err(e) = self.translate(event, &mut pending) {
                // A client can disappear mid-query; keep listening
                debug!(error = %e, "Failed to translate X11 event");
            }
            for event in pending.drain(..) {
                if sender.send(event).is_err() {
                    debug!("Event receiver dropped, stopping event source");
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// X11 [`EventSource`]
#[derive(Default)]
pub struct X11EventSource {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl X11EventSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSource for X11EventSource {
    fn start(&mut self, sender: Sender<PlatformEvent>) -> Result<()> {
        if self.thread.is_some() {
            warn!("Event source already started");
            return Ok(());
        }
        // Subscribe on the calling thread so failures reach the caller
        let watcher = Watcher::connect()?;
        self.stop.store(false, Ordering::Relaxed);
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name("x11-events".to_string())
            .spawn(move || {
                if let Err(e) = watcher.run(sender, stop) {
                    error!(error = %e, "X11 event source failed");
                }
            })
            .context("Failed to spawn X11 event thread")?;
        self.thread = Some(handle);
        info!("X11 event source started");
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("X11 event thread panicked");
            }
            // The connection closes with the thread, dropping every subscription
            info!("X11 event source stopped");
        }
    }
}

impl Drop for X11EventSource {
    fn drop(&mut self) {
        self.stop();
    }
}
