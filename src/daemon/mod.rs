//! Long-running daemon: wires the X11 backend, disk database and control socket to the engine

mod ipc_handler;

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::clock::SystemClock;
use crate::config::Settings;
use crate::constants::timing::DISPLAY_WAIT_SECS;
use crate::display::display_key;
use crate::engine::Engine;
use crate::ipc::ControlServer;
use crate::persistence::JsonSnapshotDb;
use crate::platform::WindowSystem;
use crate::platform::x11::X11WindowSystem;
use crate::platform::x11_events::X11EventSource;

/// Block until the backend reports at least one monitor
fn wait_for_display(platform: &dyn WindowSystem) {
    loop {
        match platform.monitors() {
            Ok(monitors) if !display_key(&monitors).is_empty() => return,
            Ok(_) => info!(retry_secs = DISPLAY_WAIT_SECS, "No monitor reported yet, waiting"),
            Err(e) => warn!(error = ?e, retry_secs = DISPLAY_WAIT_SECS, "Failed to enumerate monitors, waiting"),
        }
        thread::sleep(Duration::from_secs(DISPLAY_WAIT_SECS));
    }
}

fn spawn_signal_listener(shutdown_tx: mpsc::Sender<()>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "Received termination signal");
                shutdown_tx.send(()).ok();
            }
        })
        .context("Failed to spawn signal listener thread")?;
    Ok(())
}

pub fn run_daemon(settings: Settings) -> Result<()> {
    if settings.dry_run {
        info!("Dry run: restores will be logged but not applied");
    }

    let platform = Arc::new(X11WindowSystem::connect()?);
    wait_for_display(platform.as_ref());

    let db_path = JsonSnapshotDb::default_path();
    let db = JsonSnapshotDb::open(&db_path)
        .context(format!("Failed to open snapshot database at {}", db_path.display()))?;

    let engine = Engine::new(platform, Box::new(db), settings, Arc::new(SystemClock))?;
    engine.start(Box::new(X11EventSource::new()))?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    spawn_signal_listener(shutdown_tx.clone())?;
    let server = ControlServer::bind()?;
    let socket_path = server.path().to_path_buf();
    // The listener blocks in accept() and dies with the process
    let _listener = ipc_handler::spawn_ipc_listener(server, Arc::clone(&engine), shutdown_tx)?;

    info!("Daemon running");
    shutdown_rx.recv().ok();

    info!("Shutting down");
    engine.stop();
    std::fs::remove_file(&socket_path).ok();
    Ok(())
}
