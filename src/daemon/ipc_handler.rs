//! Control socket request handling

use anyhow::{Context, Result};
use std::io::Read;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::constants::timing::WATCH_HANGUP_POLL_MS;
use crate::engine::Engine;
use crate::ipc::{ControlRequest, ControlResponse, ControlServer, read_message, write_message};

/// Spawn the listener thread; each connection gets its own handler thread
pub fn spawn_ipc_listener(
    server: ControlServer,
    engine: Arc<Engine>,
    shutdown_tx: mpsc::Sender<()>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ipc-listener".to_string())
        .spawn(move || {
            if let Err(e) = run_ipc_loop(&server, &engine, &shutdown_tx) {
                error!(error = ?e, "IPC listener thread crashed");
            }
        })
        .context("Failed to spawn IPC listener thread")
}

fn run_ipc_loop(server: &ControlServer, engine: &Arc<Engine>, shutdown_tx: &mpsc::Sender<()>) -> Result<()> {
    info!(socket = ?server.path(), "IPC listener started");

    loop {
        let stream = server.accept()?;
        let engine = Arc::clone(engine);
        let shutdown_tx = shutdown_tx.clone();
        let spawned = thread::Builder::new()
            .name("ipc-client".to_string())
            .spawn(move || {
                if let Err(e) = handle_client(stream, &engine, &shutdown_tx) {
                    debug!(error = ?e, "IPC connection closed or error");
                }
            });
        if let Err(e) = spawned {
            warn!(error = ?e, "Failed to spawn IPC client thread, dropping connection");
        }
    }
}

fn handle_client(mut stream: UnixStream, engine: &Arc<Engine>, shutdown_tx: &mpsc::Sender<()>) -> Result<()> {
    debug!("Control client connected");
    loop {
        let request: ControlRequest = read_message(&mut stream)?;
        match request {
            ControlRequest::Watch => return watch(stream, engine),
            ControlRequest::Shutdown => {
                info!("Received shutdown request via IPC");
                write_message(&mut stream, &ControlResponse::Ack(None))?;
                shutdown_tx.send(()).ok();
                return Ok(());
            }
            request => {
                let response = dispatch(engine, request);
                write_message(&mut stream, &response)?;
            }
        }
    }
}

/// Forward engine notifications until the client goes away
fn watch(mut stream: UnixStream, engine: &Arc<Engine>) -> Result<()> {
    let notifications = engine.subscribe();
    write_message(&mut stream, &ControlResponse::Ack(None))?;
    let hung_up = spawn_hangup_monitor(&stream)?;
    info!("Control client watching notifications");

    let poll = Duration::from_millis(WATCH_HANGUP_POLL_MS);
    let result = loop {
        if hung_up.load(Ordering::Acquire) {
            debug!("Watching client hung up");
            break Ok(());
        }
        match notifications.recv_timeout(poll) {
            Ok(notification) => {
                if let Err(e) = write_message(&mut stream, &ControlResponse::Notification(notification)) {
                    break Err(e);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break Ok(()),
        }
    };

    // Wakes the monitor if it is still blocked in read
    let _ = stream.shutdown(Shutdown::Both);
    result
}

/// Watchers send nothing after `Watch`, so any read completing means the peer closed
fn spawn_hangup_monitor(stream: &UnixStream) -> Result<Arc<AtomicBool>> {
    let mut reader = stream.try_clone().context("Failed to clone watch stream")?;
    let hung_up = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&hung_up);
    thread::Builder::new()
        .name("ipc-watch-hangup".to_string())
        .spawn(move || {
            let mut buf = [0u8; 64];
            while let Ok(n) = reader.read(&mut buf) {
                if n == 0 {
                    break;
                }
            }
            flag.store(true, Ordering::Release);
        })
        .context("Failed to spawn watch hangup monitor")?;
    Ok(hung_up)
}

/// Run one request against the engine
pub fn dispatch(engine: &Arc<Engine>, request: ControlRequest) -> ControlResponse {
    let result = match request {
        ControlRequest::Ping => return ControlResponse::Pong,
        ControlRequest::Status => return ControlResponse::Status(engine.status()),
        ControlRequest::TakeSnapshot(id) => engine.take_snapshot(id).map(Some),
        ControlRequest::RestoreSnapshot(id) => engine.restore_snapshot(id).map(Some),
        ControlRequest::CaptureToDisk => engine.capture_to_disk().map(Some),
        ControlRequest::RestoreFromDisk => engine.restore_from_disk().map(Some),
        ControlRequest::PauseAutoRestore => {
            engine.pause_auto_restore();
            Ok(None)
        }
        ControlRequest::ResumeAutoRestore => {
            engine.resume_auto_restore();
            Ok(None)
        }
        ControlRequest::System(event) => {
            engine.handle_system_event(event);
            Ok(None)
        }
        ControlRequest::Watch | ControlRequest::Shutdown => {
            return ControlResponse::Error("Request must be sent on its own connection".to_string());
        }
    };

    match result {
        Ok(count) => ControlResponse::Ack(count),
        Err(e) => {
            warn!(request = ?request, error = %e, "Control request failed");
            ControlResponse::Error(format!("{:#}", e))
        }
    }
}
