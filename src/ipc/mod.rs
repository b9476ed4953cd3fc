//! Control socket between the command line and the running daemon
//!
//! Length-prefixed JSON frames over a Unix domain socket.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

mod messages;
pub use messages::{ControlRequest, ControlResponse};

use crate::constants::paths;

/// Upper bound on one frame's payload
const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// `$XDG_RUNTIME_DIR/persistent-windows`, or the cache dir when no runtime dir is set
fn socket_dir() -> Result<PathBuf> {
    let base = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) => PathBuf::from(runtime_dir),
        None => dirs::cache_dir().context("Neither XDG_RUNTIME_DIR nor a cache directory is available")?,
    };
    Ok(base.join(paths::APP_DIR))
}

pub fn default_socket_path() -> Result<PathBuf> {
    Ok(socket_dir()?.join(paths::SOCKET_FILENAME))
}

/// Connection to the daemon's control socket
pub struct ControlClient {
    stream: UnixStream,
}

impl ControlClient {
    pub fn connect() -> Result<Self> {
        Self::connect_to(&default_socket_path()?)
    }

    pub fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .with_context(|| format!("No daemon listening on {} (is it running?)", path.display()))?;
        Ok(Self { stream })
    }

    pub fn send_request(&mut self, req: &ControlRequest) -> Result<()> {
        write_message(&mut self.stream, req)
    }

    /// Blocks until the daemon answers or pushes a notification
    pub fn recv_response(&mut self) -> Result<ControlResponse> {
        read_message(&mut self.stream)
    }

    pub fn request(&mut self, req: ControlRequest) -> Result<ControlResponse> {
        self.send_request(&req)?;
        self.recv_response()
    }
}

/// Control socket owned by the daemon; the socket file is unlinked on drop
pub struct ControlServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl ControlServer {
    pub fn bind() -> Result<Self> {
        Self::bind_to(default_socket_path()?)
    }

    pub fn bind_to(socket_path: PathBuf) -> Result<Self> {
        if let Some(dir) = socket_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create socket directory {}", dir.display()))?;
        }

        // A previous daemon that died without cleanup leaves its socket behind
        if socket_path.exists() {
            fs::remove_file(&socket_path)
                .with_context(|| format!("Failed to remove leftover socket {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to listen on {}", socket_path.display()))?;
        fs::set_permissions(&socket_path, fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to restrict permissions on {}", socket_path.display()))?;

        Ok(Self { listener, socket_path })
    }

    /// Blocks until a client connects
    pub fn accept(&self) -> Result<UnixStream> {
        let (stream, _) = self.listener.accept().context("Failed to accept control connection")?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.socket_path);
    }
}

/// One frame: u32 little-endian payload length, then the JSON payload
pub(crate) fn write_message<W: Write, T: Serialize>(stream: &mut W, msg: &T) -> Result<()> {
    let payload = serde_json::to_vec(msg).context("Failed to encode control message")?;
    if payload.len() > MAX_MESSAGE_SIZE {
        bail!("Refusing to send {} byte message (limit {})", payload.len(), MAX_MESSAGE_SIZE);
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    stream.write_all(&frame).context("Failed to write control frame")?;
    stream.flush().context("Failed to flush control stream")
}

pub(crate) fn read_message<R: Read, T: DeserializeOwned>(stream: &mut R) -> Result<T> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).context("Failed to read control frame header")?;
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_MESSAGE_SIZE {
        bail!("Control message too large: {} bytes (limit {})", len, MAX_MESSAGE_SIZE);
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).context("Failed to read control frame payload")?;
    serde_json::from_slice(&payload).context("Failed to decode control message")
}
