//! Control socket message types

use serde::{Deserialize, Serialize};

use crate::engine::{EngineStatus, Notification};
use crate::types::SystemEvent;

/// Requests sent from the command line to the daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Health check
    Ping,

    /// Query engine state
    Status,

    /// Capture the live layout as snapshot `id` (0-3)
    TakeSnapshot(u8),

    /// Restore snapshot `id` (0-3, or 4 for the previous workspace)
    RestoreSnapshot(u8),

    CaptureToDisk,
    RestoreFromDisk,
    PauseAutoRestore,
    ResumeAutoRestore,

    /// Inject a display/power/session notification the event source cannot observe
    System(SystemEvent),

    /// Keep the connection open and stream engine notifications
    Watch,

    /// Request graceful shutdown
    Shutdown,
}

/// Responses sent from the daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    Pong,
    Status(EngineStatus),

    /// Request processed; carries the affected window count when there is one
    Ack(Option<usize>),

    /// Unsolicited notification on a watching connection
    Notification(Notification),

    Error(String),
}
