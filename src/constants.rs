//! Application-wide constants
//!
//! Default timings and limits for capture/restore, plus the string literals
//! used for file locations and platform quirks. Most timing values are only
//! defaults: `Settings` can override them.

/// Capture/restore timing defaults (milliseconds)
pub mod timing {
    /// Debounce window for location-change bursts before a batch capture
    pub const CAPTURE_LATENCY_MS: u64 = 3000;

    /// Delay before the next restore pass
    pub const RESTORE_LATENCY_MS: u64 = 500;

    /// Restore delay after resume/unlock, in case no display-changed event follows
    pub const DEFAULT_RESTORE_LATENCY_MS: u64 = 2000;

    /// Quiet period after the last restore pass before restore is considered finished
    pub const MAX_RESTORE_LATENCY_MS: u64 = 5000;

    /// Extra margin subtracted from a session end time to get the restore cut-off
    pub const SESSION_END_MARGIN_MS: i64 = 1000;

    /// Retry interval while no monitor is reported at startup
    pub const DISPLAY_WAIT_SECS: u64 = 5;

    /// How often a watch connection checks whether its client hung up
    pub const WATCH_HANGUP_POLL_MS: u64 = 250;
}

/// Restore pass limits
pub mod restore {
    /// Passes forced on a fixed timer regardless of notifications
    pub const MIN_RESTORE_PASSES: u32 = 2;

    /// Pass ceiling for a local console session
    pub const MAX_RESTORE_PASSES_LOCAL: u32 = 4;

    /// Pass ceiling for a remote session (remote rendering settles slower)
    pub const MAX_RESTORE_PASSES_REMOTE: u32 = 6;

    /// Restore passes allowed in flight before new requests are dropped
    pub const MAX_NESTING_DEPTH: u32 = 1;
}

/// Capture limits
pub mod capture {
    /// A debounced burst larger than this is treated as an OS-initiated reflow
    pub const MIN_OS_MOVE_WINDOWS: usize = 4;

    /// Per-window history length within one display configuration
    pub const MAX_HISTORY_LEN: usize = 20;

    /// Worker threads for capture and restore jobs
    pub const WORKER_THREADS: usize = 4;

    /// Jobs that may wait for a worker before new ones are rejected
    pub const WORKER_QUEUE_LEN: usize = 64;
}

/// Platform quirks
pub mod platform {
    /// WM_CLASS class of the panel treated as the taskbar (xfce4-panel).
    /// Other desktops override `taskbar_class`, e.g. "Plasmashell" or "Polybar".
    pub const TASKBAR_CLASS: &str = "Xfce4-panel";

    /// Snapped/maximized windows may report a top coordinate slightly above 0.
    /// Anything in `(SMALL_NEGATIVE_TOP, 0)` is normalized to 0.
    pub const SMALL_NEGATIVE_TOP: i32 = -15;

    /// Process names that hang when their placement is set
    pub const DEFAULT_SKIP_PROCESSES: &[&str] = &["CodeSetup"];

    /// Procfs path holding a process's short name
    pub const PROC_COMM_FORMAT: &str = "/proc/{}/comm";
}

/// X11 protocol values
pub mod x11 {
    /// `_NET_WM_STATE` client message actions
    pub const NET_WM_STATE_REMOVE: u32 = 0;
    pub const NET_WM_STATE_ADD: u32 = 1;

    /// Source indication for EWMH client messages (2 = pager/direct user action)
    pub const SOURCE_INDICATION_PAGER: u32 = 2;

    /// ICCCM `IconicState` for `WM_CHANGE_STATE`
    pub const ICONIC_STATE: u32 = 3;

    /// Size of PID property value in bytes
    pub const PID_PROPERTY_SIZE: usize = 4;

    /// Pointer button used for the taskbar drag
    pub const DRAG_BUTTON: u8 = 1;

    /// Pause between simulated pointer steps so the panel sees a real drag
    pub const DRAG_STEP_DELAY_MS: u64 = 250;

    /// Sleep between event-queue polls; bounds how long `stop()` waits
    pub const EVENT_POLL_INTERVAL_MS: u64 = 50;
}

/// Named snapshot ids
pub mod snapshot {
    /// Highest id a user can capture into
    pub const MAX_USER_SNAPSHOT: u8 = 3;

    /// Id holding the layout that was live before the last snapshot restore
    pub const PREVIOUS_WORKSPACE: u8 = 4;
}

/// File locations
pub mod paths {
    /// Directory name under the XDG config/data/runtime dirs
    pub const APP_DIR: &str = "persistent-windows";

    /// Settings file name
    pub const CONFIG_FILENAME: &str = "config.json";

    /// Disk snapshot database file name
    pub const SNAPSHOT_DB_FILENAME: &str = "snapshots.json";

    /// Control socket file name
    pub const SOCKET_FILENAME: &str = "control.sock";
}

/// Logging
pub mod logging {
    /// Environment variable overriding the configured log level
    pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
}
