use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::types::{SessionSwitch, SystemEvent};

/// Remembers window positions per monitor layout and puts them back when the layout returns.
#[derive(Parser, Debug)]
#[command(name = "persistent-windows", version, about)]
pub struct Args {
    /// Settings file path override
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log restore actions without moving any window
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the daemon (default)
    Run,
    /// Capture the live layout as snapshot 0-3
    Snapshot { id: u8 },
    /// Restore snapshot 0-3; without an id, undo the last snapshot restore
    Restore { id: Option<u8> },
    /// Write the live layout to disk
    CaptureToDisk,
    /// Restore the layout saved to disk
    RestoreFromDisk,
    /// Stop automatic restore after display changes
    Pause,
    /// Re-enable automatic restore
    Resume,
    /// Print daemon state as JSON
    Status,
    /// Stream engine notifications
    Watch,
    /// Forward a notification the event source cannot observe
    Notify { event: NotifyEvent },
    /// Ask the daemon to exit
    Stop,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    DisplayChanging,
    DisplayChanged,
    Suspend,
    Resume,
    Lock,
    Unlock,
    RemoteConnect,
    RemoteDisconnect,
    ConsoleConnect,
    ConsoleDisconnect,
}

impl From<NotifyEvent> for SystemEvent {
    fn from(event: NotifyEvent) -> Self {
        match event {
            NotifyEvent::DisplayChanging => SystemEvent::DisplaySettingsChanging,
            NotifyEvent::DisplayChanged => SystemEvent::DisplaySettingsChanged,
            NotifyEvent::Suspend => SystemEvent::PowerSuspend,
            NotifyEvent::Resume => SystemEvent::PowerResume,
            NotifyEvent::Lock => SystemEvent::Session(SessionSwitch::Lock),
            NotifyEvent::Unlock => SystemEvent::Session(SessionSwitch::Unlock),
            NotifyEvent::RemoteConnect => SystemEvent::Session(SessionSwitch::RemoteConnect),
            NotifyEvent::RemoteDisconnect => SystemEvent::Session(SessionSwitch::RemoteDisconnect),
            NotifyEvent::ConsoleConnect => SystemEvent::Session(SessionSwitch::ConsoleConnect),
            NotifyEvent::ConsoleDisconnect => SystemEvent::Session(SessionSwitch::ConsoleDisconnect),
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_none() {
        let args = Args::try_parse_from(["persistent-windows", "--dry-run"]).unwrap();
        assert!(args.dry_run);
        assert_eq!(args.command, None);
    }

    #[test]
    fn test_restore_id_is_optional() {
        let args = Args::try_parse_from(["persistent-windows", "restore"]).unwrap();
        assert_eq!(args.command, Some(Command::Restore { id: None }));
        let args = Args::try_parse_from(["persistent-windows", "restore", "2"]).unwrap();
        assert_eq!(args.command, Some(Command::Restore { id: Some(2) }));
    }

    #[test]
    fn test_notify_event_maps_to_system_event() {
        let args = Args::try_parse_from(["persistent-windows", "notify", "lock"]).unwrap();
        let Some(Command::Notify { event }) = args.command else {
            panic!("expected notify command");
        };
        assert_eq!(SystemEvent::from(event), SystemEvent::Session(SessionSwitch::Lock));
    }

    #[test]
    fn test_config_flag_is_global() {
        let args = Args::try_parse_from(["persistent-windows", "status", "--config", "/tmp/pw.json"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/pw.json")));
    }

    #[test]
    fn test_dry_run_after_run_subcommand() {
        let args = Args::try_parse_from(["persistent-windows", "run", "--dry-run"]).unwrap();
        assert!(args.dry_run);
        assert_eq!(args.command, Some(Command::Run));
    }
}
