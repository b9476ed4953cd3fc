#![forbid(unsafe_code)]

mod cli;
mod clock;
mod config;
mod constants;
mod daemon;
mod detector;
mod dispatch;
mod display;
mod engine;
mod history;
mod ipc;
mod persistence;
mod platform;
mod store;
mod timer;
mod types;

#[cfg(test)]
mod testing;

use anyhow::{Result, bail};
use tracing::{Level as TraceLevel, info};
use tracing_subscriber::FmtSubscriber;

use cli::Command;
use config::Settings;
use constants::logging::LOG_LEVEL_ENV;
use constants::snapshot::PREVIOUS_WORKSPACE;
use ipc::{ControlClient, ControlRequest, ControlResponse};

fn parse_level(level: &str) -> TraceLevel {
    match level.to_lowercase().as_str() {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    }
}

fn init_logging(settings: &Settings) -> Result<()> {
    // Environment wins over the settings file
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| settings.log_level.clone());
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&level))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Send one request and print the daemon's answer
fn send(request: ControlRequest) -> Result<()> {
    let mut client = ControlClient::connect()?;
    match client.request(request)? {
        ControlResponse::Pong => println!("pong"),
        ControlResponse::Status(status) => println!("{}", serde_json::to_string_pretty(&status)?),
        ControlResponse::Ack(Some(windows)) => println!("ok ({} windows)", windows),
        ControlResponse::Ack(None) => println!("ok"),
        ControlResponse::Notification(n) => println!("{}", serde_json::to_string(&n)?),
        ControlResponse::Error(msg) => bail!("{}", msg),
    }
    Ok(())
}

fn watch() -> Result<()> {
    let mut client = ControlClient::connect()?;
    client.send_request(&ControlRequest::Watch)?;
    loop {
        match client.recv_response()? {
            ControlResponse::Notification(n) => println!("{}", serde_json::to_string(&n)?),
            ControlResponse::Error(msg) => bail!("{}", msg),
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    let args = cli::parse();
    let config_path = args.config.clone().unwrap_or_else(Settings::default_path);
    let mut settings = Settings::read_from(&config_path)?;
    settings.dry_run |= args.dry_run;
    init_logging(&settings)?;
    settings.validate_and_clamp();

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            if Settings::write_defaults_if_missing(&config_path)? {
                info!(path = %config_path.display(), "Settings file not found, wrote defaults");
            } else {
                info!(path = %config_path.display(), "Loaded settings");
            }
            daemon::run_daemon(settings)
        }
        Command::Snapshot { id } => send(ControlRequest::TakeSnapshot(id)),
        Command::Restore { id } => send(ControlRequest::RestoreSnapshot(id.unwrap_or(PREVIOUS_WORKSPACE))),
        Command::CaptureToDisk => send(ControlRequest::CaptureToDisk),
        Command::RestoreFromDisk => send(ControlRequest::RestoreFromDisk),
        Command::Pause => send(ControlRequest::PauseAutoRestore),
        Command::Resume => send(ControlRequest::ResumeAutoRestore),
        Command::Status => send(ControlRequest::Status),
        Command::Watch => watch(),
        Command::Notify { event } => send(ControlRequest::System(event.into())),
        Command::Stop => send(ControlRequest::Shutdown),
    }
}
