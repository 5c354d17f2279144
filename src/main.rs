use color_eyre::{eyre::eyre, Result};
use deckinput::platform::linux::LinuxPlatform;
use deckinput::controller::diagnostic::forward_diagnostics;
use deckinput::{ControllerConfig, ControllerHandle, FieldChange, ListenerError};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let mut list_only = false;
    let mut config_path = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--list" => list_only = true,
            other => config_path = Some(PathBuf::from(other)),
        }
    }

    if list_only {
        return list_devices();
    }

    let config_path = config_path.unwrap_or_else(ControllerConfig::default_path);
    let config = ControllerConfig::load_or_default(&config_path)?;
    info!("Starting with config from {}", config_path.display());

    let (handle, task) = ControllerHandle::spawn(config, Box::new(LinuxPlatform::new()))
        .map_err(|e| eyre!("Failed to spawn input loop: {}", e))?;

    handle.add_listener(|change: &FieldChange| -> Result<(), ListenerError> {
        info!("Event: {}", change);
        Ok(())
    })?;

    let diagnostics = handle.diagnostics();
    let diagnostics_task = tokio::spawn(forward_diagnostics(diagnostics, |diagnostic| {
        warn!("Diagnostic: {}", diagnostic)
    }));

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Program terminated by user"),
            Err(e) => error!("Unable to listen for Ctrl-C: {}", e),
        }
        cancel.cancel();
    });

    let report = task
        .await
        .map_err(|e| eyre!("Input loop task failed: {}", e))??;
    diagnostics_task.abort();

    info!(
        "Stopped: {} ticks, {} messages, {} changes dispatched, {} malformed reports, {} callback failures",
        report.ticks,
        report.messages,
        report.dispatched,
        report.malformed_reports,
        report.callback_failures
    );
    if !report.degraded_sources.is_empty() {
        warn!("Ran without: {}", report.degraded_sources.join(", "));
    }
    if !report.disconnected_sources.is_empty() {
        warn!("Lost during run: {}", report.disconnected_sources.join(", "));
    }
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = deckinput::list_available_devices()?;
    println!("Available input devices:");
    for device in devices {
        println!("  {}", device);
        if device.has_translated_keys {
            println!("    provides power/volume keys");
        }
    }
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
