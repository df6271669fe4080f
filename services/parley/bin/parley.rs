//! Main Entrypoint for the Parley voice client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the YAML file and the environment.
//! 2. Initializing logging.
//! 3. Opening the audio devices and the transcript log.
//! 4. Running the realtime session until Ctrl+C or a fatal error.

use anyhow::Context;
use clap::Parser;
use openai_realtime::{SessionController, WsConnector};
use parley_native_utils::{CpalInput, CpalOutput, list_devices};
use parley_service::{config::Config, logging, transcript::FileTranscriptSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Hands-free voice conversations over the OpenAI Realtime API")]
struct Cli {
    /// YAML configuration file. Environment variables override it.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Also write debug-level logs to this file.
    #[arg(long)]
    debug_log: Option<PathBuf>,

    /// Print the available audio devices and exit.
    #[arg(long)]
    list_devices: bool,
}

/// Listens for the `Ctrl+C` signal. Returns false if the handler could not
/// be installed.
async fn shutdown_signal() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal. Shutting down gracefully...");
            true
        }
        Err(e) => {
            error!(error = %e, "Failed to install Ctrl+C handler");
            false
        }
    }
}

fn print_devices() -> anyhow::Result<()> {
    for device in list_devices().context("Failed to enumerate audio devices")? {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{:<8} {}{}", device.direction.to_string(), device.name, marker);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.list_devices {
        return print_devices();
    }

    // --- 1. Load Configuration ---
    let config = Config::load(&cli.config).context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    let _log_guard = logging::init(config.log_level, cli.debug_log.as_deref())?;
    info!(
        model = %config.realtime.model,
        voice = %config.realtime.voice,
        wake_words = ?config.realtime.wake_words.words(),
        termination_words = ?config.realtime.termination_words.words(),
        conversation_log = %config.conversation_log.display(),
        "Configuration loaded."
    );

    // --- 3. Build the Session ---
    let transcripts = Arc::new(FileTranscriptSink::new(config.conversation_log));
    let connector = WsConnector::new(config.realtime.url(), config.api_key);
    let (controller, handle) = SessionController::new(
        config.realtime,
        connector,
        CpalInput::new(config.input_device),
        CpalOutput::new(config.output_device),
        transcripts,
    )
    .context("Failed to open audio devices")?;

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if shutdown_signal().await {
            signal_handle.shutdown();
        }
    });

    // --- 4. Run ---
    controller.run().await.context("Session ended with a fatal error")?;
    info!("Session has shut down.");
    Ok(())
}
