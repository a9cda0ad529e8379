use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use speechlink::config::AppConfig;
use speechlink::device::{CpalInput, CpalOutput};
use speechlink::types::{AssistantMessage, AudioChunk, VoiceSessionState};
use speechlink::{
    CaptureInput, PlaybackQueue, SessionChannel, SessionListener, VadSettings, VoiceSession,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;

/// Talk to the assistant by voice or text.
///
/// Type a prompt and press enter, or use /voice, /stop, /confirm, /cancel, /quit.
#[derive(Parser)]
struct Cli {
    /// Backend endpoint, overrides SPEECHLINK_WS_URL
    #[arg(long)]
    url: Option<String>,
    /// Microphone name, overrides SPEECHLINK_INPUT_DEVICE
    #[arg(long)]
    input_device: Option<String>,
    /// Speaker name, overrides SPEECHLINK_OUTPUT_DEVICE
    #[arg(long)]
    output_device: Option<String>,
    /// Start in voice mode
    #[arg(long)]
    voice: bool,
}

#[derive(Default)]
struct Console {
    // Statement waiting for /confirm
    pending_sql: Mutex<Option<String>>,
}

impl SessionListener for Console {
    fn on_message(&self, json: serde_json::Value) {
        let message = match AssistantMessage::from_value(&json) {
            Ok(message) => message,
            Err(_) => {
                println!("AI: {}", json);
                return;
            }
        };
        if let Some(status) = message.status() {
            println!("[{}]", status);
            return;
        }
        println!("AI: {}", message.display_message());
        if message.requires_confirmation() {
            if let Some(sql) = message.sql_to_execute() {
                println!("    {} (type /confirm or /cancel)", sql);
                if let Ok(mut pending) = self.pending_sql.lock() {
                    *pending = Some(sql.to_string());
                }
            }
        }
    }

    fn on_audio_chunk(&self, _chunk: AudioChunk) {}

    fn on_audio_end(&self) {
        tracing::debug!("reply audio complete");
    }

    fn on_error(&self, message: String) {
        eprintln!("error: {}", message);
    }

    fn on_connection_status(&self, connected: bool) {
        println!("[{}]", if connected { "connected" } else { "disconnected" });
    }

    fn on_state_change(&self, state: VoiceSessionState) {
        println!("[{}]", state);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = AppConfig::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Cli::parse();
    if args.url.is_some() {
        config.ws_url = args.url;
    }
    if args.input_device.is_some() {
        config.input_device = args.input_device;
    }
    if args.output_device.is_some() {
        config.output_device = args.output_device;
    }

    let channel = SessionChannel::new();
    let client = speechlink::connect_with_config(config.client_config(), channel.transport_listener())
        .await
        .context("Failed to connect to the assistant")?;

    let console = Arc::new(Console::default());
    let capture = CaptureInput::new(
        Arc::new(CpalInput::new(config.input_device.clone())),
        VadSettings::default(),
    );
    let playback = PlaybackQueue::new(Arc::new(CpalOutput::new(config.output_device.clone())));
    let (session, task) = VoiceSession::spawn(
        channel,
        Arc::new(client),
        capture,
        playback,
        console.clone(),
        config.session_settings(),
    );
    if args.voice {
        session.toggle_voice_mode()?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        match line.trim() {
            "" => {}
            "/voice" => session.toggle_voice_mode()?,
            "/stop" => session.stop()?,
            "/confirm" => {
                let sql = console.pending_sql.lock().ok().and_then(|mut sql| sql.take());
                session.confirm(sql.as_deref())?;
            }
            "/cancel" => {
                if let Ok(mut sql) = console.pending_sql.lock() {
                    sql.take();
                }
                session.cancel()?;
            }
            "/quit" => break,
            prompt => session.send_prompt(prompt)?,
        }
    }

    println!("Shutting down...");
    session.shutdown()?;
    task.await?;
    Ok(())
}
