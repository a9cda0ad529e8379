use crate::client::stats::Stats;
use crate::error::{Error, Result};
use crate::types::events::{ClientAction, ServerEvent, STOP_TOKEN};
use crate::types::{AudioChunk, ClientEvent, ConnectionState};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;

pub mod config;
mod consts;
mod stats;
mod utils;

pub use config::{Config, ConfigBuilder};
pub use stats::Stats as TransportStats;

/// Receives everything the backend sends.
///
/// Called from the transport's read task in arrival order. Implementations
/// must hand work off rather than block.
pub trait TransportListener: Send + Sync {
    fn on_message(&self, json: serde_json::Value);
    fn on_audio(&self, chunk: AudioChunk);
    fn on_audio_end(&self);
    fn on_error(&self, message: String);
    fn on_connection_change(&self, state: ConnectionState);
}

/// The outbound half of the speech link.
///
/// Every method only enqueues a frame; socket writes happen on the
/// transport's own task.
#[cfg_attr(test, mockall::automock)]
pub trait SpeechTransport: Send + Sync {
    fn send_audio_chunk(&self, chunk: AudioChunk) -> Result<()>;
    fn send_audio_end(&self) -> Result<()>;
    fn send_prompt(&self, text: &str, user_id: i64) -> Result<()>;
    fn send_action(&self, action: ClientAction, sql: Option<String>) -> Result<()>;
    /// Asks the backend to abandon the reply being generated, if any.
    fn stop(&self) -> Result<()>;
    fn is_generating(&self) -> bool;
    fn set_generating(&self, generating: bool);
}

enum Outbound {
    Binary(AudioChunk),
    Text(String),
    Close,
}

// One persistent websocket carrying PCM in binary frames and control
// messages in JSON text frames, in both directions.
pub struct Client {
    o_tx: tokio::sync::mpsc::Sender<Outbound>,
    stats: Arc<Mutex<Stats>>,
    generating: AtomicBool,
}

impl Client {
    async fn connect(config: Config, listener: Arc<dyn TransportListener>) -> Result<Self> {
        let request = utils::build_request(&config)?;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(request).await {
            Ok(connected) => connected,
            Err(e) => {
                tracing::error!("failed to connect to {}: {}", config.base_url(), e);
                listener.on_error(format!("WebSocket Error: {}", e));
                listener.on_connection_change(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };
        tracing::info!("connected to {}", config.base_url());
        listener.on_connection_change(ConnectionState::Connected);

        let (mut write, mut read) = ws_stream.split();
        let (o_tx, mut o_rx) = tokio::sync::mpsc::channel::<Outbound>(config.capacity());
        let stats = Arc::new(Mutex::new(Stats::new()));

        let send_listener = listener.clone();
        tokio::spawn(async move {
            while let Some(frame) = o_rx.recv().await {
                let (message, closing) = match frame {
                    Outbound::Binary(chunk) => (Message::Binary(chunk.to_vec()), false),
                    Outbound::Text(text) => (Message::Text(text), false),
                    Outbound::Close => (Message::Close(None), true),
                };
                if let Err(e) = write.send(message).await {
                    // A failed write means the socket is gone; the read task reports the disconnect.
                    tracing::error!("failed to send message: {}", e);
                    send_listener.on_error(format!("Transmission error: {}", e));
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let read_stats = stats.clone();
        tokio::spawn(async move {
            // The next frame is pulled only once the current one has been
            // dispatched, so listeners see frames strictly in socket order.
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        listener.on_error(format!("Connection Lost: {}", e));
                        break;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => match ServerEvent::parse(&text) {
                        Ok(ServerEvent::AudioEnd(event)) => {
                            let total = read_stats
                                .lock()
                                .map(|mut stats| stats.record_audio_end())
                                .unwrap_or_default();
                            tracing::info!("AUDIO_END received after {} binary chunks", total);
                            if total == 0 {
                                tracing::warn!("AUDIO_END received without any audio in this turn");
                            }
                            if let Some(expected) = event.chunks() {
                                if expected != total {
                                    tracing::warn!(
                                        "AUDIO_END announced {} chunks but {} arrived",
                                        expected,
                                        total
                                    );
                                }
                            }
                            listener.on_audio_end();
                        }
                        Ok(ServerEvent::Message(json)) => {
                            tracing::debug!(
                                "received message: {}",
                                json.get("type").and_then(|t| t.as_str()).unwrap_or("untyped")
                            );
                            listener.on_message(json);
                        }
                        Err(e) => {
                            tracing::error!("failed to parse frame: {}, text=> {:?}", e, text);
                            listener.on_error(format!("Malformed frame: {}", e));
                        }
                    },
                    Message::Binary(bin) => {
                        if bin.is_empty() {
                            tracing::warn!("ignoring empty binary frame");
                            continue;
                        }
                        let size = bin.len();
                        let count = read_stats
                            .lock()
                            .map(|mut stats| stats.record_binary(size))
                            .unwrap_or_default();
                        if count <= 3 || count % 20 == 0 {
                            tracing::debug!("binary chunk #{} ({} bytes)", count, size);
                        }
                        listener.on_audio(AudioChunk::from(bin));
                    }
                    Message::Close(reason) => {
                        tracing::info!("connection closed: {:?}", reason);
                        break;
                    }
                    _ => {}
                }
            }
            listener.on_connection_change(ConnectionState::Disconnected);
        });

        Ok(Self {
            o_tx,
            stats,
            generating: AtomicBool::new(false),
        })
    }

    // Return a copy of the traffic counters.
    pub fn stats(&self) -> Stats {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Sends a websocket Close frame. Later sends fail with [`Error::NotConnected`].
    pub fn close(&self) -> Result<()> {
        self.enqueue(Outbound::Close)
    }

    fn enqueue(&self, frame: Outbound) -> Result<()> {
        self.o_tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull,
            TrySendError::Closed(_) => Error::NotConnected,
        })
    }

    fn send_client_event(&self, event: &ClientEvent) -> Result<()> {
        let text = serde_json::to_string(event)?;
        self.enqueue(Outbound::Text(text))
    }
}

impl SpeechTransport for Client {
    fn send_audio_chunk(&self, chunk: AudioChunk) -> Result<()> {
        if chunk.is_empty() {
            tracing::warn!("empty audio chunk, not sent");
            return Ok(());
        }
        self.enqueue(Outbound::Binary(chunk))?;
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_sent_chunk();
        }
        Ok(())
    }

    fn send_audio_end(&self) -> Result<()> {
        tracing::info!("sending end of audio");
        self.send_client_event(&ClientEvent::audio_end())
    }

    fn send_prompt(&self, text: &str, user_id: i64) -> Result<()> {
        self.send_client_event(&ClientEvent::prompt(text, user_id))?;
        self.generating.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send_action(&self, action: ClientAction, sql: Option<String>) -> Result<()> {
        self.send_client_event(&ClientEvent::action(action, sql.as_deref()))
    }

    fn stop(&self) -> Result<()> {
        if self.generating.swap(false, Ordering::SeqCst) {
            tracing::info!("sending stop token");
            self.enqueue(Outbound::Text(STOP_TOKEN.to_string()))?;
        }
        Ok(())
    }

    fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    fn set_generating(&self, generating: bool) {
        self.generating.store(generating, Ordering::SeqCst);
    }
}

// Public function to connect with a specific config.
pub async fn connect_with_config(
    config: Config,
    listener: Arc<dyn TransportListener>,
) -> Result<Client> {
    Client::connect(config, listener).await
}

// Public function to connect with default settings.
pub async fn connect(listener: Arc<dyn TransportListener>) -> Result<Client> {
    connect_with_config(Config::new(), listener).await
}
