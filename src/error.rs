use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A microphone or speaker could not be opened or stopped working.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
    /// The outbound queue is at capacity; the frame was not sent.
    #[error("outbound queue full")]
    QueueFull,
    #[error("not connected")]
    NotConnected,
    /// The voice session task has exited and accepts no more commands.
    #[error("voice session has shut down")]
    SessionClosed,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    pub(crate) fn device(err: anyhow::Error) -> Self {
        Self::DeviceUnavailable(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
