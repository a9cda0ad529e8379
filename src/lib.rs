pub mod capture;
mod client;
pub mod config;
pub mod device;
mod error;
pub mod playback;
pub mod session;

pub use speechlink_types as types;
pub use speechlink_utils as utils;

pub use capture::{CaptureInput, CaptureListener, VadSettings};
pub use client::{
    connect, connect_with_config, Client, Config, ConfigBuilder, SpeechTransport, TransportListener,
    TransportStats,
};
pub use error::{Error, Result};
pub use playback::PlaybackQueue;
pub use session::{SessionChannel, SessionHandle, SessionListener, SessionSettings, VoiceSession};
