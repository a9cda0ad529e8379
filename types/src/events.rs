pub mod client;
pub mod server;

pub use client::{ActionEvent, ClientAction, ClientEvent, PromptEvent};
pub use server::{AudioEndEvent, ServerEvent};

/// Value of `type` on the inbound frame that closes a spoken reply,
/// and of `action` on the outbound frame that closes an utterance.
pub const AUDIO_END: &str = "AUDIO_END";

/// Plain text frame asking the backend to abandon the current reply.
pub const STOP_TOKEN: &str = "__STOP__";
