pub mod session;
pub mod audio;
pub mod events;
mod content;

pub use audio::{AudioChunk, QueueItem};
pub use content::message::AssistantMessage;
pub use events::{ClientEvent, ServerEvent};
pub use session::{ConnectionState, UtteranceEndReason, VoiceSessionState};
