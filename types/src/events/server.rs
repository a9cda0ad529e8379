use serde::de::Error as _;
use serde_json::Value;

use super::AUDIO_END;

/// `{"type": "AUDIO_END", "chunks"?: n}`
///
/// `chunks`, when the backend sends it, is the number of binary frames
/// that made up the reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AudioEndEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunks: Option<u64>,
}

impl AudioEndEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunks(mut self, chunks: u64) -> Self {
        self.chunks = Some(chunks);
        self
    }

    pub fn chunks(&self) -> Option<u64> {
        self.chunks
    }
}

/// A JSON text frame received from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// All synthesized audio for the current reply has been sent.
    AudioEnd(AudioEndEvent),
    /// Anything else, passed through untouched.
    Message(Value),
}

impl ServerEvent {
    /// Parses a text frame. Frames must be JSON objects.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let json: Value = serde_json::from_str(text)?;
        if !json.is_object() {
            return Err(serde_json::Error::custom("expected a JSON object"));
        }
        if json.get("type").and_then(Value::as_str) == Some(AUDIO_END) {
            let event = serde_json::from_value::<AudioEndEvent>(json)?;
            return Ok(Self::AudioEnd(event));
        }
        Ok(Self::Message(json))
    }
}
