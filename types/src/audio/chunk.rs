use std::fmt;
use std::sync::Arc;

use super::consts::BYTES_PER_FRAME;

/// An immutable buffer of PCM16 little-endian mono samples.
///
/// Cloning is cheap: the bytes are shared, never copied.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioChunk(Arc<[u8]>);

impl AudioChunk {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of whole frames in the chunk.
    pub fn frame_count(&self) -> usize {
        self.0.len() / BYTES_PER_FRAME
    }

    /// The chunk truncated to a whole number of frames.
    ///
    /// A trailing odd byte cannot be written to a 16-bit device.
    pub fn aligned(&self) -> &[u8] {
        &self.0[..self.frame_count() * BYTES_PER_FRAME]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<Vec<u8>> for AudioChunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<&[u8]> for AudioChunk {
    fn from(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }
}

impl AsRef<[u8]> for AudioChunk {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AudioChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudioChunk({} bytes)", self.0.len())
    }
}

/// An entry in the playback queue.
///
/// End of stream is its own variant, so an empty chunk is just an empty chunk.
/// It carries the id of the `finish` that queued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    Audio(AudioChunk),
    EndOfStream(u64),
}
