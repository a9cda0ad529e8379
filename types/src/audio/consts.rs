/// Sample rate of microphone audio sent to the backend.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized audio received from the backend.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// One PCM16 mono frame is a single little-endian `i16`.
pub const BYTES_PER_FRAME: usize = 2;

/// Size of each buffer read from the microphone.
pub const CAPTURE_CHUNK_BYTES: usize = 2048;

/// Length of `bytes` bytes of PCM16 mono audio at `sample_rate`.
pub fn duration_of(bytes: usize, sample_rate: u32) -> std::time::Duration {
    let frames = (bytes / BYTES_PER_FRAME) as u64;
    std::time::Duration::from_micros(frames * 1_000_000 / u64::from(sample_rate))
}
