/// Traffic counters kept by the transport for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    turn_binary_chunks: u64,
    total_binary_chunks: u64,
    total_binary_bytes: u64,
    audio_chunks_sent: u64,
    audio_ends_received: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Counts an inbound binary frame and returns its position in the turn.
    pub(crate) fn record_binary(&mut self, bytes: usize) -> u64 {
        self.turn_binary_chunks += 1;
        self.total_binary_chunks += 1;
        self.total_binary_bytes += bytes as u64;
        self.turn_binary_chunks
    }

    /// Closes the current turn and returns how many binary frames it had.
    pub(crate) fn record_audio_end(&mut self) -> u64 {
        let turn = self.turn_binary_chunks;
        self.turn_binary_chunks = 0;
        self.audio_ends_received += 1;
        turn
    }

    pub(crate) fn record_sent_chunk(&mut self) {
        self.audio_chunks_sent += 1;
    }

    /// Binary frames received since the last `AUDIO_END`.
    pub fn turn_binary_chunks(&self) -> u64 {
        self.turn_binary_chunks
    }

    pub fn total_binary_chunks(&self) -> u64 {
        self.total_binary_chunks
    }

    pub fn total_binary_bytes(&self) -> u64 {
        self.total_binary_bytes
    }

    pub fn audio_chunks_sent(&self) -> u64 {
        self.audio_chunks_sent
    }

    pub fn audio_ends_received(&self) -> u64 {
        self.audio_ends_received
    }
}
