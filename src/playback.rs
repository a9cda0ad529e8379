use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::device::{AudioSink, OutputDevice};
use crate::error::Error;
use crate::types::{AudioChunk, QueueItem};

/// Chunks enqueued per turn that always get a depth log line.
const DEPTH_LOG_FIRST: u64 = 5;
const DEPTH_LOG_INTERVAL: u64 = 20;

type DrainedCallback = Arc<dyn Fn(u64) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(Error) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    drained: Mutex<Option<DrainedCallback>>,
    error: Mutex<Option<ErrorCallback>>,
}

impl Callbacks {
    fn drained(&self, finish: u64) {
        let callback = self.drained.lock().ok().and_then(|cb| cb.clone());
        if let Some(callback) = callback {
            callback(finish);
        }
    }

    fn error(&self, error: Error) {
        let callback = self.error.lock().ok().and_then(|cb| cb.clone());
        match callback {
            Some(callback) => callback(error),
            None => tracing::warn!("unhandled playback error: {}", error),
        }
    }
}

/// Ordered playback of inbound speech with an end-of-stream handshake.
///
/// `finish` marks the end of a reply and returns an id for it; the drained
/// callback fires with that id once every chunk enqueued before it has been
/// written to the device.
pub struct PlaybackQueue {
    device: Arc<dyn OutputDevice>,
    callbacks: Arc<Callbacks>,
    tx: Option<mpsc::UnboundedSender<QueueItem>>,
    closed: Option<Arc<AtomicBool>>,
    depth: Arc<AtomicUsize>,
    turn_chunks: AtomicU64,
    // Never reset, so ids stay unique across restarts.
    finishes: AtomicU64,
}

impl PlaybackQueue {
    pub fn new(device: Arc<dyn OutputDevice>) -> Self {
        Self {
            device,
            callbacks: Arc::new(Callbacks::default()),
            tx: None,
            closed: None,
            depth: Arc::new(AtomicUsize::new(0)),
            turn_chunks: AtomicU64::new(0),
            finishes: AtomicU64::new(0),
        }
    }

    pub fn set_on_drained<F>(&self, callback: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        if let Ok(mut drained) = self.callbacks.drained.lock() {
            *drained = Some(Arc::new(callback));
        }
    }

    pub fn set_on_error<F>(&self, callback: F)
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        if let Ok(mut error) = self.callbacks.error.lock() {
            *error = Some(Arc::new(callback));
        }
    }

    pub fn is_running(&self) -> bool {
        self.tx.is_some()
    }

    /// Starts the consumer thread. Does nothing if it is already running.
    pub fn start(&mut self) -> crate::Result<()> {
        if self.tx.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        self.depth.store(0, Ordering::SeqCst);
        self.turn_chunks.store(0, Ordering::SeqCst);
        let consumer = Consumer {
            device: self.device.clone(),
            callbacks: self.callbacks.clone(),
            closed: closed.clone(),
            depth: self.depth.clone(),
        };
        std::thread::Builder::new()
            .name("speechlink-playback".to_string())
            .spawn(move || consumer.run(rx))
            .map_err(|e| Error::DeviceUnavailable(format!("failed to spawn playback thread: {}", e)))?;

        tracing::info!("playback started");
        self.tx = Some(tx);
        self.closed = Some(closed);
        Ok(())
    }

    /// Queues a chunk behind everything already queued. Dropped if stopped.
    pub fn enqueue(&self, chunk: AudioChunk) {
        let Some(tx) = &self.tx else {
            tracing::debug!("playback stopped, dropping {:?}", chunk);
            return;
        };
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        let count = self.turn_chunks.fetch_add(1, Ordering::SeqCst) + 1;
        if count <= DEPTH_LOG_FIRST || count % DEPTH_LOG_INTERVAL == 0 {
            tracing::debug!("queued chunk #{} ({} bytes), depth={}", count, chunk.len(), depth);
        }
        if tx.send(QueueItem::Audio(chunk)).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("playback consumer is gone, chunk dropped");
        }
    }

    /// Ends the current reply and returns the id the drained callback will
    /// carry for it.
    ///
    /// On a stopped queue there is nothing to wait for and the drained
    /// callback fires right away, on the caller's thread.
    pub fn finish(&self) -> u64 {
        let id = self.finishes.fetch_add(1, Ordering::SeqCst) + 1;
        let turn = self.turn_chunks.swap(0, Ordering::SeqCst);
        tracing::info!("finishing playback #{} after {} chunks", id, turn);

        let Some(tx) = &self.tx else {
            tracing::warn!("finish called while playback is stopped");
            self.callbacks.drained(id);
            return id;
        };
        if self.depth.load(Ordering::SeqCst) == 0 {
            tracing::warn!("finish called on an empty playback queue");
        }
        if tx.send(QueueItem::EndOfStream(id)).is_err() {
            tracing::warn!("playback consumer is gone");
            self.callbacks.drained(id);
        }
        id
    }

    /// Discards queued audio and ends the consumer without firing drained.
    pub fn stop(&mut self) {
        if let Some(closed) = self.closed.take() {
            closed.store(true, Ordering::SeqCst);
        }
        if let Some(tx) = self.tx.take() {
            // Wakes the consumer; the closed flag keeps it from draining.
            let _ = tx.send(QueueItem::EndOfStream(0));
            tracing::info!("playback stopped");
        }
        self.depth.store(0, Ordering::SeqCst);
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Consumer {
    device: Arc<dyn OutputDevice>,
    callbacks: Arc<Callbacks>,
    closed: Arc<AtomicBool>,
    depth: Arc<AtomicUsize>,
}

impl Consumer {
    fn run(self, mut rx: mpsc::UnboundedReceiver<QueueItem>) {
        // Without a device the loop keeps consuming, so end-of-stream still
        // reaches the drained callback.
        let mut sink = match self.device.open() {
            Ok(sink) => Some(sink),
            Err(e) => {
                tracing::error!("failed to open speaker: {}", e);
                self.callbacks.error(e);
                None
            }
        };

        while let Some(item) = rx.blocking_recv() {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            match item {
                QueueItem::Audio(chunk) => {
                    let _ = self
                        .depth
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
                    self.play(&mut sink, &chunk);
                }
                QueueItem::EndOfStream(finish) => {
                    if let Some(device) = sink.as_mut() {
                        if let Err(e) = device.drain() {
                            tracing::warn!("failed to drain speaker: {}", e);
                        }
                    }
                    if self.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    tracing::info!("playback #{} drained", finish);
                    self.callbacks.drained(finish);
                }
            }
        }
        tracing::debug!("playback loop exited");
    }

    fn play(&self, sink: &mut Option<Box<dyn AudioSink>>, chunk: &AudioChunk) {
        let pcm = chunk.aligned();
        if pcm.len() < chunk.len() {
            tracing::debug!("dropping trailing byte of {}-byte chunk", chunk.len());
        }
        if pcm.is_empty() {
            return;
        }
        let Some(device) = sink.as_mut() else {
            return;
        };
        if let Err(e) = device.write(pcm) {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            tracing::error!("speaker write failed: {}", e);
            self.callbacks.error(e);
            *sink = None;
        }
    }
}
