use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::device::InputDevice;
use crate::error::{Error, Result};
use crate::types::{AudioChunk, UtteranceEndReason};
use speechlink_utils::audio::rms;

mod vad;

pub use vad::{Clock, ManualClock, SystemClock, VadSettings};
use vad::SilenceDetector;

/// Reads between RMS log lines.
const RMS_LOG_INTERVAL: u64 = 50;

/// Receives what one capture run produces, on the capture thread.
pub trait CaptureListener: Send + Sync {
    fn on_chunk(&self, chunk: AudioChunk);
    /// Fired at most once per run; the run is over when it fires.
    fn on_utterance_end(&self, reason: UtteranceEndReason);
    fn on_error(&self, error: Error);
}

/// Microphone reader with local end-of-utterance detection.
///
/// Each `start` spawns a fresh loop with its own running flag, so a stopped
/// loop that is still finishing a read can never be revived by a later start.
pub struct CaptureInput {
    device: Arc<dyn InputDevice>,
    clock: Arc<dyn Clock>,
    settings: VadSettings,
    running: Option<Arc<AtomicBool>>,
}

impl CaptureInput {
    pub fn new(device: Arc<dyn InputDevice>, settings: VadSettings) -> Self {
        Self {
            device,
            clock: Arc::new(SystemClock),
            settings,
            running: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Starts a new run, stopping any previous one.
    ///
    /// Device failures are reported through `listener`, not returned.
    pub fn start(&mut self, listener: Arc<dyn CaptureListener>) -> Result<()> {
        self.stop();

        let running = Arc::new(AtomicBool::new(true));
        let run = CaptureRun {
            device: self.device.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
            running: running.clone(),
            listener,
        };
        std::thread::Builder::new()
            .name("speechlink-capture".to_string())
            .spawn(move || run.run())
            .map_err(|e| Error::DeviceUnavailable(format!("failed to spawn capture thread: {}", e)))?;

        self.running = Some(running);
        Ok(())
    }

    /// Signals the current run to exit. Never waits for the device.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            if running.swap(false, Ordering::SeqCst) {
                tracing::info!("capture stopped");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| running.load(Ordering::SeqCst))
    }
}

impl Drop for CaptureInput {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureRun {
    device: Arc<dyn InputDevice>,
    clock: Arc<dyn Clock>,
    settings: VadSettings,
    running: Arc<AtomicBool>,
    listener: Arc<dyn CaptureListener>,
}

impl CaptureRun {
    fn run(self) {
        let mut source = match self.device.open() {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("failed to open microphone: {}", e);
                self.running.store(false, Ordering::SeqCst);
                self.listener.on_error(e);
                return;
            }
        };

        let mut detector = SilenceDetector::new(self.settings.clone(), self.clock.now());
        let mut buf = vec![0u8; self.settings.chunk_bytes];
        let mut reads: u64 = 0;
        tracing::info!("listening");

        while self.running.load(Ordering::SeqCst) {
            let read = source.read(&mut buf);
            // Stopped while the read was in flight: whatever it returned is discarded.
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!("microphone read failed: {}", e);
                    self.running.store(false, Ordering::SeqCst);
                    self.listener.on_error(e);
                    return;
                }
            };

            let now = self.clock.now();
            if n > 0 {
                let chunk = &buf[..n];
                let level = rms(chunk);
                reads += 1;
                if reads % RMS_LOG_INTERVAL == 0 {
                    tracing::debug!(
                        "read #{}: rms={:.4}, speaking={}",
                        reads,
                        level,
                        detector.is_speaking()
                    );
                }
                self.listener.on_chunk(AudioChunk::from(chunk));

                if let Some(reason) = detector.observe(level, now) {
                    self.finish(reason);
                    return;
                }
            }
            if detector.timed_out(now) {
                self.finish(UtteranceEndReason::Timeout);
                return;
            }
        }
        tracing::debug!("capture loop exited after {} reads", reads);
    }

    fn finish(&self, reason: UtteranceEndReason) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("utterance ended: {}", reason);
        self.listener.on_utterance_end(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::AudioSource;
    use crate::types::audio::{duration_of, CAPTURE_CHUNK_BYTES, CAPTURE_SAMPLE_RATE};
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Chunk(usize),
        End(UtteranceEndReason),
        Error,
    }

    struct Recorder(Mutex<mpsc::Sender<Seen>>);

    impl Recorder {
        fn send(&self, seen: Seen) {
            if let Ok(tx) = self.0.lock() {
                let _ = tx.send(seen);
            }
        }
    }

    impl CaptureListener for Recorder {
        fn on_chunk(&self, chunk: AudioChunk) {
            self.send(Seen::Chunk(chunk.len()));
        }
        fn on_utterance_end(&self, reason: UtteranceEndReason) {
            self.send(Seen::End(reason));
        }
        fn on_error(&self, _error: Error) {
            self.send(Seen::Error);
        }
    }

    fn recorder() -> (Arc<dyn CaptureListener>, mpsc::Receiver<Seen>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Recorder(Mutex::new(tx))), rx)
    }

    fn speech_chunk() -> Vec<u8> {
        (0..CAPTURE_CHUNK_BYTES / 2)
            .flat_map(|i| {
                let sample: i16 = if i % 2 == 0 { 8000 } else { -8000 };
                sample.to_le_bytes()
            })
            .collect()
    }

    fn silent_chunk() -> Vec<u8> {
        vec![0u8; CAPTURE_CHUNK_BYTES]
    }

    /// Plays back a fixed script, advancing the clock by each chunk's length.
    struct ScriptedSource {
        clock: ManualClock,
        chunks: VecDeque<Vec<u8>>,
        dropped: Arc<AtomicBool>,
    }

    impl AudioSource for ScriptedSource {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    self.clock
                        .advance(duration_of(chunk.len(), CAPTURE_SAMPLE_RATE));
                    Ok(chunk.len())
                }
                None => {
                    std::thread::sleep(Duration::from_millis(1));
                    Ok(0)
                }
            }
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    struct ScriptedInput(Mutex<Option<ScriptedSource>>);

    impl InputDevice for ScriptedInput {
        fn open(&self) -> Result<Box<dyn AudioSource>> {
            match self.0.lock().ok().and_then(|mut source| source.take()) {
                Some(source) => Ok(Box::new(source)),
                None => Err(Error::DeviceUnavailable("no microphone".to_string())),
            }
        }
    }

    struct Fixture {
        capture: CaptureInput,
        dropped: Arc<AtomicBool>,
    }

    fn fixture(chunks: Vec<Vec<u8>>) -> Fixture {
        let clock = ManualClock::new();
        let dropped = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource {
            clock: clock.clone(),
            chunks: chunks.into(),
            dropped: dropped.clone(),
        };
        let device = Arc::new(ScriptedInput(Mutex::new(Some(source))));
        let capture =
            CaptureInput::new(device, VadSettings::default()).with_clock(Arc::new(clock));
        Fixture { capture, dropped }
    }

    fn script(speech: usize, silence: usize) -> Vec<Vec<u8>> {
        std::iter::repeat_with(speech_chunk)
            .take(speech)
            .chain(std::iter::repeat_with(silent_chunk).take(silence))
            .collect()
    }

    /// Collects events up to and including the utterance end.
    fn until_end(rx: &mpsc::Receiver<Seen>) -> (usize, Seen) {
        let mut chunks = 0;
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                Seen::Chunk(_) => chunks += 1,
                other => return (chunks, other),
            }
        }
    }

    fn wait_for(flag: &AtomicBool) -> bool {
        for _ in 0..500 {
            if flag.load(Ordering::SeqCst) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_rms_of_generated_chunks() {
        assert_eq!(rms(&silent_chunk()), 0.0);
        assert!((rms(&speech_chunk()) - 8000.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_speech_then_silence_ends_once() {
        // 448ms of speech, then 1600ms of silence
        let mut f = fixture(script(7, 25));
        let (listener, rx) = recorder();
        f.capture.start(listener).unwrap();

        let (chunks, end) = until_end(&rx);
        assert_eq!(end, Seen::End(UtteranceEndReason::Silence));
        // The pause is long enough on the 24th silent chunk.
        assert_eq!(chunks, 7 + 24);

        assert!(wait_for(&f.dropped));
        assert!(!f.capture.is_running());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_short_speech_keeps_listening() {
        let mut f = fixture(script(3, 25));
        let (listener, rx) = recorder();
        f.capture.start(listener).unwrap();

        for _ in 0..28 {
            assert_eq!(
                rx.recv_timeout(Duration::from_secs(5)).unwrap(),
                Seen::Chunk(CAPTURE_CHUNK_BYTES)
            );
        }
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(f.capture.is_running());

        f.capture.stop();
        assert!(wait_for(&f.dropped));
    }

    #[test]
    fn test_silence_times_out_once() {
        let mut f = fixture(script(0, 160));
        let (listener, rx) = recorder();
        f.capture.start(listener).unwrap();

        let (chunks, end) = until_end(&rx);
        assert_eq!(end, Seen::End(UtteranceEndReason::Timeout));
        // 157 * 64ms is the first read past ten seconds.
        assert_eq!(chunks, 157);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_open_failure_is_reported() {
        let device = Arc::new(ScriptedInput(Mutex::new(None)));
        let mut capture = CaptureInput::new(device, VadSettings::default());
        let (listener, rx) = recorder();
        capture.start(listener).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Seen::Error);
        assert!(!capture.is_running());
    }

    struct SlowSource {
        dropped: Arc<AtomicBool>,
    }

    impl AudioSource for SlowSource {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            std::thread::sleep(Duration::from_millis(20));
            buf.fill(0);
            Ok(buf.len())
        }
    }

    impl Drop for SlowSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    struct SlowInput(Arc<AtomicBool>);

    impl InputDevice for SlowInput {
        fn open(&self) -> Result<Box<dyn AudioSource>> {
            Ok(Box::new(SlowSource {
                dropped: self.0.clone(),
            }))
        }
    }

    #[test]
    fn test_stop_during_read_exits_quietly() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut capture = CaptureInput::new(Arc::new(SlowInput(dropped.clone())), VadSettings::default())
            .with_clock(Arc::new(ManualClock::new()));
        let (listener, rx) = recorder();
        capture.start(listener).unwrap();

        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Seen::Chunk(_)
        ));
        capture.stop();
        assert!(wait_for(&dropped));
        while let Ok(seen) = rx.try_recv() {
            assert!(matches!(seen, Seen::Chunk(_)));
        }
    }
}
