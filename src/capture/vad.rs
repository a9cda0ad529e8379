use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::types::audio::CAPTURE_CHUNK_BYTES;
use crate::types::UtteranceEndReason;

/// Energy thresholds and timings for local end-of-utterance detection.
#[derive(Debug, Clone, PartialEq)]
pub struct VadSettings {
    /// RMS above this counts as speech.
    pub silence_threshold: f64,
    /// Pause after speech that ends the utterance.
    pub silence_duration: Duration,
    /// Shorter bursts are treated as noise.
    pub min_speech_duration: Duration,
    /// Give up listening if nobody has spoken by then.
    pub max_listening_timeout: Duration,
    pub chunk_bytes: usize,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            silence_threshold: 0.005,
            silence_duration: Duration::from_millis(1500),
            min_speech_duration: Duration::from_millis(300),
            max_listening_timeout: Duration::from_millis(10_000),
            chunk_bytes: CAPTURE_CHUNK_BYTES,
        }
    }
}

/// Source of the current instant for the capture loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<Instant>>);

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = match self.0.lock() {
            Ok(now) => now,
            Err(poisoned) => poisoned.into_inner(),
        };
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.0.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Per-run speech/silence tracking. Lives on the capture thread only.
#[derive(Debug)]
pub(crate) struct SilenceDetector {
    settings: VadSettings,
    speaking: bool,
    first_speech_at: Option<Instant>,
    last_speech_at: Option<Instant>,
    started_at: Instant,
}

impl SilenceDetector {
    pub(crate) fn new(settings: VadSettings, now: Instant) -> Self {
        Self {
            settings,
            speaking: false,
            first_speech_at: None,
            last_speech_at: None,
            started_at: now,
        }
    }

    pub(crate) fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feeds one chunk's level. Returns `Silence` once a long enough
    /// utterance has been followed by a long enough pause.
    pub(crate) fn observe(&mut self, rms: f64, now: Instant) -> Option<UtteranceEndReason> {
        if rms > self.settings.silence_threshold {
            if !self.speaking {
                tracing::debug!("speech started (rms={:.4})", rms);
                self.speaking = true;
                self.first_speech_at = Some(now);
            }
            self.last_speech_at = Some(now);
            return None;
        }

        if !self.speaking {
            return None;
        }
        let (Some(first), Some(last)) = (self.first_speech_at, self.last_speech_at) else {
            return None;
        };
        if now.duration_since(last) <= self.settings.silence_duration {
            return None;
        }

        let speech = last.duration_since(first);
        if speech >= self.settings.min_speech_duration {
            return Some(UtteranceEndReason::Silence);
        }
        tracing::debug!("ignoring {}ms of speech, still listening", speech.as_millis());
        self.speaking = false;
        self.first_speech_at = None;
        self.last_speech_at = Some(now);
        None
    }

    /// Nobody has spoken and the listening deadline has passed.
    pub(crate) fn timed_out(&self, now: Instant) -> bool {
        !self.speaking && now.duration_since(self.started_at) > self.settings.max_listening_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOUD: f64 = 0.2;
    const QUIET: f64 = 0.001;

    #[test]
    fn test_pause_after_speech_ends_utterance() {
        let clock = ManualClock::new();
        let mut detector = SilenceDetector::new(VadSettings::default(), clock.now());

        assert_eq!(detector.observe(LOUD, clock.now()), None);
        clock.advance(Duration::from_millis(400));
        assert_eq!(detector.observe(LOUD, clock.now()), None);
        clock.advance(Duration::from_millis(1500));
        assert_eq!(detector.observe(QUIET, clock.now()), None);
        clock.advance(Duration::from_millis(1));
        assert_eq!(
            detector.observe(QUIET, clock.now()),
            Some(UtteranceEndReason::Silence)
        );
    }

    #[test]
    fn test_short_burst_resets_speaking() {
        let clock = ManualClock::new();
        let mut detector = SilenceDetector::new(VadSettings::default(), clock.now());

        detector.observe(LOUD, clock.now());
        clock.advance(Duration::from_millis(200));
        detector.observe(LOUD, clock.now());
        clock.advance(Duration::from_millis(1600));
        assert_eq!(detector.observe(QUIET, clock.now()), None);
        assert!(!detector.is_speaking());
    }

    #[test]
    fn test_timeout_only_while_not_speaking() {
        let clock = ManualClock::new();
        let mut detector = SilenceDetector::new(VadSettings::default(), clock.now());

        clock.advance(Duration::from_millis(10_000));
        assert!(!detector.timed_out(clock.now()));
        detector.observe(LOUD, clock.now());
        clock.advance(Duration::from_millis(1));
        assert!(!detector.timed_out(clock.now()));
    }
}
