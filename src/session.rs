//! The voice session orchestrator.
//!
//! Capture, playback and transport each run on their own thread or task and
//! report back by posting [`SessionEvent`]s to one channel. A single task
//! drains that channel and owns every state transition, so nothing here is
//! ever mutated concurrently.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::capture::{CaptureInput, CaptureListener};
use crate::client::{SpeechTransport, TransportListener};
use crate::error::{Error, Result};
use crate::playback::PlaybackQueue;
use crate::types::events::ClientAction;
use crate::types::{AssistantMessage, AudioChunk, ConnectionState, UtteranceEndReason, VoiceSessionState};

mod watchdog;

use watchdog::Watchdog;

const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_USER_ID: i64 = 1;

/// Tunables for the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// How long to wait for the end of a spoken reply before listening again.
    pub processing_timeout: Duration,
    /// Sent along with every text prompt.
    pub user_id: i64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
            user_id: DEFAULT_USER_ID,
        }
    }
}

/// The UI side of a session. Called only from the orchestrator task.
#[cfg_attr(test, mockall::automock)]
pub trait SessionListener: Send + Sync {
    fn on_message(&self, json: Value);
    fn on_audio_chunk(&self, chunk: AudioChunk);
    fn on_audio_end(&self);
    fn on_error(&self, message: String);
    fn on_connection_status(&self, connected: bool);
    fn on_state_change(&self, state: VoiceSessionState);
}

#[derive(Debug)]
pub(crate) enum Command {
    ToggleVoiceMode,
    SendPrompt(String),
    Confirm(Option<String>),
    Cancel,
    Stop,
    Shutdown,
}

#[derive(Debug)]
pub(crate) enum SessionEvent {
    ChunkCaptured { run: u64, chunk: AudioChunk },
    UtteranceEnded { run: u64, reason: UtteranceEndReason },
    CaptureFailed { run: u64, error: Error },
    AudioReceived(AudioChunk),
    AudioEnded,
    PlaybackDrained(u64),
    PlaybackFailed(Error),
    WatchdogFired(u64),
    Message(Value),
    TransportError(String),
    ConnectionChanged(ConnectionState),
    Command(Command),
}

/// The event channel a session runs on.
///
/// Created before connecting, so the transport can be handed its listener
/// before the session exists.
pub struct SessionChannel {
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Default for SessionChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// A transport listener that posts into this session.
    pub fn transport_listener(&self) -> Arc<dyn TransportListener> {
        Arc::new(TransportBridge(self.tx.clone()))
    }
}

struct TransportBridge(mpsc::UnboundedSender<SessionEvent>);

impl TransportListener for TransportBridge {
    fn on_message(&self, json: Value) {
        let _ = self.0.send(SessionEvent::Message(json));
    }

    fn on_audio(&self, chunk: AudioChunk) {
        let _ = self.0.send(SessionEvent::AudioReceived(chunk));
    }

    fn on_audio_end(&self) {
        let _ = self.0.send(SessionEvent::AudioEnded);
    }

    fn on_error(&self, message: String) {
        let _ = self.0.send(SessionEvent::TransportError(message));
    }

    fn on_connection_change(&self, state: ConnectionState) {
        let _ = self.0.send(SessionEvent::ConnectionChanged(state));
    }
}

// Tags capture callbacks with the run that produced them.
struct CaptureBridge {
    tx: mpsc::UnboundedSender<SessionEvent>,
    run: u64,
}

impl CaptureListener for CaptureBridge {
    fn on_chunk(&self, chunk: AudioChunk) {
        let _ = self.tx.send(SessionEvent::ChunkCaptured { run: self.run, chunk });
    }

    fn on_utterance_end(&self, reason: UtteranceEndReason) {
        let _ = self.tx.send(SessionEvent::UtteranceEnded { run: self.run, reason });
    }

    fn on_error(&self, error: Error) {
        let _ = self.tx.send(SessionEvent::CaptureFailed { run: self.run, error });
    }
}

/// Commands into a running session. Every call returns immediately.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    fn post(&self, command: Command) -> Result<()> {
        self.tx
            .send(SessionEvent::Command(command))
            .map_err(|_| Error::SessionClosed)
    }

    /// Turns hands-free voice mode on or off.
    pub fn toggle_voice_mode(&self) -> Result<()> {
        self.post(Command::ToggleVoiceMode)
    }

    pub fn send_prompt(&self, text: &str) -> Result<()> {
        self.post(Command::SendPrompt(text.to_string()))
    }

    /// Approves the statement proposed by the last assistant message.
    pub fn confirm(&self, sql: Option<&str>) -> Result<()> {
        self.post(Command::Confirm(sql.map(str::to_string)))
    }

    pub fn cancel(&self) -> Result<()> {
        self.post(Command::Cancel)
    }

    /// Abandons the current reply and leaves voice mode.
    pub fn stop(&self) -> Result<()> {
        self.post(Command::Stop)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.post(Command::Shutdown)
    }
}

/// Ties capture, transport and playback into the listen / think / speak loop.
pub struct VoiceSession {
    tx: mpsc::UnboundedSender<SessionEvent>,
    transport: Arc<dyn SpeechTransport>,
    capture: CaptureInput,
    playback: PlaybackQueue,
    ui: Arc<dyn SessionListener>,
    settings: SessionSettings,
    watchdog: Watchdog,
    state: VoiceSessionState,
    voice_mode: bool,
    capture_run: u64,
    // The playback finish that ends the current turn, until it drains.
    pending_finish: Option<u64>,
}

impl VoiceSession {
    fn new(
        tx: mpsc::UnboundedSender<SessionEvent>,
        transport: Arc<dyn SpeechTransport>,
        capture: CaptureInput,
        playback: PlaybackQueue,
        ui: Arc<dyn SessionListener>,
        settings: SessionSettings,
    ) -> Self {
        let drained_tx = tx.clone();
        playback.set_on_drained(move |finish| {
            let _ = drained_tx.send(SessionEvent::PlaybackDrained(finish));
        });
        let error_tx = tx.clone();
        playback.set_on_error(move |error| {
            let _ = error_tx.send(SessionEvent::PlaybackFailed(error));
        });
        let watchdog = Watchdog::new(settings.processing_timeout, tx.clone());

        Self {
            tx,
            transport,
            capture,
            playback,
            ui,
            settings,
            watchdog,
            state: VoiceSessionState::Idle,
            voice_mode: false,
            capture_run: 0,
            pending_finish: None,
        }
    }

    /// Starts the orchestrator task on the current tokio runtime.
    ///
    /// The session starts idle with playback running, so replies to text
    /// prompts are heard without entering voice mode.
    pub fn spawn(
        channel: SessionChannel,
        transport: Arc<dyn SpeechTransport>,
        capture: CaptureInput,
        playback: PlaybackQueue,
        ui: Arc<dyn SessionListener>,
        settings: SessionSettings,
    ) -> (SessionHandle, tokio::task::JoinHandle<()>) {
        let SessionChannel { tx, mut rx } = channel;
        let handle = SessionHandle { tx: tx.clone() };
        let mut session = Self::new(tx, transport, capture, playback, ui, settings);

        let task = tokio::spawn(async move {
            session.start_playback();
            while let Some(event) = rx.recv().await {
                if !session.handle(event) {
                    break;
                }
            }
            tracing::info!("voice session closed");
        });
        (handle, task)
    }

    fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Command(command) => return self.handle_command(command),
            SessionEvent::ChunkCaptured { run, chunk } => {
                if !self.is_live_capture(run) {
                    return true;
                }
                if let Err(e) = self.transport.send_audio_chunk(chunk) {
                    tracing::warn!("failed to send audio chunk: {}", e);
                }
            }
            SessionEvent::UtteranceEnded { run, reason } => {
                if !self.is_live_capture(run) {
                    tracing::debug!("ignoring utterance end from capture run #{}", run);
                    return true;
                }
                tracing::info!("utterance ended ({}), waiting for reply", reason);
                self.capture.stop();
                self.set_state(VoiceSessionState::Processing);
                self.watchdog.arm();
                if let Err(e) = self.transport.send_audio_end() {
                    self.report(e);
                }
            }
            SessionEvent::CaptureFailed { run, error } => {
                if run != self.capture_run {
                    return true;
                }
                self.ui.on_error(error.to_string());
                self.disable_voice_mode();
            }
            SessionEvent::AudioReceived(chunk) => {
                self.ui.on_audio_chunk(chunk.clone());
                self.playback.enqueue(chunk);
                if self.voice_mode {
                    if self.state == VoiceSessionState::Processing {
                        self.set_state(VoiceSessionState::Speaking);
                    }
                    if self.is_awaiting_reply() {
                        // Measures silence from the backend, not reply length.
                        self.watchdog.arm();
                    }
                }
            }
            SessionEvent::AudioEnded => {
                self.ui.on_audio_end();
                if !self.voice_mode {
                    self.playback.finish();
                } else if self.is_awaiting_reply() {
                    self.watchdog.cancel();
                    self.finish_reply();
                } else {
                    tracing::debug!("ignoring AUDIO_END while {}", self.state);
                }
            }
            SessionEvent::WatchdogFired(generation) => {
                if !self.watchdog.take_fired(generation) {
                    tracing::debug!("ignoring stale watchdog #{}", generation);
                    return true;
                }
                tracing::warn!(
                    "no AUDIO_END within {:?}, resuming",
                    self.settings.processing_timeout
                );
                if self.voice_mode && self.is_awaiting_reply() {
                    self.finish_reply();
                }
            }
            SessionEvent::PlaybackDrained(finish) => {
                if self.pending_finish != Some(finish) {
                    tracing::debug!("ignoring drained playback #{}", finish);
                    return true;
                }
                self.pending_finish = None;
                if self.voice_mode {
                    self.start_listening();
                }
            }
            SessionEvent::PlaybackFailed(error) => self.ui.on_error(error.to_string()),
            SessionEvent::Message(json) => {
                let is_reply = AssistantMessage::from_value(&json)
                    .map(|message| !message.is_status())
                    .unwrap_or(true);
                if is_reply {
                    self.transport.set_generating(false);
                }
                self.ui.on_message(json);
            }
            SessionEvent::TransportError(message) => {
                self.transport.set_generating(false);
                self.ui.on_error(message);
            }
            SessionEvent::ConnectionChanged(state) => {
                tracing::info!("connection {:?}", state);
                self.ui.on_connection_status(state.is_connected());
            }
        }
        true
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::ToggleVoiceMode => {
                if self.voice_mode {
                    self.disable_voice_mode();
                } else {
                    self.enable_voice_mode();
                }
            }
            Command::SendPrompt(text) => {
                if text.trim().is_empty() {
                    return true;
                }
                self.start_playback();
                if let Err(e) = self.transport.send_prompt(&text, self.settings.user_id) {
                    self.report(e);
                }
            }
            Command::Confirm(sql) => {
                if let Err(e) = self.transport.send_action(ClientAction::Confirm, sql) {
                    self.report(e);
                }
            }
            Command::Cancel => {
                if let Err(e) = self.transport.send_action(ClientAction::Cancel, None) {
                    self.report(e);
                }
            }
            Command::Stop => {
                if let Err(e) = self.transport.stop() {
                    self.report(e);
                }
                self.disable_voice_mode();
            }
            Command::Shutdown => {
                self.disable_voice_mode();
                return false;
            }
        }
        true
    }

    fn enable_voice_mode(&mut self) {
        tracing::info!("voice mode on");
        self.voice_mode = true;
        self.start_playback();
        self.start_listening();
    }

    fn disable_voice_mode(&mut self) {
        if self.voice_mode {
            tracing::info!("voice mode off");
        }
        self.voice_mode = false;
        self.capture_run += 1;
        self.capture.stop();
        self.playback.stop();
        self.watchdog.cancel();
        self.pending_finish = None;
        self.set_state(VoiceSessionState::Idle);
    }

    fn start_listening(&mut self) {
        self.capture_run += 1;
        let listener = Arc::new(CaptureBridge {
            tx: self.tx.clone(),
            run: self.capture_run,
        });
        match self.capture.start(listener) {
            Ok(()) => self.set_state(VoiceSessionState::Listening),
            Err(e) => {
                self.ui.on_error(e.to_string());
                self.disable_voice_mode();
            }
        }
    }

    fn start_playback(&mut self) {
        if let Err(e) = self.playback.start() {
            self.ui.on_error(e.to_string());
        }
    }

    fn finish_reply(&mut self) {
        self.pending_finish = Some(self.playback.finish());
    }

    fn is_live_capture(&self, run: u64) -> bool {
        run == self.capture_run && self.state == VoiceSessionState::Listening
    }

    fn is_awaiting_reply(&self) -> bool {
        self.pending_finish.is_none()
            && matches!(
                self.state,
                VoiceSessionState::Processing | VoiceSessionState::Speaking
            )
    }

    fn report(&self, error: Error) {
        match error {
            Error::NotConnected => self.ui.on_error("Service disconnected.".to_string()),
            other => self.ui.on_error(other.to_string()),
        }
    }

    fn set_state(&mut self, state: VoiceSessionState) {
        if self.state == state {
            return;
        }
        tracing::info!("state {} -> {}", self.state, state);
        self.state = state;
        self.ui.on_state_change(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ManualClock, VadSettings};
    use crate::client::MockSpeechTransport;
    use crate::device::{AudioSink, AudioSource, InputDevice, OutputDevice};
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// A microphone that hears nothing, slowly.
    struct QuietInput;

    struct QuietSource;

    impl AudioSource for QuietSource {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            std::thread::sleep(Duration::from_millis(20));
            buf.fill(0);
            Ok(buf.len())
        }
    }

    impl InputDevice for QuietInput {
        fn open(&self) -> Result<Box<dyn AudioSource>> {
            Ok(Box::new(QuietSource))
        }
    }

    /// A speaker that counts writes, each taking `delay`.
    #[derive(Default)]
    struct CountingOutput {
        written: Arc<AtomicUsize>,
        delay: Duration,
    }

    struct CountingSink {
        written: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl AudioSink for CountingSink {
        fn write(&mut self, _pcm: &[u8]) -> Result<()> {
            std::thread::sleep(self.delay);
            self.written.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl OutputDevice for CountingOutput {
        fn open(&self) -> Result<Box<dyn AudioSink>> {
            Ok(Box::new(CountingSink {
                written: self.written.clone(),
                delay: self.delay,
            }))
        }
    }

    struct Fixture {
        session: VoiceSession,
        rx: mpsc::UnboundedReceiver<SessionEvent>,
        states: Arc<Mutex<Vec<VoiceSessionState>>>,
        written: Arc<AtomicUsize>,
    }

    /// A session driven by hand: the test decides which events it sees.
    fn fixture(transport: MockSpeechTransport, ui: MockSessionListener) -> Fixture {
        fixture_with(transport, ui, SessionSettings::default())
    }

    fn fixture_with(
        transport: MockSpeechTransport,
        ui: MockSessionListener,
        settings: SessionSettings,
    ) -> Fixture {
        fixture_full(transport, ui, settings, CountingOutput::default())
    }

    fn fixture_full(
        transport: MockSpeechTransport,
        mut ui: MockSessionListener,
        settings: SessionSettings,
        output: CountingOutput,
    ) -> Fixture {
        let states: Arc<Mutex<Vec<VoiceSessionState>>> = Arc::default();
        let recorded = states.clone();
        ui.expect_on_state_change()
            .returning(move |state| recorded.lock().unwrap().push(state));

        let written = output.written.clone();
        let capture = CaptureInput::new(Arc::new(QuietInput), VadSettings::default())
            .with_clock(Arc::new(ManualClock::new()));
        let SessionChannel { tx, rx } = SessionChannel::new();
        let mut session = VoiceSession::new(
            tx,
            Arc::new(transport),
            capture,
            PlaybackQueue::new(Arc::new(output)),
            Arc::new(ui),
            settings,
        );
        session.start_playback();
        Fixture {
            session,
            rx,
            states,
            written,
        }
    }

    impl Fixture {
        fn command(&mut self, command: Command) -> bool {
            self.session.handle(SessionEvent::Command(command))
        }

        /// Feeds `event` and everything it causes until `done` matches.
        async fn pump_until(&mut self, done: impl Fn(&SessionEvent) -> bool) {
            loop {
                let event = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
                    .await
                    .expect("session event")
                    .expect("channel open");
                // Capture chunks are not part of these scenarios.
                if matches!(event, SessionEvent::ChunkCaptured { .. }) {
                    continue;
                }
                let stop = done(&event);
                self.session.handle(event);
                if stop {
                    return;
                }
            }
        }

        fn end_utterance(&mut self) {
            let run = self.session.capture_run;
            self.session.handle(SessionEvent::UtteranceEnded {
                run,
                reason: UtteranceEndReason::Silence,
            });
        }

        fn states(&self) -> Vec<VoiceSessionState> {
            self.states.lock().unwrap().clone()
        }
    }

    fn quiet_ui() -> MockSessionListener {
        let mut ui = MockSessionListener::new();
        ui.expect_on_audio_chunk().return_const(());
        ui.expect_on_audio_end().return_const(());
        ui
    }

    #[tokio::test]
    async fn test_turn_returns_to_listening_after_drain() {
        let mut transport = MockSpeechTransport::new();
        transport.expect_send_audio_end().times(1).returning(|| Ok(()));
        let mut f = fixture(transport, quiet_ui());

        f.command(Command::ToggleVoiceMode);
        assert!(f.session.capture.is_running());
        f.end_utterance();
        assert!(!f.session.capture.is_running());

        for i in 0..3u8 {
            f.session
                .handle(SessionEvent::AudioReceived(AudioChunk::from(vec![i; 4])));
        }
        f.session.handle(SessionEvent::AudioEnded);
        f.pump_until(|e| matches!(e, SessionEvent::PlaybackDrained(_))).await;

        assert_eq!(f.written.load(Ordering::SeqCst), 3);
        assert!(f.session.capture.is_running());
        assert_eq!(
            f.states(),
            vec![
                VoiceSessionState::Listening,
                VoiceSessionState::Processing,
                VoiceSessionState::Speaking,
                VoiceSessionState::Listening,
            ]
        );
    }

    #[tokio::test]
    async fn test_watchdog_recovers_without_audio_end() {
        let mut transport = MockSpeechTransport::new();
        transport.expect_send_audio_end().times(1).returning(|| Ok(()));
        let settings = SessionSettings {
            processing_timeout: Duration::from_millis(50),
            ..SessionSettings::default()
        };
        let mut f = fixture_with(transport, quiet_ui(), settings);

        f.command(Command::ToggleVoiceMode);
        f.end_utterance();
        f.pump_until(|e| matches!(e, SessionEvent::WatchdogFired(_))).await;
        assert!(f.session.pending_finish.is_some());
        f.pump_until(|e| matches!(e, SessionEvent::PlaybackDrained(_))).await;

        assert_eq!(f.session.state, VoiceSessionState::Listening);
        assert!(f.session.capture.is_running());
    }

    #[tokio::test]
    async fn test_earlier_finish_does_not_end_voice_turn() {
        let mut transport = MockSpeechTransport::new();
        transport.expect_send_audio_end().times(1).returning(|| Ok(()));
        let output = CountingOutput {
            delay: Duration::from_millis(100),
            ..CountingOutput::default()
        };
        let mut f = fixture_full(transport, quiet_ui(), SessionSettings::default(), output);

        // The tail of a text prompt reply, finished outside voice mode.
        f.session
            .handle(SessionEvent::AudioReceived(AudioChunk::from(vec![1u8; 4])));
        f.session.handle(SessionEvent::AudioEnded);

        f.command(Command::ToggleVoiceMode);
        f.end_utterance();
        f.session
            .handle(SessionEvent::AudioReceived(AudioChunk::from(vec![2u8; 4])));
        f.session.handle(SessionEvent::AudioEnded);
        let turn = f.session.pending_finish;
        assert!(turn.is_some());

        f.pump_until(|e| matches!(e, SessionEvent::PlaybackDrained(_))).await;
        assert_eq!(f.session.pending_finish, turn);
        assert_eq!(f.session.state, VoiceSessionState::Speaking);
        assert!(!f.session.capture.is_running());

        f.pump_until(|e| matches!(e, SessionEvent::PlaybackDrained(_))).await;
        assert_eq!(f.written.load(Ordering::SeqCst), 2);
        assert_eq!(f.session.state, VoiceSessionState::Listening);
        assert!(f.session.capture.is_running());
    }

    fn disconnect_ui() -> MockSessionListener {
        let mut ui = quiet_ui();
        ui.expect_on_error()
            .withf(|message| message == "Connection Lost: reset by peer")
            .times(1)
            .return_const(());
        ui.expect_on_connection_status()
            .with(eq(false))
            .times(1)
            .return_const(());
        ui
    }

    fn lose_connection(f: &mut Fixture) {
        f.session.handle(SessionEvent::TransportError(
            "Connection Lost: reset by peer".to_string(),
        ));
        f.session
            .handle(SessionEvent::ConnectionChanged(ConnectionState::Disconnected));
    }

    #[tokio::test]
    async fn test_disconnect_keeps_listening() {
        let mut transport = MockSpeechTransport::new();
        transport
            .expect_set_generating()
            .with(eq(false))
            .times(1)
            .return_const(());
        let mut f = fixture(transport, disconnect_ui());

        f.command(Command::ToggleVoiceMode);
        lose_connection(&mut f);

        assert_eq!(f.session.state, VoiceSessionState::Listening);
        assert!(f.session.voice_mode);
        assert!(f.session.capture.is_running());
        assert!(f.session.playback.is_running());
    }

    #[tokio::test]
    async fn test_disconnect_mid_turn_recovers_through_watchdog() {
        let mut transport = MockSpeechTransport::new();
        transport.expect_send_audio_end().times(1).returning(|| Ok(()));
        transport
            .expect_set_generating()
            .with(eq(false))
            .times(1)
            .return_const(());
        let settings = SessionSettings {
            processing_timeout: Duration::from_millis(50),
            ..SessionSettings::default()
        };
        let mut f = fixture_with(transport, disconnect_ui(), settings);

        f.command(Command::ToggleVoiceMode);
        f.end_utterance();
        lose_connection(&mut f);
        assert_eq!(f.session.state, VoiceSessionState::Processing);
        assert!(f.session.playback.is_running());

        f.pump_until(|e| matches!(e, SessionEvent::PlaybackDrained(_))).await;
        assert_eq!(f.session.state, VoiceSessionState::Listening);
        assert!(f.session.capture.is_running());
        assert!(f.session.playback.is_running());
    }

    #[tokio::test]
    async fn test_stale_watchdog_is_ignored() {
        let mut transport = MockSpeechTransport::new();
        transport.expect_send_audio_end().times(1).returning(|| Ok(()));
        let mut f = fixture(transport, quiet_ui());

        f.command(Command::ToggleVoiceMode);
        f.end_utterance();
        f.session.handle(SessionEvent::WatchdogFired(0));

        assert!(f.session.pending_finish.is_none());
        assert_eq!(f.session.state, VoiceSessionState::Processing);
    }

    #[tokio::test]
    async fn test_stale_capture_run_is_ignored() {
        let mut transport = MockSpeechTransport::new();
        transport.expect_send_audio_end().never();
        transport
            .expect_send_audio_chunk()
            .times(1)
            .returning(|_| Ok(()));
        let mut f = fixture(transport, quiet_ui());

        f.command(Command::ToggleVoiceMode);
        let stale = f.session.capture_run;
        f.command(Command::ToggleVoiceMode);
        f.command(Command::ToggleVoiceMode);

        f.session.handle(SessionEvent::ChunkCaptured {
            run: stale,
            chunk: AudioChunk::from(vec![0u8; 4]),
        });
        f.session.handle(SessionEvent::UtteranceEnded {
            run: stale,
            reason: UtteranceEndReason::Timeout,
        });
        let live = f.session.capture_run;
        f.session.handle(SessionEvent::ChunkCaptured {
            run: live,
            chunk: AudioChunk::from(vec![0u8; 4]),
        });

        assert_eq!(f.session.state, VoiceSessionState::Listening);
    }

    #[tokio::test]
    async fn test_audio_end_while_listening_is_ignored() {
        let transport = MockSpeechTransport::new();
        let mut f = fixture(transport, quiet_ui());

        f.command(Command::ToggleVoiceMode);
        f.session.handle(SessionEvent::AudioEnded);
        assert!(f.session.pending_finish.is_none());
        assert_eq!(f.session.state, VoiceSessionState::Listening);
    }

    #[tokio::test]
    async fn test_prompt_while_disconnected() {
        let mut transport = MockSpeechTransport::new();
        transport
            .expect_send_prompt()
            .withf(|text, user_id| text == "what is due today" && *user_id == 1)
            .times(1)
            .returning(|_, _| Err(Error::NotConnected));
        let mut ui = MockSessionListener::new();
        ui.expect_on_error()
            .withf(|message| message == "Service disconnected.")
            .times(1)
            .return_const(());
        let mut f = fixture(transport, ui);

        f.command(Command::SendPrompt("   ".to_string()));
        f.command(Command::SendPrompt("what is due today".to_string()));
    }

    #[tokio::test]
    async fn test_reply_clears_generating() {
        let mut transport = MockSpeechTransport::new();
        transport
            .expect_set_generating()
            .with(eq(false))
            .times(1)
            .return_const(());
        let mut ui = MockSessionListener::new();
        ui.expect_on_message().times(2).return_const(());
        let mut f = fixture(transport, ui);

        f.session
            .handle(SessionEvent::Message(serde_json::json!({"status": "Thinking..."})));
        f.session
            .handle(SessionEvent::Message(serde_json::json!({"display_message": "Done."})));
    }

    #[tokio::test]
    async fn test_confirm_and_cancel() {
        let mut transport = MockSpeechTransport::new();
        transport
            .expect_send_action()
            .with(eq(ClientAction::Confirm), eq(Some("DELETE FROM task WHERE id = 3".to_string())))
            .times(1)
            .returning(|_, _| Ok(()));
        transport
            .expect_send_action()
            .with(eq(ClientAction::Cancel), eq(None::<String>))
            .times(1)
            .returning(|_, _| Ok(()));
        let mut f = fixture(transport, quiet_ui());

        f.command(Command::Confirm(Some("DELETE FROM task WHERE id = 3".to_string())));
        f.command(Command::Cancel);
    }

    #[tokio::test]
    async fn test_stop_goes_idle() {
        let mut transport = MockSpeechTransport::new();
        transport.expect_send_audio_end().returning(|| Ok(()));
        transport.expect_stop().times(1).returning(|| Ok(()));
        let mut f = fixture(transport, quiet_ui());

        f.command(Command::ToggleVoiceMode);
        f.end_utterance();
        f.command(Command::Stop);

        assert_eq!(f.session.state, VoiceSessionState::Idle);
        assert!(!f.session.capture.is_running());
        assert!(!f.session.playback.is_running());
        assert!(!f.command(Command::Shutdown));
    }

    #[tokio::test]
    async fn test_handle_reports_closed_session() {
        let SessionChannel { tx, rx } = SessionChannel::new();
        let handle = SessionHandle { tx };
        drop(rx);
        assert!(matches!(handle.toggle_voice_mode(), Err(Error::SessionClosed)));
    }
}
