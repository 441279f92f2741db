//! Duplex streaming audio session.
//!
//! Microphone frames, backend events and playback notifications are all
//! funnelled into one queue and handled in order by [`ConversationSession::run`]
//! on a single task. Each connection gets a new epoch so that anything still
//! queued from an earlier connection is dropped instead of acted on.

use super::{system_instruction, SessionError, SessionState};
use crate::audio::playback::PlaybackScheduler;
use crate::audio::recorder::SessionRecorder;
use crate::audio::{pcm, AudioOutput, CaptureSpec, MediaDevices, Microphone, OUTPUT_SAMPLE_RATE};
use crate::events::{AppEvent, EventHub};
use crate::gemini::live::{LiveConnection, LiveConnector, LiveEvent, LiveSetup, LiveSink};
use crate::gemini::{self, ResponseModality};
use crate::tools::ToolExecutor;
use crate::transcript::Message;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";
pub const DEFAULT_LIVE_VOICE: &str = "Kore";

#[derive(Debug, Clone)]
pub struct LiveSessionConfig {
    pub model: String,
    pub voice: String,
    pub output_sample_rate: u32,
    pub capture: CaptureSpec,
    /// How close to the end of the queue a finished chunk must be for the
    /// session to stop reporting `Speaking`
    pub speaking_slack: Duration,
    /// Record both audio directions under this directory when set
    pub recording_dir: Option<PathBuf>,
}

impl Default for LiveSessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LIVE_MODEL.to_string(),
            voice: DEFAULT_LIVE_VOICE.to_string(),
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            capture: CaptureSpec::default(),
            speaking_slack: Duration::from_millis(100),
            recording_dir: None,
        }
    }
}

#[derive(Debug)]
enum SessionEvent {
    Backend(gemini::Result<LiveEvent>),
    MicFrame(Vec<f32>),
    PlaybackEnded(f64),
}

#[derive(Debug)]
struct Envelope {
    epoch: u64,
    event: SessionEvent,
}

/// Everything acquired by a connection, released by `disconnect`
#[derive(Default)]
struct Resources {
    microphone: Option<Box<dyn Microphone>>,
    /// Forwards microphone frames into the queue
    capture_task: Option<JoinHandle<()>>,
    output: Option<Box<dyn AudioOutput>>,
    sink: Option<Box<dyn LiveSink>>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Resources {
    fn is_empty(&self) -> bool {
        self.microphone.is_none()
            && self.capture_task.is_none()
            && self.output.is_none()
            && self.sink.is_none()
            && self.forwarders.is_empty()
    }
}

pub struct ConversationSession {
    devices: Arc<dyn MediaDevices>,
    connector: Arc<dyn LiveConnector>,
    executor: ToolExecutor,
    hub: EventHub,
    config: LiveSessionConfig,
    state_tx: watch::Sender<SessionState>,
    queue_tx: mpsc::UnboundedSender<Envelope>,
    queue_rx: mpsc::UnboundedReceiver<Envelope>,
    epoch: u64,
    scheduler: PlaybackScheduler,
    resources: Resources,
    recorder: Option<SessionRecorder>,
}

impl ConversationSession {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn LiveConnector>,
        executor: ToolExecutor,
        hub: EventHub,
        config: LiveSessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            devices,
            connector,
            executor,
            hub,
            config,
            state_tx,
            queue_tx,
            queue_rx,
            epoch: 0,
            scheduler: PlaybackScheduler::new(),
            resources: Resources::default(),
            recorder: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!("Session state -> {}", state);
            self.hub.publish(AppEvent::SessionStateChanged(state));
        }
    }

    /// Open the output device, the microphone and the backend session.
    /// Either all three are held afterwards or none is.
    pub async fn connect(&mut self, location: &str) -> Result<(), SessionError> {
        let current = self.state();
        if current != SessionState::Disconnected {
            return Err(SessionError::AlreadyActive(current));
        }

        self.epoch += 1;
        self.set_state(SessionState::Connecting);

        match self.acquire(location).await {
            Ok(()) => {
                info!("Live session connected from {}", location);
                self.set_state(SessionState::Connected);
                Ok(())
            }
            Err(e) => {
                error!("Connection error: {}", e);
                self.epoch += 1;
                self.release().await;
                self.scheduler.reset();
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn acquire(&mut self, location: &str) -> Result<(), SessionError> {
        let epoch = self.epoch;

        let mut output = self
            .devices
            .open_output(self.config.output_sample_rate)
            .await?;
        let ended = output.take_ended();
        self.resources.output = Some(output);
        if let Some(mut ended) = ended {
            let queue = self.queue_tx.clone();
            self.resources.forwarders.push(tokio::spawn(async move {
                while let Some(at) = ended.recv().await {
                    let event = SessionEvent::PlaybackEnded(at);
                    if queue.send(Envelope { epoch, event }).is_err() {
                        break;
                    }
                }
            }));
        }

        let mut microphone = self.devices.open_microphone(self.config.capture).await?;
        let frames = microphone.take_frames();
        self.resources.microphone = Some(microphone);

        let setup = LiveSetup {
            model: self.config.model.clone(),
            system_instruction: system_instruction(location),
            tools: self.executor.registry().tools_json(),
            voice: self.config.voice.clone(),
            response_modality: ResponseModality::Audio,
        };
        let LiveConnection { sink, mut events } = self.connector.connect(setup).await?;
        self.resources.sink = Some(sink);

        let queue = self.queue_tx.clone();
        self.resources.forwarders.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let event = SessionEvent::Backend(event);
                if queue.send(Envelope { epoch, event }).is_err() {
                    return;
                }
            }
            // The reader always reports why it stopped; this covers a vanished one
            let event = SessionEvent::Backend(Err(gemini::GeminiError::ChannelClosed));
            let _ = queue.send(Envelope { epoch, event });
        }));

        if let Some(mut frames) = frames {
            let queue = self.queue_tx.clone();
            self.resources.capture_task = Some(tokio::spawn(async move {
                while let Some(frame) = frames.recv().await {
                    let event = SessionEvent::MicFrame(frame);
                    if queue.send(Envelope { epoch, event }).is_err() {
                        break;
                    }
                }
            }));
        }

        if let Some(dir) = &self.config.recording_dir {
            let recorder = SessionRecorder::create(
                dir,
                self.config.capture.sample_rate,
                self.config.output_sample_rate,
            );
            match recorder {
                Ok(recorder) => self.recorder = Some(recorder),
                Err(e) => warn!("Session recording disabled: {}", e),
            }
        }
        Ok(())
    }

    /// Handle queued events until the session is disconnected.
    pub async fn run(&mut self) {
        while self.state().is_active() {
            if !self.step().await {
                break;
            }
        }
    }

    /// Wait for the next queued event and handle it.
    pub async fn step(&mut self) -> bool {
        let Some(Envelope { epoch, event }) = self.queue_rx.recv().await else {
            return false;
        };
        if epoch != self.epoch {
            debug!("Dropping event from stale connection {}", epoch);
            return true;
        }

        match event {
            SessionEvent::Backend(Ok(event)) => self.on_backend_event(event).await,
            SessionEvent::Backend(Err(e)) => {
                error!("Live backend error: {}", e);
                self.disconnect().await;
            }
            SessionEvent::MicFrame(frame) => self.on_mic_frame(frame).await,
            SessionEvent::PlaybackEnded(at) => {
                let slack = self.config.speaking_slack.as_secs_f64();
                if self.state() == SessionState::Speaking && self.scheduler.is_drained(at, slack) {
                    self.set_state(SessionState::Connected);
                }
            }
        }
        true
    }

    async fn on_backend_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::Audio(data) => self.on_audio(&data),
            LiveEvent::ToolCall(calls) => {
                info!("Tool call batch of {}", calls.len());
                let responses = self.executor.execute_batch(&calls).await;
                let Some(sink) = self.resources.sink.as_mut() else {
                    return;
                };
                let sent = sink.send_tool_response(responses.into_vec()).await;
                if let Err(e) = sent {
                    error!("Failed to send tool response: {}", e);
                    self.disconnect().await;
                }
            }
            LiveEvent::Text(text) => {
                self.executor.transcript().push(Message::model(text));
            }
            LiveEvent::ToolCallCancellation(ids) => {
                // Batches are answered before the next event is read
                debug!("Cancellation for already answered calls {:?}", ids);
            }
            LiveEvent::Interrupted => debug!("Model turn interrupted"),
            LiveEvent::TurnComplete => debug!("Model turn complete"),
            LiveEvent::SetupComplete => {}
            LiveEvent::GoAway => {
                info!("Backend is going away, disconnecting");
                self.disconnect().await;
            }
        }
    }

    fn on_audio(&mut self, data: &str) {
        let samples = match pcm::decode(data) {
            Ok(samples) if !samples.is_empty() => samples,
            Ok(_) => return,
            Err(e) => {
                warn!("Dropping undecodable audio chunk: {}", e);
                return;
            }
        };
        let Some(output) = self.resources.output.as_mut() else {
            return;
        };

        let chunk = self.scheduler.schedule(
            output.current_time(),
            samples.len(),
            self.config.output_sample_rate,
        );
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record_output(&pcm::to_i16(&samples));
        }
        debug!("Audio chunk {:.3}s..{:.3}s", chunk.start, chunk.end);
        if let Err(e) = output.play_at(samples, chunk.start) {
            warn!("Failed to queue audio: {}", e);
            return;
        }
        self.set_state(SessionState::Speaking);
    }

    async fn on_mic_frame(&mut self, frame: Vec<f32>) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record_input(&pcm::to_i16(&frame));
        }
        let mime_type = format!("audio/pcm;rate={}", self.config.capture.sample_rate);
        let Some(sink) = self.resources.sink.as_mut() else {
            return;
        };
        let sent = sink.send_audio(pcm::encode(&frame), &mime_type).await;
        if let Err(e) = sent {
            error!("Failed to send microphone audio: {}", e);
            self.disconnect().await;
        }
    }

    /// Release everything and return to `Disconnected`. Does nothing when
    /// already disconnected.
    pub async fn disconnect(&mut self) {
        if self.state() == SessionState::Disconnected && self.resources.is_empty() {
            return;
        }

        self.epoch += 1;
        self.set_state(SessionState::Disconnected);
        self.release().await;
        self.scheduler.reset();
        info!("Live session disconnected");
    }

    async fn release(&mut self) {
        let mut res = std::mem::take(&mut self.resources);

        if let Some(microphone) = res.microphone.as_mut() {
            microphone.stop();
        }
        if let Some(task) = res.capture_task.take() {
            task.abort();
        }
        if let Some(mut microphone) = res.microphone.take() {
            if let Err(e) = microphone.close().await {
                warn!("Error closing microphone: {}", e);
            }
        }
        if let Some(mut output) = res.output.take() {
            if let Err(e) = output.close().await {
                warn!("Error closing output device: {}", e);
            }
        }
        if let Some(mut sink) = res.sink.take() {
            if let Err(e) = sink.close().await {
                warn!("Error closing backend session: {}", e);
            }
        }
        for task in res.forwarders {
            task.abort();
        }
        if let Some(mut recorder) = self.recorder.take() {
            recorder.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioError;
    use crate::crm::InMemoryCrm;
    use crate::events::Topic;
    use crate::gemini::{FunctionCall, FunctionResponse, GeminiError};
    use crate::navigation::Router;
    use crate::transcript::Transcript;
    use async_trait::async_trait;
    use base64::Engine;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn log(log: &Log, entry: &str) {
        log.lock().unwrap().push(entry.to_string());
    }

    struct FakeOutput {
        log: Log,
        clock: Arc<Mutex<f64>>,
        played: Arc<Mutex<Vec<(usize, f64)>>>,
        ended: Option<mpsc::UnboundedReceiver<f64>>,
    }

    #[async_trait]
    impl AudioOutput for FakeOutput {
        fn current_time(&self) -> f64 {
            *self.clock.lock().unwrap()
        }

        fn play_at(&mut self, samples: Vec<f32>, start: f64) -> crate::audio::Result<()> {
            self.played.lock().unwrap().push((samples.len(), start));
            Ok(())
        }

        fn take_ended(&mut self) -> Option<mpsc::UnboundedReceiver<f64>> {
            self.ended.take()
        }

        async fn close(&mut self) -> crate::audio::Result<()> {
            log(&self.log, "output.close");
            Ok(())
        }
    }

    struct FakeMicrophone {
        log: Log,
        frames: Option<mpsc::Receiver<Vec<f32>>>,
    }

    #[async_trait]
    impl Microphone for FakeMicrophone {
        fn take_frames(&mut self) -> Option<mpsc::Receiver<Vec<f32>>> {
            self.frames.take()
        }

        fn stop(&mut self) {
            log(&self.log, "mic.stop");
        }

        async fn close(&mut self) -> crate::audio::Result<()> {
            log(&self.log, "mic.close");
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDevices {
        log: Log,
        clock: Arc<Mutex<f64>>,
        played: Arc<Mutex<Vec<(usize, f64)>>>,
        ended_tx: Mutex<Option<mpsc::UnboundedSender<f64>>>,
        frames_tx: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
        deny_microphone: bool,
    }

    #[async_trait]
    impl MediaDevices for FakeDevices {
        async fn open_output(&self, sample_rate: u32) -> crate::audio::Result<Box<dyn AudioOutput>> {
            assert_eq!(sample_rate, 24_000);
            log(&self.log, "output.open");
            let (tx, rx) = mpsc::unbounded_channel();
            *self.ended_tx.lock().unwrap() = Some(tx);
            Ok(Box::new(FakeOutput {
                log: self.log.clone(),
                clock: self.clock.clone(),
                played: self.played.clone(),
                ended: Some(rx),
            }))
        }

        async fn open_microphone(&self, spec: CaptureSpec) -> crate::audio::Result<Box<dyn Microphone>> {
            assert_eq!(spec.frame_size, 4096);
            if self.deny_microphone {
                return Err(AudioError::Device("permission denied".to_string()));
            }
            log(&self.log, "mic.open");
            let (tx, rx) = mpsc::channel(8);
            *self.frames_tx.lock().unwrap() = Some(tx);
            Ok(Box::new(FakeMicrophone {
                log: self.log.clone(),
                frames: Some(rx),
            }))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Audio { data: String, mime_type: String },
        Tools(Vec<FunctionResponse>),
    }

    struct FakeSink {
        log: Log,
        sent: Arc<Mutex<Vec<Sent>>>,
        fail_sends: bool,
    }

    #[async_trait]
    impl LiveSink for FakeSink {
        async fn send_audio(&mut self, data: String, mime_type: &str) -> gemini::Result<()> {
            if self.fail_sends {
                return Err(GeminiError::ConnectionClosed);
            }
            self.sent.lock().unwrap().push(Sent::Audio {
                data,
                mime_type: mime_type.to_string(),
            });
            Ok(())
        }

        async fn send_tool_response(&mut self, responses: Vec<FunctionResponse>) -> gemini::Result<()> {
            if self.fail_sends {
                return Err(GeminiError::ConnectionClosed);
            }
            self.sent.lock().unwrap().push(Sent::Tools(responses));
            Ok(())
        }

        async fn close(&mut self) -> gemini::Result<()> {
            log(&self.log, "sink.close");
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        log: Log,
        sent: Arc<Mutex<Vec<Sent>>>,
        setups: Mutex<Vec<LiveSetup>>,
        events_tx: Mutex<Option<mpsc::Sender<gemini::Result<LiveEvent>>>>,
        refuse: bool,
        fail_sends: bool,
    }

    #[async_trait]
    impl LiveConnector for FakeConnector {
        async fn connect(&self, setup: LiveSetup) -> gemini::Result<LiveConnection> {
            self.setups.lock().unwrap().push(setup);
            if self.refuse {
                return Err(GeminiError::Timeout);
            }
            let (tx, rx) = mpsc::channel(16);
            *self.events_tx.lock().unwrap() = Some(tx);
            Ok(LiveConnection {
                sink: Box::new(FakeSink {
                    log: self.log.clone(),
                    sent: self.sent.clone(),
                    fail_sends: self.fail_sends,
                }),
                events: rx,
            })
        }
    }

    struct Harness {
        log: Log,
        devices: Arc<FakeDevices>,
        connector: Arc<FakeConnector>,
        hub: EventHub,
    }

    impl Harness {
        async fn backend(&self, event: gemini::Result<LiveEvent>) {
            let tx = self.connector.events_tx.lock().unwrap().clone().unwrap();
            tx.send(event).await.unwrap();
        }

        fn playback_ended(&self, at: f64) {
            let tx = self.devices.ended_tx.lock().unwrap().clone().unwrap();
            tx.send(at).unwrap();
        }

        fn releases(&self) -> Vec<String> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|e| !e.ends_with(".open"))
                .cloned()
                .collect()
        }

        fn sent(&self) -> Vec<Sent> {
            self.connector.sent.lock().unwrap().clone()
        }
    }

    fn session_with(deny_microphone: bool, refuse: bool) -> (ConversationSession, Harness) {
        build_session(deny_microphone, refuse, false)
    }

    fn build_session(
        deny_microphone: bool,
        refuse: bool,
        fail_sends: bool,
    ) -> (ConversationSession, Harness) {
        let log: Log = Arc::default();
        let devices = Arc::new(FakeDevices {
            log: log.clone(),
            deny_microphone,
            ..Default::default()
        });
        let connector = Arc::new(FakeConnector {
            log: log.clone(),
            refuse,
            fail_sends,
            ..Default::default()
        });
        let hub = EventHub::new();
        let executor = ToolExecutor::new(
            Arc::new(InMemoryCrm::seeded()),
            Arc::new(Router::new(hub.clone())),
            hub.clone(),
            Transcript::new(),
        );
        let session = ConversationSession::new(
            devices.clone(),
            connector.clone(),
            executor,
            hub.clone(),
            LiveSessionConfig::default(),
        );
        (
            session,
            Harness {
                log,
                devices,
                connector,
                hub,
            },
        )
    }

    fn session() -> (ConversationSession, Harness) {
        session_with(false, false)
    }

    fn audio_chunk(samples: usize) -> LiveEvent {
        let bytes = vec![0u8; samples * 2];
        LiveEvent::Audio(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    #[tokio::test]
    async fn test_connect_acquires_everything() {
        let (mut session, h) = session();
        let mut states = h.hub.subscribe(&[Topic::Session]);
        let watch = session.watch_state();

        session.connect("/inbox").await.unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(*watch.borrow(), SessionState::Connected);
        assert_eq!(
            *h.log.lock().unwrap(),
            vec!["output.open", "mic.open"]
        );
        let setups = h.connector.setups.lock().unwrap();
        assert!(setups[0].system_instruction.ends_with("/inbox"));
        assert_eq!(setups[0].voice, "Kore");
        assert_eq!(setups[0].response_modality, ResponseModality::Audio);
        assert_eq!(setups[0].tools[0]["functionDeclarations"].as_array().unwrap().len(), 3);

        assert_eq!(
            states.try_recv(),
            Some(AppEvent::SessionStateChanged(SessionState::Connecting))
        );
        assert_eq!(
            states.try_recv(),
            Some(AppEvent::SessionStateChanged(SessionState::Connected))
        );
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let (mut session, _h) = session();
        session.connect("/").await.unwrap();
        let err = session.connect("/").await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyActive(SessionState::Connected)));
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_releases_nothing() {
        let (mut session, h) = session();
        session.disconnect().await;
        session.disconnect().await;
        assert!(h.log.lock().unwrap().is_empty());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_release_order() {
        let (mut session, h) = session();
        session.connect("/").await.unwrap();
        session.disconnect().await;

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(
            h.releases(),
            vec!["mic.stop", "mic.close", "output.close", "sink.close"]
        );

        session.disconnect().await;
        assert_eq!(h.releases().len(), 4);
    }

    #[tokio::test]
    async fn test_microphone_denied_rolls_back_output() {
        let (mut session, h) = session_with(true, false);
        let err = session.connect("/").await.unwrap_err();

        assert!(matches!(err, SessionError::Audio(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(*h.log.lock().unwrap(), vec!["output.open", "output.close"]);
        assert!(h.connector.setups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_refusal_rolls_back_audio() {
        let (mut session, h) = session_with(false, true);
        let err = session.connect("/").await.unwrap_err();

        assert!(matches!(err, SessionError::Backend(GeminiError::Timeout)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(h.releases(), vec!["mic.stop", "mic.close", "output.close"]);
    }

    #[tokio::test]
    async fn test_tool_batch_answered_once_per_call() {
        let (mut session, h) = session();
        session.connect("/").await.unwrap();

        h.backend(Ok(LiveEvent::ToolCall(vec![
            FunctionCall {
                id: Some("call-1".to_string()),
                name: "navigateTo".to_string(),
                args: serde_json::json!({"page": "kanban"}),
            },
            FunctionCall {
                id: Some("call-2".to_string()),
                name: "searchCompanies".to_string(),
                args: serde_json::json!({"query": "nova"}),
            },
        ])))
        .await;
        assert!(session.step().await);

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let Sent::Tools(responses) = &sent[0] else {
            panic!("expected a tool response, got {:?}", sent[0]);
        };
        let ids: Vec<_> = responses.iter().map(|r| r.id.as_deref()).collect();
        assert_eq!(ids, vec![Some("call-1"), Some("call-2")]);
        assert_eq!(responses[0].response["result"]["success"], true);
        assert_eq!(session.executor.navigator().current_path(), "/kanban");
    }

    #[tokio::test]
    async fn test_audio_is_scheduled_gaplessly_and_speaking_clears() {
        let (mut session, h) = session();
        session.connect("/").await.unwrap();

        // 0.2 s each at 24 kHz
        h.backend(Ok(audio_chunk(4800))).await;
        h.backend(Ok(audio_chunk(4800))).await;
        session.step().await;
        session.step().await;

        let played = h.devices.played.lock().unwrap().clone();
        assert_eq!(played.len(), 2);
        assert_eq!(played[0], (4800, 0.0));
        assert!((played[1].1 - 0.2).abs() < 1e-9);
        assert_eq!(session.state(), SessionState::Speaking);

        h.playback_ended(0.2);
        session.step().await;
        assert_eq!(session.state(), SessionState::Speaking);

        h.playback_ended(0.4);
        session.step().await;
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_microphone_frames_are_streamed() {
        let (mut session, h) = session();
        session.connect("/").await.unwrap();

        let tx = h.devices.frames_tx.lock().unwrap().clone().unwrap();
        tx.send(vec![0.25; 4096]).await.unwrap();
        session.step().await;

        let sent = h.sent();
        let Sent::Audio { data, mime_type } = &sent[0] else {
            panic!("expected audio, got {:?}", sent[0]);
        };
        assert_eq!(mime_type, "audio/pcm;rate=16000");
        assert_eq!(pcm::decode(data).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_stream_closure_disconnects() {
        let (mut session, h) = session();
        session.connect("/").await.unwrap();

        h.backend(Err(GeminiError::ConnectionClosed)).await;
        session.run().await;

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(h.releases().contains(&"sink.close".to_string()));
    }

    const FULL_RELEASE: [&str; 4] = ["mic.stop", "mic.close", "output.close", "sink.close"];

    #[tokio::test]
    async fn test_go_away_disconnects_and_ends_run() {
        let (mut session, h) = session();
        session.connect("/").await.unwrap();

        h.backend(Ok(LiveEvent::ToolCall(vec![
            FunctionCall {
                id: Some("x".to_string()),
                name: "logActivity".to_string(),
                args: serde_json::json!({}),
            },
            FunctionCall {
                id: Some("y".to_string()),
                name: "navigateTo".to_string(),
                args: serde_json::json!({"page": "company_detail"}),
            },
        ])))
        .await;
        h.backend(Ok(LiveEvent::GoAway)).await;
        session.run().await;

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let Sent::Tools(responses) = &sent[0] else {
            panic!("expected a tool response, got {:?}", sent[0]);
        };
        assert_eq!(responses[0].id.as_deref(), Some("x"));
        assert!(responses[0].response["result"]["error"].is_string());
        assert_eq!(responses[1].id.as_deref(), Some("y"));
        assert_eq!(responses[1].response["result"]["success"], true);

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(h.releases(), FULL_RELEASE);
    }

    #[tokio::test]
    async fn test_failed_tool_response_disconnects() {
        let (mut session, h) = build_session(false, false, true);
        session.connect("/").await.unwrap();

        h.backend(Ok(LiveEvent::ToolCall(vec![FunctionCall {
            id: Some("n".to_string()),
            name: "navigateTo".to_string(),
            args: serde_json::json!({"page": "inbox"}),
        }])))
        .await;
        assert!(session.step().await);

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(h.releases(), FULL_RELEASE);
    }

    #[tokio::test]
    async fn test_failed_microphone_send_disconnects() {
        let (mut session, h) = build_session(false, false, true);
        session.connect("/").await.unwrap();

        let tx = h.devices.frames_tx.lock().unwrap().clone().unwrap();
        tx.send(vec![0.1; 4096]).await.unwrap();
        assert!(session.step().await);

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(h.releases(), FULL_RELEASE);
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn test_events_from_previous_connection_are_dropped() {
        let (mut session, h) = session();
        session.connect("/").await.unwrap();
        let stale = session.epoch;
        session.disconnect().await;
        session.connect("/").await.unwrap();

        session
            .queue_tx
            .send(Envelope {
                epoch: stale,
                event: SessionEvent::Backend(Ok(audio_chunk(480))),
            })
            .unwrap();
        session.step().await;

        assert!(h.devices.played.lock().unwrap().is_empty());
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_recording_writes_both_directions() {
        let root = tempfile::tempdir().unwrap();
        let (mut session, h) = session();
        session.config.recording_dir = Some(root.path().to_path_buf());
        session.config.capture.sample_rate = 8_000;
        session.connect("/").await.unwrap();

        h.backend(Ok(audio_chunk(2400))).await;
        session.step().await;
        session.disconnect().await;

        let dir = std::fs::read_dir(root.path()).unwrap().next().unwrap().unwrap().path();
        let output = hound::WavReader::open(dir.join("output_24k.wav")).unwrap();
        assert_eq!(output.len(), 2400);
        assert_eq!(output.spec().sample_rate, 24_000);
        let input = hound::WavReader::open(dir.join("input_16k.wav")).unwrap();
        assert_eq!(input.spec().sample_rate, 8_000);
    }
}
