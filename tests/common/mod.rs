//! Shared test utilities
//!
//! In-memory stand-ins for the audio devices, the WebSocket and the
//! conversation service.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::mpsc;
use url::Url;

use voxlink::api::{ConversationService, ConversationSummary, OnboardingOutcome};
use voxlink::realtime::{ConnectRequest, Connector, Notice, SessionMode, Transport};
use voxlink::voice::{AudioDevices, AudioSink, AudioSource};
use voxlink::{Endpoint, Error, Result};

/// What happened to the fake devices
#[derive(Default)]
pub struct DeviceLog {
    pub inputs_opened: AtomicUsize,
    pub inputs_released: AtomicUsize,
    pub outputs_opened: AtomicUsize,
    pub outputs_released: AtomicUsize,
    /// `(start, samples)` for every accepted playback segment
    pub enqueued: Mutex<Vec<(Duration, usize)>>,
}

impl DeviceLog {
    pub fn inputs_released(&self) -> usize {
        self.inputs_released.load(Ordering::SeqCst)
    }

    pub fn outputs_released(&self) -> usize {
        self.outputs_released.load(Ordering::SeqCst)
    }

    pub fn enqueued(&self) -> Vec<(Duration, usize)> {
        self.enqueued.lock().unwrap().clone()
    }
}

/// Fake microphone handing out preloaded samples
pub struct MockSource {
    samples: Arc<Mutex<VecDeque<f32>>>,
    log: Arc<DeviceLog>,
    released: bool,
}

impl AudioSource for MockSource {
    fn sample_rate(&self) -> u32 {
        voxlink::voice::SAMPLE_RATE
    }

    fn take_samples(&mut self) -> Result<Vec<f32>> {
        Ok(self.samples.lock().unwrap().drain(..).collect())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.log.inputs_released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fake speaker with a settable clock
pub struct MockSink {
    clock: Arc<Mutex<Duration>>,
    log: Arc<DeviceLog>,
    released: bool,
}

impl AudioSink for MockSink {
    fn sample_rate(&self) -> u32 {
        voxlink::voice::SAMPLE_RATE
    }

    fn now(&self) -> Duration {
        *self.clock.lock().unwrap()
    }

    fn enqueue(&mut self, start: Duration, samples: Vec<f32>) -> Result<()> {
        if self.released {
            return Err(Error::Audio("released".to_string()));
        }
        self.log.enqueued.lock().unwrap().push((start, samples.len()));
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.log.outputs_released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for MockSink {
    fn drop(&mut self) {
        self.release();
    }
}

/// Hands out [`MockSource`] and [`MockSink`] handles
#[derive(Default)]
pub struct FakeDevices {
    pub log: Arc<DeviceLog>,
    /// Samples the next microphone will deliver
    pub mic: Arc<Mutex<VecDeque<f32>>>,
    /// Device clock reported by every speaker
    pub clock: Arc<Mutex<Duration>>,
    pub fail_input: AtomicBool,
    pub fail_output: AtomicBool,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn speak(&self, samples: &[f32]) {
        self.mic.lock().unwrap().extend(samples.iter().copied());
    }

    pub fn set_clock(&self, at: Duration) {
        *self.clock.lock().unwrap() = at;
    }
}

impl AudioDevices for FakeDevices {
    fn open_input(&self, _sample_rate: u32) -> Result<Box<dyn AudioSource>> {
        if self.fail_input.load(Ordering::SeqCst) {
            return Err(Error::DeviceUnavailable("no microphone".to_string()));
        }
        self.log.inputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSource {
            samples: Arc::clone(&self.mic),
            log: Arc::clone(&self.log),
            released: false,
        }))
    }

    fn open_output(&self, _sample_rate: u32) -> Result<Box<dyn AudioSink>> {
        if self.fail_output.load(Ordering::SeqCst) {
            return Err(Error::DeviceUnavailable("no speaker".to_string()));
        }
        self.log.outputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSink {
            clock: Arc::clone(&self.clock),
            log: Arc::clone(&self.log),
            released: false,
        }))
    }
}

/// Transport backed by in-memory channels
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
    closes: Arc<AtomicUsize>,
    closed: bool,
    /// Sends never complete, like a socket whose peer stopped reading
    stalled: bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionDropped("closed".to_string()));
        }
        if self.stalled {
            std::future::pending::<()>().await;
        }
        self.outbound
            .send(text)
            .map_err(|_| Error::ConnectionDropped("remote gone".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// The remote side of a [`MockTransport`]
pub struct RemoteEnd {
    pub mode: SessionMode,
    /// Frames to deliver to the client; drop to hang up
    pub to_client: mpsc::UnboundedSender<String>,
    /// Frames the client sent
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub closes: Arc<AtomicUsize>,
}

impl RemoteEnd {
    pub fn send(&self, text: &str) {
        self.to_client.send(text.to_string()).unwrap();
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Connector that hands each new remote end to the test
pub struct MockConnector {
    remotes: mpsc::UnboundedSender<RemoteEnd>,
    pub fail: AtomicBool,
    pub stall_sends: AtomicBool,
    pub attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            remotes,
            fail: AtomicBool::new(false),
            stall_sends: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        });
        (connector, rx)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed("refused".to_string()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let closes = Arc::new(AtomicUsize::new(0));

        let _ = self.remotes.send(RemoteEnd {
            mode: request.mode,
            to_client,
            from_client,
            closes: Arc::clone(&closes),
        });

        Ok(Box::new(MockTransport {
            inbound,
            outbound,
            closes,
            closed: false,
            stalled: self.stall_sends.load(Ordering::SeqCst),
        }))
    }
}

/// Conversation service with canned data
#[derive(Default)]
pub struct FakeService {
    pub conversations: Mutex<Vec<ConversationSummary>>,
    pub list_calls: AtomicUsize,
    pub completed: Mutex<Vec<i64>>,
}

impl FakeService {
    pub fn with_conversations(ids: &[i64]) -> Arc<Self> {
        let service = Self::default();
        *service.conversations.lock().unwrap() = ids.iter().map(|&id| summary(id)).collect();
        Arc::new(service)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationService for FakeService {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn complete_onboarding(&self, conversation_id: i64) -> Result<OnboardingOutcome> {
        self.completed.lock().unwrap().push(conversation_id);
        Ok(OnboardingOutcome {
            message: Some("Onboarding completed".to_string()),
            profile_summary: None,
        })
    }
}

pub fn summary(id: i64) -> ConversationSummary {
    ConversationSummary {
        id,
        title: Some(format!("Conversation {id}")),
        duration: None,
        created_at: None,
        message_count: None,
    }
}

pub fn endpoint() -> Endpoint {
    Endpoint {
        ws_url: Url::parse("ws://localhost:8000").unwrap(),
        token: SecretString::from("test-token".to_string()),
    }
}

pub fn request(mode: SessionMode) -> ConnectRequest {
    ConnectRequest {
        ws_url: Url::parse("ws://localhost:8000").unwrap(),
        token: SecretString::from("test-token".to_string()),
        mode,
    }
}

/// Base64 of PCM16 silence, `samples` long
pub fn silent_delta(samples: usize) -> String {
    use base64::Engine as _;
    let pcm = vec![0u8; samples * 2];
    format!(
        r#"{{"type":"response.output_audio.delta","delta":"{}"}}"#,
        base64::engine::general_purpose::STANDARD.encode(pcm)
    )
}

pub const SPEECH_STOPPED: &str = r#"{"type":"input_audio_buffer.speech_stopped","audio_end_ms":1000}"#;

/// Receive notices until one matches, failing after the paused clock runs long
pub async fn wait_for_notice<F>(notices: &mut mpsc::UnboundedReceiver<Notice>, mut pred: F) -> Notice
where
    F: FnMut(&Notice) -> bool,
{
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let notice = notices.recv().await.expect("notice channel closed");
            if pred(&notice) {
                return notice;
            }
        }
    })
    .await
    .expect("timed out waiting for notice")
}

/// Everything currently queued, without waiting
pub fn drain_notices(notices: &mut mpsc::UnboundedReceiver<Notice>) -> Vec<Notice> {
    let mut seen = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        seen.push(notice);
    }
    seen
}
