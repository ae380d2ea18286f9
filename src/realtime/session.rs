//! Duplex session: one connection, one microphone, one speaker
//!
//! [`DuplexSession::open`] walks `Idle → Connecting → Active`, acquiring the
//! connection and both devices. [`DuplexSession::run`] multiplexes capture
//! frames out and turn events in until stopped, closed, or faulted, then
//! drains: capture is cancelled, the scheduler stops accepting audio, devices
//! and the socket are released, and the state becomes `Drained`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::protocol::{ClientMessage, Role, TurnEvent, decode_events};
use super::state::{SessionState, Transition};
use super::transport::{ConnectRequest, Connector, SessionMode, Transport};
use crate::api::ConversationSummary;
use crate::latency::{LatencyReport, LatencyTracker};
use crate::voice::{
    AudioDevices, AudioFrame, AudioSink, AudioSource, CaptureConfig, CapturePipeline,
    DEFAULT_LEAD_WINDOW, PlaybackScheduler, codec,
};
use crate::{Error, Result};

/// Upper bound on the closing handshake
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// One line of conversation transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    /// Speaker
    pub role: Role,
    /// Text
    pub text: String,
    /// When the line arrived
    pub at: DateTime<Utc>,
}

/// Observable output of the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// The session changed state
    State(SessionState),
    /// A transcript line arrived
    Transcript(TranscriptLine),
    /// A latency sample was recorded
    Latency(LatencyReport),
    /// The remote side finished sending a reply's audio
    ResponseDone,
    /// The session failed; it will drain and must be restarted
    SessionError(String),
    /// The grace window elapsed; conversation data is final
    Refreshed {
        /// Mode of the session that ended
        mode: SessionMode,
        /// Newest conversation, if the service could list them
        latest: Option<ConversationSummary>,
    },
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Stop was requested
    Stopped,
    /// The remote side closed the connection
    RemoteClosed,
    /// A transport, device, or remote error ended the session
    Failed(String),
}

/// Summary returned once a session has drained
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// Session identifier used in logs
    pub session_id: Uuid,
    /// Why the session ended
    pub reason: EndReason,
    /// Capture frames transmitted
    pub frames_sent: u64,
    /// Playback segments scheduled
    pub segments_scheduled: u64,
    /// Latency statistics, if any turn completed
    pub latency: Option<LatencyReport>,
}

/// Session tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Capture pipeline settings; the sample rate also applies to playback
    pub capture: CaptureConfig,
    /// Playback lead window
    pub lead_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            lead_window: DEFAULT_LEAD_WINDOW,
        }
    }
}

/// Current state plus its observers
struct StateCell {
    session_id: Uuid,
    state: SessionState,
    watch: watch::Sender<SessionState>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl StateCell {
    fn apply(&mut self, transition: Transition) -> SessionState {
        match self.state.next(transition) {
            Some(next) if next != self.state => {
                tracing::debug!(
                    session_id = %self.session_id,
                    from = %self.state,
                    to = %next,
                    "session state changed"
                );
                self.state = next;
                // Stored even while nobody is subscribed
                self.watch.send_replace(next);
                self.notify(Notice::State(next));
            }
            Some(_) => {}
            None => {
                tracing::warn!(
                    session_id = %self.session_id,
                    state = %self.state,
                    ?transition,
                    "ignoring undefined session transition"
                );
            }
        }
        self.state
    }

    fn notify(&self, notice: Notice) {
        // Nobody listening is fine
        let _ = self.notices.send(notice);
    }

    fn fail_start(&mut self, error: &Error) {
        tracing::warn!(session_id = %self.session_id, error = %error, "session failed to start");
        self.notify(Notice::SessionError(error.to_string()));
        self.apply(Transition::StartFailed);
    }
}

enum Exit {
    Stopped,
    Closed,
    Fault(String),
}

/// An open duplex session
pub struct DuplexSession {
    cell: StateCell,
    config: SessionConfig,
    transport: Box<dyn Transport>,
    source: Option<Box<dyn AudioSource>>,
    sink: Option<Box<dyn AudioSink>>,
    scheduler: PlaybackScheduler,
    latency: LatencyTracker,
    frames_sent: u64,
}

impl DuplexSession {
    /// Connect and acquire devices
    ///
    /// On failure everything acquired so far is released, a
    /// [`Notice::SessionError`] is emitted and the state returns to `Idle`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` or `DeviceUnavailable`
    pub async fn open(
        connector: &dyn Connector,
        devices: &dyn AudioDevices,
        request: &ConnectRequest,
        config: SessionConfig,
        state: watch::Sender<SessionState>,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Result<Self> {
        let session_id = Uuid::new_v4();
        let mut cell = StateCell {
            session_id,
            state: SessionState::Idle,
            watch: state,
            notices,
        };
        cell.apply(Transition::Start);

        let mut transport = match connector.connect(request).await {
            Ok(transport) => transport,
            Err(e) => {
                cell.fail_start(&e);
                return Err(e);
            }
        };

        let sample_rate = config.capture.sample_rate;
        let acquired = devices.open_input(sample_rate).and_then(|mut source| {
            match devices.open_output(sample_rate) {
                Ok(sink) => Ok((source, sink)),
                Err(e) => {
                    source.release();
                    Err(e)
                }
            }
        });

        let (source, sink) = match acquired {
            Ok(pair) => pair,
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    tracing::debug!(error = %close_err, "close after failed start");
                }
                cell.fail_start(&e);
                return Err(e);
            }
        };

        cell.apply(Transition::Opened);
        tracing::info!(session_id = %session_id, mode = ?request.mode, "voice session active");

        Ok(Self {
            cell,
            config,
            transport,
            source: Some(source),
            sink: Some(sink),
            scheduler: PlaybackScheduler::new(sample_rate, config.lead_window),
            latency: LatencyTracker::new(),
            frames_sent: 0,
        })
    }

    /// Session identifier used in logs
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.cell.session_id
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.cell.state
    }

    /// Stream until `stop` is set, the connection closes, or a fault occurs
    ///
    /// Always drains before returning.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> SessionReport {
        let backlog = self.config.capture.max_backlog_frames.max(1);
        let (frame_tx, mut frame_rx) = mpsc::channel::<AudioFrame>(backlog);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let capture = self.source.take().map(|source| {
            let pipeline = CapturePipeline::new(self.config.capture);
            tokio::spawn(pipeline.run(source, frame_tx, cancel_rx))
        });

        let exit = if *stop.borrow_and_update() {
            Exit::Stopped
        } else {
            loop {
                tokio::select! {
                    biased;
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break Exit::Stopped;
                        }
                    }
                    frame = frame_rx.recv() => {
                        let Some(frame) = frame else {
                            // Capture ended on its own; its result says why
                            break Exit::Fault("capture stopped unexpectedly".to_string());
                        };
                        // A stalled send must not hold off stop
                        tokio::select! {
                            biased;
                            () = stop_requested(&mut stop) => break Exit::Stopped,
                            sent = self.send_frame(&frame) => {
                                if let Err(e) = sent {
                                    break Exit::Fault(e.to_string());
                                }
                            }
                        }
                    }
                    inbound = self.transport.recv() => {
                        match inbound {
                            Some(Ok(text)) => {
                                if let Some(exit) = self.dispatch(&text) {
                                    break exit;
                                }
                            }
                            Some(Err(e)) if !e.is_terminal() => {
                                tracing::warn!(session_id = %self.id(), error = %e, "dropping malformed message");
                            }
                            Some(Err(e)) => break Exit::Fault(e.to_string()),
                            None => break Exit::Closed,
                        }
                    }
                }
            }
        };

        // Unblock a capture task waiting on a full channel
        drop(frame_rx);
        let _ = cancel_tx.send(true);
        let capture_error = self.stop_capture(capture).await;

        let reason = match (exit, capture_error) {
            (Exit::Fault(message), Some(device)) => {
                EndReason::Failed(format!("{message}: {device}"))
            }
            (Exit::Fault(message), None) => EndReason::Failed(message),
            (Exit::Stopped, _) => EndReason::Stopped,
            (Exit::Closed, _) => EndReason::RemoteClosed,
        };

        if let EndReason::Failed(message) = &reason {
            tracing::error!(session_id = %self.id(), error = %message, "voice session failed");
            self.cell.notify(Notice::SessionError(message.clone()));
            self.cell.apply(Transition::Fault);
        }

        self.drain(&reason).await;

        SessionReport {
            session_id: self.id(),
            reason,
            frames_sent: self.frames_sent,
            segments_scheduled: self.scheduler.scheduled(),
            latency: self.latency.report(),
        }
    }

    async fn send_frame(&mut self, frame: &AudioFrame) -> Result<()> {
        let text = ClientMessage::append(frame).to_json()?;
        self.transport.send(text).await?;
        self.frames_sent += 1;
        tracing::trace!(sequence = frame.sequence, samples = frame.sample_count(), "frame sent");
        Ok(())
    }

    /// Dispatch one inbound message; returns an exit if the session must end
    fn dispatch(&mut self, text: &str) -> Option<Exit> {
        let events = match decode_events(text) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(session_id = %self.id(), error = %e, "dropping malformed message");
                return None;
            }
        };

        for event in events {
            match event {
                TurnEvent::UserSpeechStarted => {
                    tracing::debug!(session_id = %self.id(), "user speech started");
                }
                TurnEvent::UserSpeechStopped => {
                    tracing::debug!(session_id = %self.id(), "user speech stopped");
                    self.latency.on_user_stopped(Instant::now());
                }
                TurnEvent::OutputAudioDelta(pcm) => self.play(&pcm),
                TurnEvent::OutputAudioDone => self.cell.notify(Notice::ResponseDone),
                TurnEvent::Transcript { role, text } => {
                    tracing::debug!(session_id = %self.id(), %role, "transcript");
                    self.cell.notify(Notice::Transcript(TranscriptLine {
                        role,
                        text,
                        at: Utc::now(),
                    }));
                }
                TurnEvent::SessionError(message) => return Some(Exit::Fault(message)),
            }
        }

        None
    }

    /// Decode a delta and hand it to the scheduler
    fn play(&mut self, pcm: &[u8]) {
        if !self.cell.state.is_active() {
            return;
        }

        let arrived = Instant::now();

        if pcm.len() % codec::BYTES_PER_SAMPLE != 0 {
            tracing::debug!(bytes = pcm.len(), "audio delta has a trailing odd byte");
        }
        let samples = codec::decode(pcm);

        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let Some(segment) = self.scheduler.schedule(samples.len(), sink.now()) else {
            return;
        };

        // Only audible audio ends the turn's wait
        if self.latency.on_first_output_audio(arrived).is_some() {
            if let Some(report) = self.latency.report() {
                self.cell.notify(Notice::Latency(report));
            }
        }

        if let Err(e) = sink.enqueue(segment.start, samples) {
            tracing::warn!(session_id = %self.cell.session_id, error = %e, "failed to queue audio");
        } else {
            tracing::trace!(
                start_ms = segment.start.as_millis(),
                duration_ms = segment.duration.as_millis(),
                "segment scheduled"
            );
        }
    }

    /// Wait for the capture task and release the microphone
    ///
    /// Returns the device error if capture failed.
    async fn stop_capture(
        &mut self,
        capture: Option<JoinHandle<(Box<dyn AudioSource>, Result<()>)>>,
    ) -> Option<String> {
        let handle = capture?;
        match handle.await {
            Ok((mut source, result)) => {
                source.release();
                result.err().map(|e| e.to_string())
            }
            Err(e) => {
                // The source was dropped with the task, which releases it
                tracing::error!(session_id = %self.id(), error = %e, "capture task failed");
                Some(e.to_string())
            }
        }
    }

    /// Release playback and the connection, then mark the session drained
    async fn drain(&mut self, reason: &EndReason) {
        self.scheduler.release();

        if let Some(mut sink) = self.sink.take() {
            sink.release();
        }
        if let Some(mut source) = self.source.take() {
            source.release();
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, self.transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(session_id = %self.id(), error = %e, "error closing connection");
            }
            Err(_) => {
                tracing::warn!(session_id = %self.id(), "connection close timed out");
            }
        }

        let transition = match reason {
            EndReason::Stopped => Transition::Stop,
            EndReason::RemoteClosed | EndReason::Failed(_) => Transition::ConnectionClosed,
        };
        self.cell.apply(transition);

        tracing::info!(
            session_id = %self.id(),
            frames_sent = self.frames_sent,
            segments = self.scheduler.scheduled(),
            ?reason,
            "voice session drained"
        );
    }
}

/// Resolves once stop is set or its sender is gone
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}
