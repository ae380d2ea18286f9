//! Session lifecycle controller
//!
//! Owns at most one duplex session. Once a session drains, the controller
//! waits out a grace window so the remote side can persist the conversation,
//! then lists conversations and emits [`Notice::Refreshed`]. A new session
//! cannot start until that has happened.

use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::api::{ConversationService, OnboardingOutcome};
use crate::config::{Config, SessionTiming};
use crate::realtime::{
    ConnectRequest, Connector, DuplexSession, Notice, SessionConfig, SessionMode, SessionReport,
    SessionState, WsConnector,
};
use crate::voice::{AudioDevices, SystemAudio};
use crate::{Error, Result};

/// Where sessions connect to
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// WebSocket base URL
    pub ws_url: Url,
    /// Bearer token
    pub token: SecretString,
}

struct LiveSession {
    mode: SessionMode,
    stop: watch::Sender<bool>,
    supervisor: JoinHandle<SessionReport>,
}

/// Starts and stops duplex sessions
pub struct SessionController {
    connector: Arc<dyn Connector>,
    devices: Arc<dyn AudioDevices>,
    service: Arc<dyn ConversationService>,
    endpoint: Endpoint,
    session_config: SessionConfig,
    timing: SessionTiming,
    state: watch::Sender<SessionState>,
    notices: mpsc::UnboundedSender<Notice>,
    live: Option<LiveSession>,
}

impl SessionController {
    /// Create a controller; notices are delivered on the returned receiver
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        devices: Arc<dyn AudioDevices>,
        service: Arc<dyn ConversationService>,
        endpoint: Endpoint,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Idle);
        let controller = Self {
            connector,
            devices,
            service,
            endpoint,
            session_config: SessionConfig::default(),
            timing: SessionTiming::default(),
            state,
            notices,
            live: None,
        };
        (controller, notice_rx)
    }

    /// Build a controller backed by the system audio devices and WebSocket
    ///
    /// # Errors
    ///
    /// Returns `Config` if the token or user id is missing
    pub fn from_config(config: &Config) -> Result<(Self, mpsc::UnboundedReceiver<Notice>)> {
        let service = Arc::new(config.conversation_client()?);
        let request = config.connect_request(SessionMode::Conversation)?;
        let (controller, notices) = Self::new(
            Arc::new(WsConnector::default()),
            Arc::new(SystemAudio),
            service,
            Endpoint {
                ws_url: request.ws_url,
                token: request.token,
            },
        );
        Ok((
            controller
                .with_session_config(config.session_config())
                .with_timing(config.session),
            notices,
        ))
    }

    /// Override audio and scheduling settings
    #[must_use]
    pub const fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Override grace windows
    #[must_use]
    pub const fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Whether a session is live or its grace window is outstanding
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| !live.supervisor.is_finished())
    }

    /// Start a session
    ///
    /// # Errors
    ///
    /// Returns `SessionBusy` while a previous session is live or in its grace
    /// window, otherwise `ConnectionFailed` or `DeviceUnavailable` if the
    /// session could not be opened
    pub async fn start(&mut self, mode: SessionMode) -> Result<()> {
        if let Some(live) = &self.live {
            if !live.supervisor.is_finished() {
                let reason = if self.state().is_terminal() {
                    "previous session is still saving"
                } else {
                    "a session is already running"
                };
                return Err(Error::SessionBusy(reason.to_string()));
            }
        }
        self.live = None;

        let request = ConnectRequest {
            ws_url: self.endpoint.ws_url.clone(),
            token: self.endpoint.token.clone(),
            mode,
        };
        let session = DuplexSession::open(
            self.connector.as_ref(),
            self.devices.as_ref(),
            &request,
            self.session_config,
            self.state.clone(),
            self.notices.clone(),
        )
        .await?;

        let (stop, stop_rx) = watch::channel(false);
        let grace = self.timing.grace_for(mode);
        let service = Arc::clone(&self.service);
        let notices = self.notices.clone();

        let supervisor = tokio::spawn(async move {
            let report = session.run(stop_rx).await;

            tokio::time::sleep(grace).await;
            refresh(service.as_ref(), mode, &notices).await;

            report
        });

        self.live = Some(LiveSession {
            mode,
            stop,
            supervisor,
        });
        Ok(())
    }

    /// Stop the live session and wait until it has drained
    ///
    /// Calling this with no live session, or twice, is a no-op.
    pub async fn stop(&mut self) {
        let Some(live) = &self.live else {
            return;
        };
        if live.supervisor.is_finished() {
            return;
        }

        tracing::debug!(mode = ?live.mode, "stopping voice session");
        let _ = live.stop.send(true);

        let mut state = self.state.subscribe();
        // The sender lives in self, so this only ends once drained
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }

    /// Wait for the live session, its grace window, and the refresh
    ///
    /// Returns the session report, or `None` if no session was started.
    pub async fn join(&mut self) -> Option<SessionReport> {
        let live = self.live.take()?;
        match live.supervisor.await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "session supervisor failed");
                None
            }
        }
    }

    /// Mark an onboarding conversation as complete
    ///
    /// # Errors
    ///
    /// Returns error if the conversation service rejects the request
    pub async fn complete_onboarding(&self, conversation_id: i64) -> Result<OnboardingOutcome> {
        self.service.complete_onboarding(conversation_id).await
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            let _ = live.stop.send(true);
        }
    }
}

async fn refresh(
    service: &dyn ConversationService,
    mode: SessionMode,
    notices: &mpsc::UnboundedSender<Notice>,
) {
    let latest = match service.list_conversations().await {
        Ok(conversations) => conversations.into_iter().next(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to refresh conversations");
            None
        }
    };

    if let Some(conversation) = &latest {
        tracing::debug!(conversation_id = conversation.id, ?mode, "latest conversation");
    }

    let _ = notices.send(Notice::Refreshed { mode, latest });
}
