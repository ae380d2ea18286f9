//! Voxlink - realtime voice conversation client
//!
//! Streams microphone audio to a voice model over a WebSocket and plays the
//! synthesized reply gaplessly while it is still arriving.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌──────────────────┐  text   ┌──────────────┐
//! │   Capture    ├──────────►│  Duplex session  │◄───────►│  Voice model │
//! │   pipeline   │           │  (state machine) │  (ws)   │   endpoint   │
//! └──────────────┘           └───┬──────────┬───┘         └──────────────┘
//!                                │          │
//!                     ┌──────────▼───┐  ┌───▼──────────┐
//!                     │   Playback   │  │   Latency    │
//!                     │   scheduler  │  │   tracker    │
//!                     └──────────────┘  └──────────────┘
//! ```
//!
//! The [`SessionController`] owns at most one session and refreshes
//! conversation data over REST once a session's grace window elapses.

pub mod api;
pub mod config;
pub mod error;
pub mod latency;
pub mod lifecycle;
pub mod realtime;
pub mod voice;

pub use api::{ConversationClient, ConversationService, ConversationSummary, OnboardingOutcome};
pub use config::Config;
pub use error::{Error, Result};
pub use latency::{LatencyReport, LatencySample, LatencyTracker};
pub use lifecycle::{Endpoint, SessionController};
pub use realtime::{
    ConnectRequest, Connector, DuplexSession, EndReason, Notice, SessionConfig, SessionMode,
    SessionReport, SessionState, Transport, TurnEvent, WsConnector,
};
