//! Realtime duplex voice session
//!
//! One WebSocket carries captured audio out and synthesized speech plus
//! turn-taking signals back.

pub mod protocol;
mod session;
mod state;
mod transport;

pub use protocol::{ClientMessage, Role, ServerMessage, TurnEvent, decode_events};
pub use session::{
    DuplexSession, EndReason, Notice, SessionConfig, SessionReport, TranscriptLine,
};
pub use state::{SessionState, Transition};
pub use transport::{ConnectRequest, Connector, SessionMode, Transport, WsConnector, WsTransport};
