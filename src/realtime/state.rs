//! Duplex session state machine

use serde::Serialize;

/// Lifecycle phase of a duplex session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection
    #[default]
    Idle,
    /// Connection and devices being acquired
    Connecting,
    /// Streaming in both directions
    Active,
    /// A fault occurred; tearing down
    Closing,
    /// Devices and connection released
    Drained,
}

/// Event that drives a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// User asked to start a session
    Start,
    /// Connection open and devices acquired
    Opened,
    /// Connection or device acquisition failed
    StartFailed,
    /// The remote side or the transport reported an error
    Fault,
    /// User asked to stop
    Stop,
    /// The connection closed
    ConnectionClosed,
}

impl SessionState {
    /// Apply `transition`, returning the next state if it is allowed
    #[must_use]
    pub const fn next(self, transition: Transition) -> Option<Self> {
        use SessionState::{Active, Closing, Connecting, Drained, Idle};
        use Transition::{ConnectionClosed, Fault, Opened, Start, StartFailed, Stop};

        match (self, transition) {
            (Idle, Start) => Some(Connecting),
            (Connecting, Opened) => Some(Active),
            (Connecting, StartFailed | Fault) => Some(Idle),
            (Active, Fault) => Some(Closing),
            (Active | Closing, Stop | ConnectionClosed) => Some(Drained),
            // Stopping twice, or after the connection closed, changes nothing
            (Drained, Stop | ConnectionClosed | Fault) | (Closing, Fault) => Some(self),
            _ => None,
        }
    }

    /// Whether audio may flow in either direction
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether the session has finished releasing its resources
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Drained)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
            Self::Closing => write!(f, "closing"),
            Self::Drained => write!(f, "drained"),
        }
    }
}
