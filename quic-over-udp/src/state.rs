//! Connection finite-state machine (FSM) types.
//!
//! Transitions are driven by [`crate::connection::Connection`]; this module
//! only names the phases.
//!
//! ```text
//!  IDLE ──connect──▶ HANDSHAKING ──accept rcvd──▶ ESTABLISHED
//!                         │                            │
//!                 retries │                   close /  │
//!               exhausted │                  peer FIN  │
//!                         ▼                            ▼
//!                      FAILED ◀──── fatal ──────── CLOSING
//!                                                      │
//!                                    FINs acked or     │
//!                                    close timeout     ▼
//!                                                   CLOSED
//! ```
//!
//! A listening endpoint also starts in `Idle` and jumps straight to
//! `Established` when a valid handshake initial arrives.

/// All possible phases of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing sent or received yet.
    #[default]
    Idle,
    /// Handshake initial sent; waiting for the accept.
    Handshaking,
    /// Data transfer in progress.
    Established,
    /// Every stream has been finished locally; waiting for the final ACKs.
    Closing,
    /// Orderly shutdown complete.
    Closed,
    /// Unrecoverable fault; see `Connection::error`.
    Failed,
}

impl ConnectionState {
    /// `Closed` and `Failed` are never left.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Phases in which stream data moves.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Established | Self::Closing)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
