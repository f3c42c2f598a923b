//! Connection status reported by the controller

use std::fmt;

/// Connection state of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No peer session is open
    Disconnected,
    /// A peer session is open
    Connected {
        /// Signaling endpoints the session was opened with
        signaling: Vec<String>,
    },
    /// The last connection attempt failed; retried once preferences change
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connected { signaling } if signaling.is_empty() => {
                write!(f, "Connected (no signaling)")
            }
            ConnectionState::Connected { signaling } => {
                write!(f, "Connected via {}", signaling.join(", "))
            }
            ConnectionState::Failed(msg) => write!(f, "Failed: {}", msg),
        }
    }
}
