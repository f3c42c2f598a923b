//! Peer transport contracts
//!
//! The controller drives a transport it does not implement. A transport opens
//! one session per room and reports roster changes and teardown through
//! [`TransportEvents`].

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::store::RecordStore;

/// Options a session is opened with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Signaling endpoints, in order of preference
    pub signaling: Vec<String>,
}

/// Events reported by an open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Current roster of the room
    ///
    /// The peer count is the length of both lists together.
    Peers {
        /// Ids of peers reached over a direct connection
        direct: Vec<String>,
        /// Ids of peers reached through a relay
        relay: Vec<String>,
    },
    /// The transport closed the session on its own
    Closed,
}

/// Sender half handed to a transport when a session is opened
///
/// Events carry the generation of the session they belong to, so events of a
/// session that has since been replaced can be told apart.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl TransportEvents {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Report an event; silently dropped once the controller is gone
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send((self.generation, event));
    }
}

/// A live peer session
pub trait TransportSession: Send {
    /// Signaling endpoints the session was opened with
    fn signaling_urls(&self) -> &[String];

    /// Whether the session is still connected
    fn is_connected(&self) -> bool;

    /// Leave the room; peers stop seeing this session
    fn leave_room(&mut self);

    /// Close the transport and release its resources
    fn close(&mut self);
}

/// Factory for peer sessions
pub trait PeerTransport: Send + Sync {
    /// Open a session in `room`, sharing the document held by `store`
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` if the session cannot be established.
    fn open(
        &self,
        room: &str,
        store: &RecordStore,
        options: TransportOptions,
        events: TransportEvents,
    ) -> Result<Box<dyn TransportSession>, TransportError>;
}
