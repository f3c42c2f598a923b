//! Peer connectivity
//!
//! Connectivity intent is part of the replicated record: every replica reads
//! `user.preferences.webRTC` and the [`ConnectivityController`] opens or closes
//! its peer session to match. The transport itself sits behind
//! [`PeerTransport`]; [`LocalHub`] is an in-process implementation.

mod controller;
mod local;
mod status;
mod transport;

pub use controller::ConnectivityController;
pub use local::{LocalHub, LocalSession};
pub use status::ConnectionState;
pub use transport::{PeerTransport, TransportEvent, TransportEvents, TransportOptions, TransportSession};
