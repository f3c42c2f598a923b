//! In-process peer transport
//!
//! Sessions opened on the same [`LocalHub`] and room exchange their full
//! document state when one joins, then see each other in their roster. Used
//! by the `serve` command for local replicas and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::transport::{
    PeerTransport, TransportEvent, TransportEvents, TransportOptions, TransportSession,
};
use crate::error::TransportError;
use crate::store::RecordStore;

struct Member {
    id: u64,
    signaling: Vec<String>,
    store: RecordStore,
    events: TransportEvents,
}

#[derive(Default)]
struct HubState {
    rooms: HashMap<String, Vec<Member>>,
}

/// Shared in-process rendezvous point
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
    next_id: Arc<AtomicU64>,
    require_signaling: bool,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub that rejects sessions opened without a signaling endpoint
    pub fn requiring_signaling() -> Self {
        Self {
            require_signaling: true,
            ..Self::default()
        }
    }

    /// Number of sessions currently in `room`
    pub fn members(&self, room: &str) -> usize {
        self.state.lock().rooms.get(room).map_or(0, Vec::len)
    }

    /// Close every session in `room` from the transport side
    pub fn close_room(&self, room: &str) {
        let members = self.state.lock().rooms.remove(room).unwrap_or_default();
        info!(room, members = members.len(), "Closing room");
        for member in members {
            member.events.emit(TransportEvent::Closed);
        }
    }

    fn leave(&self, room: &str, id: u64) {
        let mut state = self.state.lock();
        let empty = match state.rooms.get_mut(room) {
            Some(members) => {
                members.retain(|m| m.id != id);
                announce(members);
                members.is_empty()
            }
            None => false,
        };
        if empty {
            state.rooms.remove(room);
        }
    }
}

/// Send every member its view of the roster
fn announce(members: &[Member]) {
    for member in members {
        let (mut direct, mut relay) = (Vec::new(), Vec::new());
        for other in members.iter().filter(|o| o.id != member.id) {
            let shared = other.signaling.iter().any(|url| member.signaling.contains(url));
            if shared {
                direct.push(other.id.to_string());
            } else {
                relay.push(other.id.to_string());
            }
        }
        member.events.emit(TransportEvent::Peers { direct, relay });
    }
}

/// Merge two replicas in both directions
fn exchange(joining: &RecordStore, member: &RecordStore) {
    let ours = joining.save_bytes();
    let theirs = member.save_bytes();
    if let Err(e) = member.apply_remote(&ours) {
        warn!(error = %e, "Peer rejected joining state");
    }
    if let Err(e) = joining.apply_remote(&theirs) {
        warn!(error = %e, "Could not merge peer state");
    }
}

impl PeerTransport for LocalHub {
    fn open(
        &self,
        room: &str,
        store: &RecordStore,
        options: TransportOptions,
        events: TransportEvents,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        if room.is_empty() {
            return Err(TransportError::Rejected("empty room".to_string()));
        }
        if self.require_signaling && options.signaling.is_empty() {
            return Err(TransportError::NoSignaling);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let members = state.rooms.entry(room.to_string()).or_default();
        for member in members.iter() {
            exchange(store, &member.store);
        }
        members.push(Member {
            id,
            signaling: options.signaling.clone(),
            store: store.clone(),
            events,
        });
        debug!(room, id, members = members.len(), "Joined room");
        announce(members);

        Ok(Box::new(LocalSession {
            hub: self.clone(),
            room: room.to_string(),
            id,
            signaling: options.signaling,
            joined: true,
            open: true,
        }))
    }
}

/// Session on a [`LocalHub`]
pub struct LocalSession {
    hub: LocalHub,
    room: String,
    id: u64,
    signaling: Vec<String>,
    joined: bool,
    open: bool,
}

impl TransportSession for LocalSession {
    fn signaling_urls(&self) -> &[String] {
        &self.signaling
    }

    fn is_connected(&self) -> bool {
        self.open
    }

    fn leave_room(&mut self) {
        if self.joined {
            self.joined = false;
            self.hub.leave(&self.room, self.id);
        }
    }

    fn close(&mut self) {
        self.leave_room();
        self.open = false;
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        self.close();
    }
}
