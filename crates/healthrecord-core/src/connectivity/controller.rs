//! Connectivity controller
//!
//! Follows the document's `user.preferences.webRTC` record and keeps at most
//! one peer session open to match it. The controller never acts on direct
//! calls: every transition is a reaction to a document or transport
//! notification, and every reaction re-reads the whole preference record, so
//! redundant or dropped notifications cannot double-create or leak sessions.
//!
//! ```text
//!               enabled := true
//!  Disconnected ───────────────────▶ Connected
//!       ▲  ◀─────────────────────────  │   │
//!       │      enabled := false        │   │ signalerUrl := <new url>
//!       │                              │   ▼
//!       │   transport error            │  disconnect + connect
//!       └── (no retry until prefs      │
//!            change)                   └─ Closed / Replaced: tear down,
//!                                         re-subscribe, re-evaluate
//! ```

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::status::ConnectionState;
use super::transport::{
    PeerTransport, TransportEvent, TransportEvents, TransportOptions, TransportSession,
};
use crate::config::ConnectivityConfig;
use crate::error::RecordResult;
use crate::store::{DocEvent, RecordStore};
use crate::types::WebRtcPreferences;

struct ActiveSession {
    generation: u64,
    session: Box<dyn TransportSession>,
}

/// Drives a [`PeerTransport`] from the preferences stored in the record
pub struct ConnectivityController<T: PeerTransport> {
    store: RecordStore,
    transport: T,
    config: ConnectivityConfig,
    doc_events: broadcast::Receiver<DocEvent>,
    transport_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    transport_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    session: Option<ActiveSession>,
    generation: u64,
    failed_with: Option<WebRtcPreferences>,
    peers: watch::Sender<usize>,
    state: watch::Sender<ConnectionState>,
}

impl<T: PeerTransport> ConnectivityController<T> {
    /// Create a controller and subscribe it to `store`
    ///
    /// Nothing happens until the first notification is handled.
    pub fn new(store: RecordStore, transport: T, config: ConnectivityConfig) -> Self {
        let doc_events = store.subscribe();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (peers, _) = watch::channel(0);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            store,
            transport,
            config,
            doc_events,
            transport_tx,
            transport_rx,
            session: None,
            generation: 0,
            failed_with: None,
            peers,
            state,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Whether a peer session is open
    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|active| active.session.is_connected())
    }

    /// Watch the number of peers in the room, direct plus relayed
    pub fn peer_count(&self) -> watch::Receiver<usize> {
        self.peers.subscribe()
    }

    /// The transport the controller drives
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Handle every queued notification without waiting
    ///
    /// Returns the number of notifications handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.doc_events.try_recv() {
                Ok(event) => {
                    self.handle_doc_event(event);
                    handled += 1;
                    continue;
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.handle_lag(skipped);
                    handled += 1;
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => {}
            }
            match self.transport_rx.try_recv() {
                Ok((generation, event)) => {
                    self.handle_transport_event(generation, event);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        handled
    }

    /// Handle notifications as they arrive
    ///
    /// Runs until the store stops publishing. Cancel-safe: dropping the
    /// future between notifications loses nothing.
    pub async fn run(&mut self) {
        info!("Connectivity controller running");
        loop {
            tokio::select! {
                event = self.doc_events.recv() => {
                    match event {
                        Ok(event) => self.handle_doc_event(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => self.handle_lag(skipped),
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Document events closed");
                            break;
                        }
                    }
                }
                Some((generation, event)) = self.transport_rx.recv() => {
                    self.handle_transport_event(generation, event);
                }
            }
        }
    }

    fn handle_doc_event(&mut self, event: DocEvent) {
        match event {
            DocEvent::Updated { origin } => {
                debug!(?origin, "Document updated");
                self.evaluate();
            }
            DocEvent::Replaced => {
                info!("Document replaced, rebuilding peer session");
                self.disconnect();
                self.rearm();
                self.evaluate();
            }
            DocEvent::Unloaded => {
                info!("Record unloaded");
                self.disconnect();
            }
        }
    }

    fn handle_lag(&mut self, skipped: u64) {
        warn!(skipped, "Missed document notifications, re-evaluating");
        self.evaluate();
    }

    fn handle_transport_event(&mut self, generation: u64, event: TransportEvent) {
        if self.session.as_ref().map(|active| active.generation) != Some(generation) {
            debug!(generation, ?event, "Ignoring event from a closed session");
            return;
        }
        match event {
            TransportEvent::Peers { direct, relay } => {
                let peers = direct.len() + relay.len();
                debug!(
                    direct = direct.len(),
                    relay = relay.len(),
                    peers,
                    "Peer roster changed"
                );
                self.peers.send_replace(peers);
            }
            TransportEvent::Closed => {
                info!(generation, "Transport closed the session");
                self.disconnect();
                self.rearm();
                self.evaluate();
            }
        }
    }

    fn rearm(&mut self) {
        self.doc_events = self.store.subscribe();
    }

    /// Bring the session in line with the stored preferences
    fn evaluate(&mut self) {
        if self.store.current().is_none() {
            debug!("No current record");
            return;
        }
        let read = self
            .store
            .read(|doc| -> RecordResult<_> { Ok((doc.webrtc_preferences()?, doc.id()?)) });
        let (prefs, room) = match read {
            Ok(read) => read,
            Err(e) => {
                warn!(error = %e, "Could not read connectivity preferences, disconnecting");
                self.disconnect();
                return;
            }
        };
        let Some(prefs) = prefs else {
            debug!("Record has no connectivity preferences");
            return;
        };

        if !prefs.enabled {
            self.failed_with = None;
            if self.session.is_some() {
                info!("Peer connectivity disabled");
            }
            self.disconnect();
            return;
        }

        let reconnect = match &self.session {
            None => true,
            Some(active) if !active.session.is_connected() => {
                debug!("Peer session went away");
                true
            }
            Some(active) => match prefs.signaler() {
                Some(url) if !active.session.signaling_urls().iter().any(|u| u == url) => {
                    info!(signaler = url, "Signaler changed, reconnecting");
                    true
                }
                _ => false,
            },
        };
        if !reconnect {
            return;
        }
        if self.session.is_none() && self.failed_with.as_ref() == Some(&prefs) {
            debug!("Preferences unchanged since the last failed attempt");
            return;
        }

        self.disconnect();
        self.connect(&prefs, &room);
    }

    fn connect(&mut self, prefs: &WebRtcPreferences, room: &str) {
        if self.is_connected() {
            return;
        }
        if room.is_empty() {
            warn!("Record has no id to use as room, staying disconnected");
            return;
        }

        let signaling = self.config.resolve_signaling(prefs);
        self.generation += 1;
        let events = TransportEvents::new(self.generation, self.transport_tx.clone());
        let options = TransportOptions {
            signaling: signaling.clone(),
        };

        match self.transport.open(room, &self.store, options, events) {
            Ok(session) => {
                info!(room, generation = self.generation, ?signaling, "Peer session opened");
                self.session = Some(ActiveSession {
                    generation: self.generation,
                    session,
                });
                self.failed_with = None;
                self.state.send_replace(ConnectionState::Connected { signaling });
            }
            Err(e) => {
                warn!(room, error = %e, "Failed to open peer session");
                self.failed_with = Some(prefs.clone());
                self.state.send_replace(ConnectionState::Failed(e.to_string()));
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(mut active) = self.session.take() {
            active.session.leave_room();
            active.session.close();
            info!(generation = active.generation, "Peer session closed");
        }
        self.state.send_if_modified(|state| {
            let changed = *state != ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            changed
        });
        self.peers.send_if_modified(|count| std::mem::replace(count, 0) != 0);
    }
}

impl<T: PeerTransport> Drop for ConnectivityController<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::store::UpdateOrigin;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    const V3: &str = r#"{"version":"3","id":"rec",
        "user":{"firstName":"Ada","lastName":"Lovelace",
                "preferences":{"webRTC":{"enabled":false,"signalerUrl":null}}},
        "people":[],"vitals":[],"measurements":[]}"#;

    #[derive(Clone, Default)]
    struct Recorder {
        opened: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
        last_events: Arc<Mutex<Option<TransportEvents>>>,
        last_options: Arc<Mutex<Option<TransportOptions>>>,
    }

    struct RecordedSession {
        urls: Vec<String>,
        live: Arc<AtomicUsize>,
        open: bool,
    }

    impl TransportSession for RecordedSession {
        fn signaling_urls(&self) -> &[String] {
            &self.urls
        }

        fn is_connected(&self) -> bool {
            self.open
        }

        fn leave_room(&mut self) {}

        fn close(&mut self) {
            if self.open {
                self.open = false;
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    impl PeerTransport for Recorder {
        fn open(
            &self,
            _room: &str,
            _store: &RecordStore,
            options: TransportOptions,
            events: TransportEvents,
        ) -> Result<Box<dyn TransportSession>, TransportError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Rejected("refused".into()));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            *self.last_events.lock() = Some(events);
            *self.last_options.lock() = Some(options.clone());
            Ok(Box::new(RecordedSession {
                urls: options.signaling,
                live: self.live.clone(),
                open: true,
            }))
        }
    }

    fn setup() -> (RecordStore, ConnectivityController<Recorder>, Recorder) {
        let store = RecordStore::new().unwrap();
        let recorder = Recorder::default();
        let controller = ConnectivityController::new(
            store.clone(),
            recorder.clone(),
            ConnectivityConfig::with_dev_signaler("ws://dev"),
        );
        store.load(V3).unwrap();
        (store, controller, recorder)
    }

    fn set(store: &RecordStore, enabled: Option<bool>, url: Option<Option<&str>>) {
        store
            .update(UpdateOrigin::Local, |doc| doc.set_webrtc(enabled, url))
            .unwrap();
    }

    #[test]
    fn test_disabled_record_opens_nothing() {
        let (_store, mut controller, recorder) = setup();
        controller.pump();
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 0);
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_enable_opens_one_session() {
        let (store, mut controller, recorder) = setup();
        set(&store, Some(true), None);
        controller.pump();

        assert!(controller.is_connected());
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 1);
        assert_eq!(
            recorder.last_options.lock().clone().unwrap().signaling,
            vec!["ws://dev".to_string()]
        );

        // Redundant notifications are no-ops
        store.update(UpdateOrigin::Local, |_| Ok(())).unwrap();
        store.update(UpdateOrigin::Remote, |_| Ok(())).unwrap();
        controller.pump();
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_toggling_never_leaks_sessions() {
        let (store, mut controller, recorder) = setup();
        for enabled in [true, false, true, false, true] {
            set(&store, Some(enabled), None);
        }
        controller.pump();
        assert_eq!(recorder.live.load(Ordering::SeqCst), 1);

        for enabled in [false, true, false] {
            set(&store, Some(enabled), None);
            controller.pump();
            assert!(recorder.live.load(Ordering::SeqCst) <= 1);
        }
        assert_eq!(recorder.live.load(Ordering::SeqCst), 0);
        assert_eq!(*controller.peer_count().borrow(), 0);
    }

    #[test]
    fn test_new_signaler_reconnects() {
        let (store, mut controller, recorder) = setup();
        set(&store, Some(true), Some(Some("wss://one")));
        controller.pump();
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 1);

        set(&store, None, Some(Some("wss://two")));
        controller.pump();
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.live.load(Ordering::SeqCst), 1);
        assert_eq!(
            controller.state(),
            ConnectionState::Connected {
                signaling: vec!["wss://two".to_string()]
            }
        );

        // Same url again does nothing
        set(&store, None, Some(Some("wss://two")));
        controller.pump();
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clearing_signaler_keeps_session() {
        let (store, mut controller, recorder) = setup();
        set(&store, Some(true), Some(Some("wss://one")));
        controller.pump();
        set(&store, None, Some(None));
        controller.pump();
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 1);
        assert!(controller.is_connected());
    }

    #[test]
    fn test_peer_count_sums_direct_and_relay() {
        let (store, mut controller, recorder) = setup();
        let mut peers = controller.peer_count();
        set(&store, Some(true), None);
        controller.pump();

        let events = recorder.last_events.lock().clone().unwrap();
        events.emit(TransportEvent::Peers {
            direct: vec!["a".into(), "b".into()],
            relay: vec!["c".into()],
        });
        controller.pump();
        assert!(peers.has_changed().unwrap());
        assert_eq!(*peers.borrow_and_update(), 3);

        set(&store, Some(false), None);
        controller.pump();
        assert_eq!(*peers.borrow(), 0);
    }

    #[test]
    fn test_stale_session_events_ignored() {
        let (store, mut controller, recorder) = setup();
        set(&store, Some(true), Some(Some("wss://one")));
        controller.pump();
        let stale = recorder.last_events.lock().clone().unwrap();

        set(&store, None, Some(Some("wss://two")));
        controller.pump();
        stale.emit(TransportEvent::Closed);
        stale.emit(TransportEvent::Peers {
            direct: vec!["x".into()],
            relay: vec![],
        });
        controller.pump();

        assert!(controller.is_connected());
        assert_eq!(*controller.peer_count().borrow(), 0);
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_closed_session_rearms() {
        let (store, mut controller, recorder) = setup();
        set(&store, Some(true), None);
        controller.pump();

        let events = recorder.last_events.lock().clone().unwrap();
        events.emit(TransportEvent::Closed);
        controller.pump();
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.live.load(Ordering::SeqCst), 1);

        // Still following the document afterwards
        set(&store, Some(false), None);
        controller.pump();
        assert!(!controller.is_connected());
        assert_eq!(recorder.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unreadable_preferences_close_session() {
        let (store, mut controller, recorder) = setup();
        set(&store, Some(true), None);
        controller.pump();
        assert!(controller.is_connected());

        store
            .update(UpdateOrigin::Remote, |doc| {
                doc.set_preferences_value(&serde_json::json!({"webRTC": {"enabled": "yes"}}))
            })
            .unwrap();
        controller.pump();
        assert!(!controller.is_connected());
        assert_eq!(recorder.live.load(Ordering::SeqCst), 0);
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_failure_waits_for_new_preferences() {
        let (store, mut controller, recorder) = setup();
        recorder.fail.store(true, Ordering::SeqCst);
        set(&store, Some(true), None);
        controller.pump();
        assert!(matches!(controller.state(), ConnectionState::Failed(_)));

        recorder.fail.store(false, Ordering::SeqCst);
        store.update(UpdateOrigin::Local, |_| Ok(())).unwrap();
        controller.pump();
        assert!(!controller.is_connected());

        set(&store, None, Some(Some("wss://other")));
        controller.pump();
        assert!(controller.is_connected());
    }

    #[test]
    fn test_missing_preferences_is_a_no_op() {
        let store = RecordStore::new().unwrap();
        let recorder = Recorder::default();
        let mut controller =
            ConnectivityController::new(store.clone(), recorder.clone(), ConnectivityConfig::default());
        store
            .load(r#"{"version":"3","id":"rec","user":{"firstName":"A"},"people":[]}"#)
            .unwrap();
        controller.pump();
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unload_and_drop_close_session() {
        let (store, mut controller, recorder) = setup();
        set(&store, Some(true), None);
        controller.pump();
        store.unload();
        controller.pump();
        assert_eq!(recorder.live.load(Ordering::SeqCst), 0);

        set(&store, Some(true), None);
        controller.pump();
        assert_eq!(recorder.live.load(Ordering::SeqCst), 0);

        store.load(V3).unwrap();
        set(&store, Some(true), None);
        controller.pump();
        assert_eq!(recorder.live.load(Ordering::SeqCst), 1);
        drop(controller);
        assert_eq!(recorder.live.load(Ordering::SeqCst), 0);
    }
}
