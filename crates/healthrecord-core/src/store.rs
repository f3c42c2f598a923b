//! Record store - the process handle to the current health record
//!
//! The store owns the replicated document and is the single path through
//! which it is mutated. Every mutation is published on a broadcast channel so
//! that reactive collaborators (the connectivity controller, persistence)
//! can follow the document without being called directly.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  RecordStore (cheap to clone, pass by context)                  │
//! │  ├── doc: Mutex<HealthRecordDoc>                                │
//! │  │   └── constructed once, repopulated in place by imports      │
//! │  ├── event_tx: broadcast::Sender<DocEvent>                      │
//! │  │   └── Updated / Replaced / Unloaded                          │
//! │  ├── loaded: current() is Some once a record is loaded          │
//! │  └── activity: ActivityFlag                                     │
//! │      └── loaded && id non-empty, signalled on change            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::Engine;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{RecordError, RecordResult};
use crate::migration::{self, ImportKind, MigrationPlan, Snapshot};
use crate::record::HealthRecordDoc;
use crate::types::{EncodedSnapshot, RecordSummary, RECORD_TYPE};

/// Default capacity for the document event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Where a document update came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// Local edit through [`RecordStore::update`]
    Local,
    /// Snapshot import
    Import,
    /// Reconciliation after an encoded-state merge
    Reconcile,
    /// State received from a peer
    Remote,
}

/// Notifications published by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocEvent {
    /// The document changed
    Updated {
        /// Source of the change
        origin: UpdateOrigin,
    },
    /// The whole document was swapped for another one
    Replaced,
    /// The current record was cleared
    Unloaded,
}

/// Local "is active" signal consumed by a storage collaborator
///
/// Purely local bookkeeping, never part of the replicated state.
pub trait ActivityFlag: Send + Sync {
    /// Record whether a record with an identity is active
    fn set_active(&self, active: bool);
}

/// In-memory activity flag
#[derive(Debug, Default)]
pub struct MemoryFlag(AtomicBool);

impl MemoryFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl ActivityFlag for MemoryFlag {
    fn set_active(&self, active: bool) {
        self.0.store(active, Ordering::SeqCst);
    }
}

struct Inner {
    doc: Mutex<HealthRecordDoc>,
    event_tx: broadcast::Sender<DocEvent>,
    loaded: AtomicBool,
    activity: Arc<dyn ActivityFlag>,
    last_active: Mutex<Option<bool>>,
    pending_reconcile: AtomicBool,
    plan: MigrationPlan,
}

/// Handle to the current health record
///
/// Cloning is cheap; all clones share one document.
#[derive(Clone)]
pub struct RecordStore {
    inner: Arc<Inner>,
}

/// Borrowed access to the current record, see [`RecordStore::current`]
#[derive(Clone)]
pub struct RecordHandle {
    store: RecordStore,
}

impl RecordHandle {
    /// Run `f` with shared access to the document
    pub fn read<R>(&self, f: impl FnOnce(&HealthRecordDoc) -> R) -> R {
        self.store.read(f)
    }

    /// Record identity
    pub fn id(&self) -> RecordResult<String> {
        self.read(|doc| doc.id())
    }

    /// Plain view of the whole record
    pub fn summary(&self) -> RecordResult<RecordSummary> {
        self.read(|doc| doc.summary())
    }
}

impl RecordStore {
    /// Create a store with an empty document and an in-memory activity flag
    pub fn new() -> RecordResult<Self> {
        Self::with_activity_flag(Arc::new(MemoryFlag::new()))
    }

    /// Create a store that signals activity to `activity`
    pub fn with_activity_flag(activity: Arc<dyn ActivityFlag>) -> RecordResult<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                doc: Mutex::new(HealthRecordDoc::new()?),
                event_tx,
                loaded: AtomicBool::new(false),
                activity,
                last_active: Mutex::new(None),
                pending_reconcile: AtomicBool::new(false),
                plan: MigrationPlan::current(),
            }),
        })
    }

    /// Subscribe to document events
    ///
    /// Multiple subscribers can exist; events are broadcast to all.
    pub fn subscribe(&self) -> broadcast::Receiver<DocEvent> {
        self.inner.event_tx.subscribe()
    }

    /// The current record, `None` until one is loaded
    pub fn current(&self) -> Option<RecordHandle> {
        if self.inner.loaded.load(Ordering::SeqCst) {
            Some(RecordHandle {
                store: self.clone(),
            })
        } else {
            None
        }
    }

    /// Run `f` with shared access to the document
    pub fn read<R>(&self, f: impl FnOnce(&HealthRecordDoc) -> R) -> R {
        f(&self.inner.doc.lock())
    }

    /// Mutate the document and publish the change
    ///
    /// The notification is sent after the lock is released, so subscribers
    /// always observe a complete change. It is sent even when `f` fails part
    /// way, since the operations already applied remain in the document.
    pub fn update<R>(
        &self,
        origin: UpdateOrigin,
        f: impl FnOnce(&mut HealthRecordDoc) -> RecordResult<R>,
    ) -> RecordResult<R> {
        let result = {
            let mut doc = self.inner.doc.lock();
            f(&mut doc)
        };
        self.publish(DocEvent::Updated { origin });
        result
    }

    /// Load import text into the document and make it current
    ///
    /// A legacy record is migrated field by field into the live document. An
    /// encoded state is merged into it, and a reconciliation of the `user`
    /// record is scheduled to run after the merge notification has been
    /// handled: on a spawned task when called inside a tokio runtime,
    /// otherwise on the next [`RecordStore::settle`].
    ///
    /// # Errors
    ///
    /// Returns `RecordError::MalformedInput` if the text is not a snapshot.
    /// Nothing is mutated in that case.
    pub fn load(&self, text: &str) -> RecordResult<ImportKind> {
        let snapshot = Snapshot::parse(text)?;

        let kind = match &snapshot {
            Snapshot::Legacy(legacy) => self.update(UpdateOrigin::Import, |doc| {
                migration::import_legacy(doc, legacy, &self.inner.plan)
            })?,
            Snapshot::Encoded { state, kind } => {
                let imported = self.update(UpdateOrigin::Import, |doc| {
                    migration::import_encoded(doc, state, kind)
                })?;
                self.schedule_reconciliation();
                imported
            }
        };

        self.set_loaded(true);
        if let Err(gap) = self.read(|doc| doc.check_migrated()) {
            warn!(error = %gap, "Record imported with gaps");
        }
        Ok(kind)
    }

    fn schedule_reconciliation(&self) {
        self.inner.pending_reconcile.store(true, Ordering::SeqCst);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = self.clone();
            handle.spawn(async move {
                // Let the merge notification run through its subscribers first
                tokio::task::yield_now().await;
                if let Err(e) = store.settle() {
                    warn!(error = %e, "Deferred reconciliation failed");
                }
            });
        } else {
            debug!("No runtime, reconciliation waits for settle()");
        }
    }

    /// Run a pending post-merge reconciliation now
    ///
    /// Returns whether the reconciliation wrote anything. Safe to call at any
    /// time; without a pending merge it does nothing.
    pub fn settle(&self) -> RecordResult<bool> {
        if !self.inner.pending_reconcile.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        let result = {
            let mut doc = self.inner.doc.lock();
            migration::reconcile_after_merge(&mut doc)
        };
        if !matches!(result, Ok(false)) {
            self.publish(DocEvent::Updated {
                origin: UpdateOrigin::Reconcile,
            });
        }
        result
    }

    /// Whether a post-merge reconciliation is still pending
    pub fn reconciliation_pending(&self) -> bool {
        self.inner.pending_reconcile.load(Ordering::SeqCst)
    }

    /// Swap the whole document for saved bytes (fresh load path)
    ///
    /// Subscribers receive [`DocEvent::Replaced`] and must re-read everything.
    pub fn reload(&self, data: &[u8]) -> RecordResult<()> {
        let doc = HealthRecordDoc::load(data)?;
        *self.inner.doc.lock() = doc;
        info!("Record document replaced");
        self.set_loaded(true);
        self.publish(DocEvent::Replaced);
        Ok(())
    }

    /// Merge saved state received from a peer
    ///
    /// Returns the number of changes that were new to this replica.
    pub fn apply_remote(&self, data: &[u8]) -> RecordResult<usize> {
        self.update(UpdateOrigin::Remote, |doc| doc.apply_encoded_state(data))
    }

    /// Saved document bytes, whether or not a record is current
    pub(crate) fn save_bytes(&self) -> Vec<u8> {
        self.inner.doc.lock().save()
    }

    /// Clear the current record
    pub fn unload(&self) {
        self.set_loaded(false);
        self.publish(DocEvent::Unloaded);
    }

    /// Encoded-state snapshot of the current record
    ///
    /// Serializes the full document history; the document contents are not
    /// changed and no update is published.
    ///
    /// # Errors
    ///
    /// Returns `RecordError::NotLoaded` if no record is current.
    pub fn export(&self) -> RecordResult<EncodedSnapshot> {
        let bytes = self.export_bytes()?;
        Ok(EncodedSnapshot {
            state: base64::engine::general_purpose::STANDARD.encode(bytes),
            kind: RECORD_TYPE.to_string(),
            prefs: None,
        })
    }

    /// Saved document bytes of the current record
    pub fn export_bytes(&self) -> RecordResult<Vec<u8>> {
        if self.current().is_none() {
            return Err(RecordError::NotLoaded);
        }
        Ok(self.save_bytes())
    }

    fn set_loaded(&self, loaded: bool) {
        let was = self.inner.loaded.swap(loaded, Ordering::SeqCst);
        if was != loaded {
            debug!(loaded, "Current record changed");
        }
        self.refresh_activity();
    }

    fn publish(&self, event: DocEvent) {
        if let DocEvent::Updated { .. } = event {
            self.refresh_activity();
        }
        // No receivers is fine
        let _ = self.inner.event_tx.send(event);
    }

    fn refresh_activity(&self) {
        let active = self.inner.loaded.load(Ordering::SeqCst)
            && self.read(|doc| doc.id()).map(|id| !id.is_empty()).unwrap_or(false);
        let mut last = self.inner.last_active.lock();
        if *last != Some(active) {
            *last = Some(active);
            self.inner.activity.set_active(active);
        }
    }
}
