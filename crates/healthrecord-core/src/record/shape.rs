//! Static schema shape of the health record document
//!
//! Every field the document exposes is declared here together with its kind.
//! The shape is written once as a deterministic genesis change so that all
//! replicas share the same root objects.

use std::fmt;

use automerge::transaction::{CommitOptions, Transactable};
use automerge::{ActorId, AutoCommit, ObjType, ROOT};

use crate::error::RecordResult;

/// Kind of a top-level field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Character sequence, merges per character
    Text,
    /// Nested object, last writer wins per assignment
    Record,
    /// Ordered list of records, merges per element
    OrderedSequence,
}

impl FieldKind {
    fn obj_type(self) -> ObjType {
        match self {
            FieldKind::Text => ObjType::Text,
            FieldKind::Record => ObjType::Map,
            FieldKind::OrderedSequence => ObjType::List,
        }
    }
}

pub const ID: &str = "id";
pub const VERSION: &str = "version";
pub const FIRST_NAME: &str = "firstName";
pub const LAST_NAME: &str = "lastName";
pub const USER: &str = "user";
pub const PREFERENCES: &str = "preferences";
pub const WEB_RTC: &str = "webRTC";
pub const ENABLED: &str = "enabled";
pub const SIGNALER_URL: &str = "signalerUrl";

/// Field name to kind mapping of the document root
pub const SCHEMA_SHAPE: &[(&str, FieldKind)] = &[
    (ID, FieldKind::Text),
    (VERSION, FieldKind::Text),
    (FIRST_NAME, FieldKind::Text),
    (LAST_NAME, FieldKind::Text),
    (USER, FieldKind::Record),
    ("people", FieldKind::OrderedSequence),
    ("vitals", FieldKind::OrderedSequence),
    ("measurements", FieldKind::OrderedSequence),
];

/// The ordered sequences of the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    People,
    Vitals,
    Measurements,
}

impl SequenceKind {
    pub const ALL: [SequenceKind; 3] = [
        SequenceKind::People,
        SequenceKind::Vitals,
        SequenceKind::Measurements,
    ];

    /// Field name in the document and in legacy snapshots
    pub fn field(self) -> &'static str {
        match self {
            SequenceKind::People => "people",
            SequenceKind::Vitals => "vitals",
            SequenceKind::Measurements => "measurements",
        }
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// Actor of the genesis change. Shared by every replica.
const GENESIS_ACTOR: [u8; 16] = *b"healthrecord-gen";

/// Build a document holding only the schema shape
///
/// The genesis change is byte-identical on every replica (fixed actor,
/// time 0), so merging two independently created documents keeps a single
/// set of root objects. The returned document already uses a fresh random
/// actor for all later edits.
pub(crate) fn genesis() -> RecordResult<AutoCommit> {
    let mut doc = AutoCommit::new().with_actor(ActorId::from(GENESIS_ACTOR.as_slice()));
    for (name, kind) in SCHEMA_SHAPE {
        doc.put_object(ROOT, *name, kind.obj_type())?;
    }
    doc.commit_with(CommitOptions::default().with_time(0));
    doc.set_actor(ActorId::random());
    Ok(doc)
}
