//! Versioned migration engine
//!
//! Normalizes imported snapshots into the current document schema.
//!
//! ## Import paths
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Snapshot::parse(text)                                          │
//! │  ├── Legacy  { version?, id?, firstName, lastName, ... }         │
//! │  │   ├── version := "3"                                         │
//! │  │   ├── append people / vitals / measurements (input order)    │
//! │  │   └── MigrationPlan: one step per field family               │
//! │  │       ├── Identity: ≤1 → new id,    else copy id             │
//! │  │       └── User:     <3 → derive,    else copy user           │
//! │  └── Encoded { state: base64, type }                            │
//! │      ├── merge state into the live document                     │
//! │      └── deferred: reconcile_after_merge                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Failed imports are not rolled back. Every write is a CRDT operation, so a
//! partial import is incomplete rather than corrupt, and
//! [`HealthRecordDoc::check_migrated`] reports what is missing.

mod reconcile;
mod snapshot;
mod steps;
mod version;

pub use reconcile::reconcile_after_merge;
pub use snapshot::{LegacySnapshot, Snapshot};
pub use steps::{FieldFamily, FieldMigration, MigrationPlan};
pub use version::DeclaredVersion;

use tracing::{info, warn};

use crate::error::RecordResult;
use crate::record::{shape, HealthRecordDoc, SequenceKind};
use crate::types::{RECORD_TYPE, SCHEMA_VERSION};

/// Which import path a snapshot took
#[derive(Debug, Clone, PartialEq)]
pub enum ImportKind {
    /// Plain record migrated field by field
    LegacyRecord {
        /// Version the snapshot declared
        declared: DeclaredVersion,
        /// Field migrations that ran
        steps: Vec<&'static str>,
    },
    /// Encoded state merged into the document
    EncodedState {
        /// Number of changes that were new to this replica
        changes_applied: usize,
    },
}

/// Write a legacy snapshot into the document
pub fn import_legacy(
    doc: &mut HealthRecordDoc,
    snapshot: &LegacySnapshot,
    plan: &MigrationPlan,
) -> RecordResult<ImportKind> {
    info!(declared = %snapshot.version, "Importing legacy record");
    if let DeclaredVersion::Unrecognized(version) = &snapshot.version {
        warn!(version, "Unrecognized record version, migrating as current shape");
    }

    doc.set_text(shape::VERSION, SCHEMA_VERSION)?;
    for kind in SequenceKind::ALL {
        doc.append_records(kind, snapshot.sequence(kind))?;
    }
    let steps = plan.apply(snapshot, doc)?;

    Ok(ImportKind::LegacyRecord {
        declared: snapshot.version.clone(),
        steps,
    })
}

/// Merge encoded document state into the document
///
/// The caller is responsible for scheduling [`reconcile_after_merge`] once
/// the merge has been published.
pub fn import_encoded(
    doc: &mut HealthRecordDoc,
    state: &[u8],
    kind: &str,
) -> RecordResult<ImportKind> {
    if kind != RECORD_TYPE {
        warn!(kind, "Importing encoded state with unexpected type");
    }
    let changes_applied = doc.apply_encoded_state(state)?;
    info!(changes_applied, "Merged encoded record state");
    Ok(ImportKind::EncodedState { changes_applied })
}
