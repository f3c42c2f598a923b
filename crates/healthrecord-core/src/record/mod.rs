//! Health record document - Automerge document laid out by a static schema shape
//!
//! The record is a single replicated document. Text fields merge per
//! character, the `user` record resolves last-writer-wins per assignment, and
//! the ordered sequences (people, vitals, measurements) merge per element.

pub mod doc;
mod json;
pub mod shape;

pub use doc::HealthRecordDoc;
pub use shape::{FieldKind, SequenceKind, SCHEMA_SHAPE};
