//! Health Record Core Library
//!
//! A single health record kept as an Automerge CRDT and shared between peers
//! with no central server of record.
//!
//! ## Overview
//!
//! The record is imported from a versioned snapshot, either a legacy plain
//! JSON record or the encoded state of another replica. Imports are migrated
//! field by field into the live document instead of replacing it, so replicas
//! that are already connected keep converging. Connectivity intent lives in
//! the record too: `user.preferences.webRTC` decides whether a replica joins
//! its peers.
//!
//! ## Core Principles
//!
//! - **Never replace the root**: imports repopulate the live document
//! - **Configuration through data**: peers follow preferences stored in the record
//! - **Idempotent reactions**: redundant notifications never change the outcome
//!
//! ## Quick Start
//!
//! ```ignore
//! use healthrecord_core::{ConnectivityConfig, ConnectivityController, LocalHub, RecordStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = RecordStore::new()?;
//!     let mut controller =
//!         ConnectivityController::new(store.clone(), LocalHub::new(), ConnectivityConfig::default());
//!
//!     store.load(&std::fs::read_to_string("record.json")?)?;
//!     println!("{}", serde_json::to_string(&store.export()?)?);
//!
//!     controller.run().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connectivity;
pub mod error;
pub mod migration;
pub mod record;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use config::{ConnectivityConfig, DEV_SIGNALER_URL};
pub use connectivity::{
    ConnectionState, ConnectivityController, LocalHub, PeerTransport, TransportEvent,
    TransportEvents, TransportOptions, TransportSession,
};
pub use error::{RecordError, RecordResult, TransportError};
pub use migration::{DeclaredVersion, ImportKind, MigrationPlan, Snapshot};
pub use record::{HealthRecordDoc, SequenceKind};
pub use storage::Storage;
pub use store::{ActivityFlag, DocEvent, MemoryFlag, RecordHandle, RecordStore, UpdateOrigin};
pub use types::*;
