//! Version-gated field migrations
//!
//! Each field family was introduced by its own schema increment, so each is
//! migrated against its own cutoff. The plan is an ordered list of steps; for
//! every family the first step whose predicate accepts the declared version
//! runs. A new schema increment adds steps in front of the existing ones.

use serde_json::Value;
use tracing::{debug, warn};

use super::snapshot::LegacySnapshot;
use super::version::DeclaredVersion;
use crate::error::RecordResult;
use crate::record::{shape, HealthRecordDoc};
use crate::types::UserPreferences;

/// Group of fields migrated together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFamily {
    /// The record `id`
    Identity,
    /// `user.firstName`, `user.lastName`, `user.preferences`
    User,
}

type Predicate = fn(&DeclaredVersion) -> bool;
type Transform = fn(&LegacySnapshot, &mut HealthRecordDoc) -> RecordResult<()>;

/// One `(predicate, transform)` step for a field family
pub struct FieldMigration {
    pub family: FieldFamily,
    pub description: &'static str,
    applies: Predicate,
    transform: Transform,
}

impl FieldMigration {
    /// Whether this step handles snapshots of `version`
    pub fn applies_to(&self, version: &DeclaredVersion) -> bool {
        (self.applies)(version)
    }
}

/// Ordered list of field migrations
///
/// # Example
///
/// ```
/// use healthrecord_core::migration::{DeclaredVersion, FieldFamily, MigrationPlan};
///
/// let plan = MigrationPlan::current();
/// let step = plan
///     .step_for(FieldFamily::Identity, &DeclaredVersion::Number(1.0))
///     .unwrap();
/// assert_eq!(step.description, "generate a new record id");
/// ```
pub struct MigrationPlan {
    steps: Vec<FieldMigration>,
}

impl MigrationPlan {
    /// Plan for the current schema version
    pub fn current() -> Self {
        Self {
            steps: vec![
                FieldMigration {
                    family: FieldFamily::Identity,
                    description: "generate a new record id",
                    applies: |v| v.is_at_most(1.0),
                    transform: regenerate_id,
                },
                FieldMigration {
                    family: FieldFamily::Identity,
                    description: "copy record id",
                    applies: |_| true,
                    transform: copy_id,
                },
                FieldMigration {
                    family: FieldFamily::User,
                    description: "derive user from flat name fields",
                    applies: |v| v.is_below(3.0),
                    transform: derive_user,
                },
                FieldMigration {
                    family: FieldFamily::User,
                    description: "copy user record",
                    applies: |_| true,
                    transform: copy_user,
                },
            ],
        }
    }

    /// First step of `family` that accepts `version`
    pub fn step_for(
        &self,
        family: FieldFamily,
        version: &DeclaredVersion,
    ) -> Option<&FieldMigration> {
        self.steps
            .iter()
            .find(|step| step.family == family && step.applies_to(version))
    }

    /// Run one step per family against the snapshot
    ///
    /// Returns the descriptions of the steps that ran, in family order.
    pub fn apply(
        &self,
        snapshot: &LegacySnapshot,
        doc: &mut HealthRecordDoc,
    ) -> RecordResult<Vec<&'static str>> {
        let mut ran = Vec::new();
        for family in [FieldFamily::Identity, FieldFamily::User] {
            if let Some(step) = self.step_for(family, &snapshot.version) {
                debug!(
                    ?family,
                    version = %snapshot.version,
                    step = step.description,
                    "Running field migration"
                );
                (step.transform)(snapshot, doc)?;
                ran.push(step.description);
            }
        }
        Ok(ran)
    }
}

impl Default for MigrationPlan {
    fn default() -> Self {
        Self::current()
    }
}

fn as_text(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Legacy records had no stable id
fn regenerate_id(_: &LegacySnapshot, doc: &mut HealthRecordDoc) -> RecordResult<()> {
    doc.set_text(shape::ID, &uuid::Uuid::new_v4().to_string())
}

fn copy_id(snapshot: &LegacySnapshot, doc: &mut HealthRecordDoc) -> RecordResult<()> {
    match as_text(snapshot.field(shape::ID)) {
        Some(id) => doc.set_text(shape::ID, &id),
        None => {
            warn!(version = %snapshot.version, "Snapshot has no id to copy");
            Ok(())
        }
    }
}

/// Never joins a peer network on migration
fn derive_user(snapshot: &LegacySnapshot, doc: &mut HealthRecordDoc) -> RecordResult<()> {
    let first = as_text(snapshot.field(shape::FIRST_NAME));
    let last = as_text(snapshot.field(shape::LAST_NAME));
    doc.set_user_name(first.as_deref(), last.as_deref())?;
    doc.set_preferences(&UserPreferences::default())
}

fn copy_user(snapshot: &LegacySnapshot, doc: &mut HealthRecordDoc) -> RecordResult<()> {
    let user = match snapshot.field(shape::USER) {
        Some(Value::Object(user)) => user,
        _ => {
            warn!(version = %snapshot.version, "Snapshot has no user record to copy");
            return Ok(());
        }
    };
    let first = as_text(user.get(shape::FIRST_NAME));
    let last = as_text(user.get(shape::LAST_NAME));
    doc.set_user_name(first.as_deref(), last.as_deref())?;
    if let Some(prefs) = user.get(shape::PREFERENCES) {
        doc.set_preferences_value(prefs)?;
    }
    Ok(())
}
