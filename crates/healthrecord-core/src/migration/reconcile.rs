//! Repair after merging encoded state
//!
//! Encoded state is merged without passing through the typed field
//! migrations, so a document that predates the `user` record arrives without
//! one. Reconciliation backfills it from the plain name fields and defaults
//! the connectivity preferences to disabled.

use tracing::info;

use crate::error::RecordResult;
use crate::record::HealthRecordDoc;
use crate::types::UserPreferences;

/// Backfill the `user` record of a merged document
///
/// When `user.firstName` is unset or empty, the names are taken from the
/// plain name fields and the connectivity preferences are reset to disabled,
/// whatever the merged state carried. Otherwise only missing preferences are
/// filled in. Running it again changes nothing. Returns whether anything was
/// written.
pub fn reconcile_after_merge(doc: &mut HealthRecordDoc) -> RecordResult<bool> {
    let user = doc.user()?.unwrap_or_default();
    let defaults = UserPreferences::default();
    let mut repaired = false;

    if user.first_name.as_deref().map_or(true, str::is_empty) {
        let first = doc.first_name()?;
        let last = doc.last_name()?;
        if user.first_name.as_deref() != Some(first.as_str())
            || user.last_name.as_deref() != Some(last.as_str())
        {
            doc.set_user_name(Some(&first), Some(&last))?;
            repaired = true;
        }
        // Never joins a peer network on migration
        if user.preferences.as_ref() != Some(&defaults) {
            doc.set_preferences(&defaults)?;
            repaired = true;
        }
    } else if user.preferences.is_none() {
        doc.set_preferences(&defaults)?;
        repaired = true;
    }

    if repaired {
        info!("Backfilled user record after merge");
    }
    Ok(repaired)
}
