//! Property-based tests for snapshot migration
//!
//! Uses proptest to check the version gates hold for any declared version
//! and any record contents.

use healthrecord_core::{ImportKind, RecordStore, WebRtcPreferences};
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// Strategy Generators
// ============================================================================

fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z '-]{0,40}").expect("valid regex")
}

fn id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9-]{1,36}").expect("valid regex")
}

/// Versions as they appear in the wild: strings and numbers
fn version_strategy(range: std::ops::Range<u32>) -> impl Strategy<Value = Value> {
    range.prop_flat_map(|v| prop_oneof![Just(json!(v.to_string())), Just(json!(v))])
}

fn records_strategy() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec((0..1000u32).prop_map(|n| json!({ "n": n })), 0..8)
}

fn legacy_record(version: Value, id: &str, first: &str, last: &str, vitals: &[Value]) -> String {
    json!({
        "version": version,
        "id": id,
        "firstName": first,
        "lastName": last,
        "user": {
            "firstName": "nested",
            "lastName": "nested",
            "preferences": { "webRTC": { "enabled": true, "signalerUrl": "wss://x" } },
        },
        "people": [],
        "vitals": vitals,
        "measurements": [],
    })
    .to_string()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Records at version 1 or older always get a fresh identity
    #[test]
    fn old_records_get_new_id(version in version_strategy(0..2), id in id_strategy()) {
        let store = RecordStore::new().unwrap();
        store.load(&legacy_record(version, &id, "A", "B", &[])).unwrap();
        let new_id = store.current().unwrap().id().unwrap();
        prop_assert_ne!(new_id.clone(), id);
        prop_assert_eq!(new_id.len(), 36);
    }

    /// Records after version 1 keep their identity
    #[test]
    fn newer_records_keep_id(version in version_strategy(2..10), id in id_strategy()) {
        let store = RecordStore::new().unwrap();
        store.load(&legacy_record(version, &id, "A", "B", &[])).unwrap();
        prop_assert_eq!(store.current().unwrap().id().unwrap(), id);
    }

    /// Records before version 3 derive the user from flat fields and never
    /// start connected, whatever preferences the nested user carries
    #[test]
    fn pre_user_records_derive_user(
        version in version_strategy(0..3),
        first in name_strategy(),
        last in name_strategy(),
    ) {
        let store = RecordStore::new().unwrap();
        store.load(&legacy_record(version, "r", &first, &last, &[])).unwrap();
        let user = store.current().unwrap().summary().unwrap().user.unwrap();
        prop_assert_eq!(user.first_name, Some(first));
        prop_assert_eq!(user.last_name, Some(last));
        prop_assert_eq!(user.preferences.unwrap().web_rtc, WebRtcPreferences::default());
    }

    /// Version 3 records copy the nested user verbatim
    #[test]
    fn current_records_copy_user(version in version_strategy(3..6)) {
        let store = RecordStore::new().unwrap();
        store.load(&legacy_record(version, "r", "flat", "flat", &[])).unwrap();
        let user = store.current().unwrap().summary().unwrap().user.unwrap();
        prop_assert_eq!(user.first_name.as_deref(), Some("nested"));
        prop_assert_eq!(user.last_name.as_deref(), Some("nested"));
        prop_assert_eq!(
            user.preferences.unwrap().web_rtc,
            WebRtcPreferences {
                enabled: true,
                signaler_url: Some("wss://x".to_string()),
            }
        );
    }

    /// Every import lands on the current schema version with sequences intact
    #[test]
    fn import_normalizes_version(version in version_strategy(0..10), vitals in records_strategy()) {
        let store = RecordStore::new().unwrap();
        store.load(&legacy_record(version, "r", "A", "B", &vitals)).unwrap();
        let record = store.current().unwrap().summary().unwrap();
        prop_assert_eq!(record.version, "3");
        prop_assert_eq!(record.vitals, vitals);
    }

    /// Export then load reproduces the record on a fresh replica
    #[test]
    fn export_load_preserves_record(version in version_strategy(0..5), vitals in records_strategy()) {
        let source = RecordStore::new().unwrap();
        source.load(&legacy_record(version, "r", "A", "B", &vitals)).unwrap();
        let snapshot = serde_json::to_string(&source.export().unwrap()).unwrap();

        let replica = RecordStore::new().unwrap();
        replica.load(&snapshot).unwrap();
        replica.settle().unwrap();
        prop_assert_eq!(
            replica.current().unwrap().summary().unwrap(),
            source.current().unwrap().summary().unwrap()
        );
    }

    /// Loading the same encoded state twice changes nothing the second time
    #[test]
    fn encoded_import_is_idempotent(version in version_strategy(0..5), vitals in records_strategy()) {
        let source = RecordStore::new().unwrap();
        source.load(&legacy_record(version, "r", "A", "B", &vitals)).unwrap();
        let snapshot = serde_json::to_string(&source.export().unwrap()).unwrap();

        let replica = RecordStore::new().unwrap();
        replica.load(&snapshot).unwrap();
        replica.settle().unwrap();
        let once = replica.current().unwrap().summary().unwrap();

        prop_assert_eq!(
            replica.load(&snapshot).unwrap(),
            ImportKind::EncodedState { changes_applied: 0 }
        );
        prop_assert!(!replica.settle().unwrap());
        prop_assert_eq!(replica.current().unwrap().summary().unwrap(), once);
    }
}
