//! Automerge document wrapper for the health record
//!
//! HealthRecordDoc wraps an Automerge document laid out by the schema shape
//! and provides typed reads and writes. It handles serialization, merging,
//! and application of encoded state from other replicas.

use automerge::transaction::Transactable;
use automerge::{AutoCommit, ObjId, ObjType, ReadDoc, ScalarValue, Value as AmValue, ROOT};
use serde_json::Value;
use tracing::warn;

use super::json;
use super::shape::{self, SequenceKind};
use crate::error::{RecordError, RecordResult};
use crate::types::{RecordSummary, UserPreferences, UserProfile, WebRtcPreferences};

fn scalar_string(value: &ScalarValue) -> Option<String> {
    match value {
        ScalarValue::Str(s) => Some(s.to_string()),
        _ => None,
    }
}

/// Automerge document holding one health record
///
/// All writes are operations on the typed sub-fields declared by
/// [`shape::SCHEMA_SHAPE`]; the root object itself is never replaced.
///
/// # Example
///
/// ```
/// use healthrecord_core::record::HealthRecordDoc;
///
/// let mut doc = HealthRecordDoc::new().unwrap();
/// doc.set_text("id", "rec-1").unwrap();
/// assert_eq!(doc.id().unwrap(), "rec-1");
///
/// let bytes = doc.save();
/// let loaded = HealthRecordDoc::load(&bytes).unwrap();
/// assert_eq!(loaded.id().unwrap(), "rec-1");
/// ```
pub struct HealthRecordDoc {
    doc: AutoCommit,
}

impl HealthRecordDoc {
    /// Create a new document holding only the schema shape
    pub fn new() -> RecordResult<Self> {
        Ok(Self {
            doc: shape::genesis()?,
        })
    }

    /// Load a document from saved bytes
    ///
    /// # Errors
    ///
    /// Returns `RecordError::Automerge` if the bytes are not a valid Automerge document.
    pub fn load(data: &[u8]) -> RecordResult<Self> {
        let doc = AutoCommit::load(data)?;
        Ok(Self { doc })
    }

    /// Save the full document history to bytes
    ///
    /// Saving compacts pending operations but leaves the document contents
    /// unchanged.
    pub fn save(&mut self) -> Vec<u8> {
        self.doc.save()
    }

    /// Fork the document for concurrent editing
    pub fn fork(&mut self) -> Self {
        Self {
            doc: self.doc.fork(),
        }
    }

    /// Merge another document into this one
    pub fn merge(&mut self, other: &mut HealthRecordDoc) -> RecordResult<()> {
        self.doc.merge(&mut other.doc)?;
        Ok(())
    }

    /// Apply encoded document state from another replica
    ///
    /// Accepts the output of [`HealthRecordDoc::save`]. The incoming history is
    /// merged with the local one; changes already present are skipped, so
    /// applying the same state twice is a no-op. Returns the number of new
    /// changes applied.
    ///
    /// # Errors
    ///
    /// Returns `RecordError::MalformedInput` if the bytes are not a complete
    /// Automerge document. Nothing is applied in that case.
    pub fn apply_encoded_state(&mut self, data: &[u8]) -> RecordResult<usize> {
        let mut incoming = AutoCommit::load(data)
            .map_err(|e| RecordError::MalformedInput(format!("invalid document state: {}", e)))?;
        let applied = self.doc.merge(&mut incoming)?;
        Ok(applied.len())
    }

    /// Get the document heads (change hashes)
    pub fn heads(&mut self) -> Vec<automerge::ChangeHash> {
        self.doc.get_heads()
    }

    fn root_object(&self, field: &str, expected: ObjType) -> RecordResult<ObjId> {
        match self.doc.get(ROOT, field)? {
            Some((AmValue::Object(kind), id)) if kind == expected => Ok(id),
            _ => Err(RecordError::Automerge(format!(
                "{} is missing or not a {:?}",
                field, expected
            ))),
        }
    }

    fn read_text(&self, field: &str) -> RecordResult<String> {
        match self.doc.get(ROOT, field)? {
            Some((AmValue::Object(ObjType::Text), id)) => Ok(self.doc.text(&id)?),
            Some((AmValue::Scalar(s), _)) => Ok(scalar_string(&s).unwrap_or_default()),
            _ => Ok(String::new()),
        }
    }

    /// Record identity, used as the peer room key
    pub fn id(&self) -> RecordResult<String> {
        self.read_text(shape::ID)
    }

    /// Schema version written by the last import
    pub fn version(&self) -> RecordResult<String> {
        self.read_text(shape::VERSION)
    }

    /// Plain first name text of older documents
    pub fn first_name(&self) -> RecordResult<String> {
        self.read_text(shape::FIRST_NAME)
    }

    /// Plain last name text of older documents
    pub fn last_name(&self) -> RecordResult<String> {
        self.read_text(shape::LAST_NAME)
    }

    /// Replace the contents of one of the text fields
    pub fn set_text(&mut self, field: &str, value: &str) -> RecordResult<()> {
        let text = self.root_object(field, ObjType::Text)?;
        self.doc.update_text(&text, value)?;
        Ok(())
    }

    fn user_object(&self) -> RecordResult<ObjId> {
        self.root_object(shape::USER, ObjType::Map)
    }

    fn map_string(&self, obj: &ObjId, key: &str) -> RecordResult<Option<String>> {
        Ok(match self.doc.get(obj, key)? {
            Some((AmValue::Scalar(s), _)) => scalar_string(&s),
            Some((AmValue::Object(ObjType::Text), id)) => Some(self.doc.text(&id)?),
            _ => None,
        })
    }

    /// The nested `user` record, `None` when it holds no fields yet
    pub fn user(&self) -> RecordResult<Option<UserProfile>> {
        let user = match self.doc.get(ROOT, shape::USER)? {
            Some((AmValue::Object(ObjType::Map), id)) => id,
            _ => return Ok(None),
        };
        if self.doc.length(&user) == 0 {
            return Ok(None);
        }
        Ok(Some(UserProfile {
            first_name: self.map_string(&user, shape::FIRST_NAME)?,
            last_name: self.map_string(&user, shape::LAST_NAME)?,
            preferences: self.preferences_in(&user)?,
        }))
    }

    fn preferences_in(&self, user: &ObjId) -> RecordResult<Option<UserPreferences>> {
        let (value, id) = match self.doc.get(user, shape::PREFERENCES)? {
            Some(found) => found,
            None => return Ok(None),
        };
        let prefs = json::read_value(&self.doc, value, &id)?;
        if prefs.is_null() {
            return Ok(None);
        }
        match serde_json::from_value(prefs) {
            Ok(prefs) => Ok(Some(prefs)),
            Err(e) => {
                // Never join peers on preferences we cannot read
                warn!(error = %e, "Unreadable user.preferences, treating connectivity as disabled");
                Ok(Some(UserPreferences::default()))
            }
        }
    }

    /// Connectivity preferences, `None` when the user record has none
    ///
    /// Preferences that do not match the expected shape read as the
    /// disabled default.
    pub fn webrtc_preferences(&self) -> RecordResult<Option<WebRtcPreferences>> {
        Ok(self
            .user()?
            .and_then(|user| user.preferences)
            .map(|prefs| prefs.web_rtc))
    }

    /// Assign `user.firstName` and `user.lastName`
    pub fn set_user_name(&mut self, first: Option<&str>, last: Option<&str>) -> RecordResult<()> {
        let user = self.user_object()?;
        for (key, value) in [(shape::FIRST_NAME, first), (shape::LAST_NAME, last)] {
            match value {
                Some(v) => self.doc.put(&user, key, v)?,
                None => self.doc.put(&user, key, ScalarValue::Null)?,
            }
        }
        Ok(())
    }

    /// Assign the whole `user.preferences` record
    ///
    /// Each assignment creates a new object, so concurrent assignments resolve
    /// last-writer-wins for the record as a whole.
    pub fn set_preferences(&mut self, prefs: &UserPreferences) -> RecordResult<()> {
        let value =
            serde_json::to_value(prefs).map_err(|e| RecordError::Serialization(e.to_string()))?;
        self.set_preferences_value(&value)
    }

    /// Assign `user.preferences` from an untyped value, copied verbatim
    pub fn set_preferences_value(&mut self, value: &Value) -> RecordResult<()> {
        let user = self.user_object()?;
        json::put_in_map(&mut self.doc, &user, shape::PREFERENCES, value)
    }

    /// Update a single connectivity preference in place
    ///
    /// Creates the preference records first if the document has none.
    pub fn set_webrtc(
        &mut self,
        enabled: Option<bool>,
        signaler_url: Option<Option<&str>>,
    ) -> RecordResult<()> {
        let user = self.user_object()?;
        let prefs = match self.doc.get(&user, shape::PREFERENCES)? {
            Some((AmValue::Object(ObjType::Map), id)) => id,
            _ => self.doc.put_object(&user, shape::PREFERENCES, ObjType::Map)?,
        };
        let web_rtc = match self.doc.get(&prefs, shape::WEB_RTC)? {
            Some((AmValue::Object(ObjType::Map), id)) => id,
            _ => {
                let id = self.doc.put_object(&prefs, shape::WEB_RTC, ObjType::Map)?;
                self.doc.put(&id, shape::ENABLED, false)?;
                self.doc.put(&id, shape::SIGNALER_URL, ScalarValue::Null)?;
                id
            }
        };
        if let Some(enabled) = enabled {
            self.doc.put(&web_rtc, shape::ENABLED, enabled)?;
        }
        match signaler_url {
            Some(Some(url)) => self.doc.put(&web_rtc, shape::SIGNALER_URL, url)?,
            Some(None) => self.doc.put(&web_rtc, shape::SIGNALER_URL, ScalarValue::Null)?,
            None => {}
        }
        Ok(())
    }

    /// Append records to the end of an ordered sequence, keeping their order
    pub fn append_records(&mut self, kind: SequenceKind, records: &[Value]) -> RecordResult<()> {
        let list = self.root_object(kind.field(), ObjType::List)?;
        let mut index = self.doc.length(&list);
        for record in records {
            json::insert_in_list(&mut self.doc, &list, index, record)?;
            index += 1;
        }
        Ok(())
    }

    /// Contents of an ordered sequence
    pub fn sequence(&self, kind: SequenceKind) -> RecordResult<Vec<Value>> {
        match self.doc.get(ROOT, kind.field())? {
            Some((value, id)) => match json::read_value(&self.doc, value, &id)? {
                Value::Array(items) => Ok(items),
                _ => Ok(Vec::new()),
            },
            None => Ok(Vec::new()),
        }
    }

    /// Check that every version-gated field has been populated
    ///
    /// # Errors
    ///
    /// Returns `RecordError::MigrationIncomplete` naming the first unset field.
    pub fn check_migrated(&self) -> RecordResult<()> {
        if self.version()?.is_empty() {
            return Err(RecordError::MigrationIncomplete { field: "version" });
        }
        if self.id()?.is_empty() {
            return Err(RecordError::MigrationIncomplete { field: "id" });
        }
        let user = self.user()?.unwrap_or_default();
        if user.first_name.is_none() {
            return Err(RecordError::MigrationIncomplete {
                field: "user.firstName",
            });
        }
        if user.preferences.is_none() {
            return Err(RecordError::MigrationIncomplete {
                field: "user.preferences",
            });
        }
        Ok(())
    }

    /// Read the whole record into a plain view
    pub fn summary(&self) -> RecordResult<RecordSummary> {
        Ok(RecordSummary {
            id: self.id()?,
            version: self.version()?,
            first_name: self.first_name()?,
            last_name: self.last_name()?,
            user: self.user()?,
            people: self.sequence(SequenceKind::People)?,
            vitals: self.sequence(SequenceKind::Vitals)?,
            measurements: self.sequence(SequenceKind::Measurements)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn default_prefs() -> UserPreferences {
        UserPreferences {
            web_rtc: WebRtcPreferences {
                enabled: false,
                signaler_url: None,
            },
        }
    }

    #[test]
    fn test_new_doc_is_empty() {
        let doc = HealthRecordDoc::new().unwrap();
        assert_eq!(doc.id().unwrap(), "");
        assert_eq!(doc.version().unwrap(), "");
        assert!(doc.user().unwrap().is_none());
        assert!(doc.sequence(SequenceKind::Vitals).unwrap().is_empty());
    }

    #[test]
    fn test_set_text_replaces_content() {
        let mut doc = HealthRecordDoc::new().unwrap();
        doc.set_text(shape::VERSION, "2").unwrap();
        doc.set_text(shape::VERSION, "3").unwrap();
        assert_eq!(doc.version().unwrap(), "3");
    }

    #[test]
    fn test_user_name_and_preferences() {
        let mut doc = HealthRecordDoc::new().unwrap();
        doc.set_user_name(Some("Ada"), Some("Lovelace")).unwrap();
        doc.set_preferences(&default_prefs()).unwrap();

        let user = doc.user().unwrap().unwrap();
        assert_eq!(user.first_name.as_deref(), Some("Ada"));
        assert_eq!(user.last_name.as_deref(), Some("Lovelace"));
        assert_eq!(
            doc.webrtc_preferences().unwrap(),
            Some(WebRtcPreferences::default())
        );
    }

    #[test]
    fn test_set_webrtc_creates_missing_records() {
        let mut doc = HealthRecordDoc::new().unwrap();
        doc.set_webrtc(Some(true), None).unwrap();
        assert_eq!(
            doc.webrtc_preferences().unwrap(),
            Some(WebRtcPreferences {
                enabled: true,
                signaler_url: None
            })
        );

        doc.set_webrtc(None, Some(Some("wss://signal.example"))).unwrap();
        let prefs = doc.webrtc_preferences().unwrap().unwrap();
        assert!(prefs.enabled);
        assert_eq!(prefs.signaler(), Some("wss://signal.example"));
    }

    #[test]
    fn test_unreadable_preferences_read_as_disabled() {
        for prefs in [
            json!({"webRTC": {"enabled": "yes"}}),
            json!({"webRTC": null}),
            json!("enabled"),
        ] {
            let mut doc = HealthRecordDoc::new().unwrap();
            doc.set_user_name(Some("A"), Some("B")).unwrap();
            doc.set_preferences_value(&prefs).unwrap();

            assert_eq!(
                doc.webrtc_preferences().unwrap(),
                Some(WebRtcPreferences::default()),
                "{prefs}"
            );
            assert!(doc.summary().is_ok(), "{prefs}");
        }
    }

    #[test]
    fn test_append_records_keeps_order() {
        let mut doc = HealthRecordDoc::new().unwrap();
        doc.append_records(SequenceKind::Vitals, &[json!({"n": 1}), json!({"n": 2})])
            .unwrap();
        doc.append_records(SequenceKind::Vitals, &[json!({"n": 3})])
            .unwrap();
        assert_eq!(
            doc.sequence(SequenceKind::Vitals).unwrap(),
            vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]
        );
    }

    #[test]
    fn test_check_migrated_names_first_gap() {
        let mut doc = HealthRecordDoc::new().unwrap();
        assert!(matches!(
            doc.check_migrated(),
            Err(RecordError::MigrationIncomplete { field: "version" })
        ));

        doc.set_text(shape::VERSION, "3").unwrap();
        doc.set_text(shape::ID, "rec").unwrap();
        doc.set_user_name(Some("A"), Some("B")).unwrap();
        assert!(matches!(
            doc.check_migrated(),
            Err(RecordError::MigrationIncomplete {
                field: "user.preferences"
            })
        ));

        doc.set_preferences(&default_prefs()).unwrap();
        doc.check_migrated().unwrap();
    }

    #[test]
    fn test_concurrent_appends_merge() {
        let mut doc1 = HealthRecordDoc::new().unwrap();
        let mut doc2 = doc1.fork();

        doc1.append_records(SequenceKind::People, &[json!({"name": "from 1"})])
            .unwrap();
        doc2.append_records(SequenceKind::People, &[json!({"name": "from 2"})])
            .unwrap();

        doc1.merge(&mut doc2).unwrap();
        assert_eq!(doc1.sequence(SequenceKind::People).unwrap().len(), 2);
    }

    #[test]
    fn test_independent_docs_share_shape_on_merge() {
        let mut doc1 = HealthRecordDoc::new().unwrap();
        let mut doc2 = HealthRecordDoc::new().unwrap();

        doc1.append_records(SequenceKind::Measurements, &[json!({"kg": 70})])
            .unwrap();
        doc2.append_records(SequenceKind::Measurements, &[json!({"kg": 71})])
            .unwrap();

        doc1.merge(&mut doc2).unwrap();
        assert_eq!(doc1.sequence(SequenceKind::Measurements).unwrap().len(), 2);
    }

    #[test]
    fn test_apply_encoded_state_twice_is_idempotent() {
        let mut source = HealthRecordDoc::new().unwrap();
        source.set_text(shape::ID, "rec").unwrap();
        source
            .append_records(SequenceKind::Vitals, &[json!({"bpm": 60})])
            .unwrap();
        let state = source.save();

        let mut target = HealthRecordDoc::new().unwrap();
        target.apply_encoded_state(&state).unwrap();
        let once = target.summary().unwrap();
        let heads = target.heads();

        target.apply_encoded_state(&state).unwrap();
        assert_eq!(target.summary().unwrap(), once);
        assert_eq!(target.heads(), heads);
    }

    #[test]
    fn test_apply_garbage_state_is_malformed() {
        let mut doc = HealthRecordDoc::new().unwrap();
        let result = doc.apply_encoded_state(b"definitely not automerge");
        assert!(matches!(result, Err(RecordError::MalformedInput(_))));
    }
}
