//! Import snapshot parsing
//!
//! Import text is one of two mutually exclusive shapes, told apart by the
//! presence of a `state` key. Parsing validates the whole input before the
//! document is touched.

use base64::Engine;
use serde_json::{Map, Value};

use super::version::DeclaredVersion;
use crate::error::{RecordError, RecordResult};
use crate::record::SequenceKind;
use crate::types::EncodedSnapshot;

/// Plain legacy record snapshot
#[derive(Debug, Clone)]
pub struct LegacySnapshot {
    /// Declared schema version
    pub version: DeclaredVersion,
    raw: Map<String, Value>,
    people: Vec<Value>,
    vitals: Vec<Value>,
    measurements: Vec<Value>,
}

impl LegacySnapshot {
    fn from_object(raw: Map<String, Value>) -> RecordResult<Self> {
        Ok(Self {
            version: DeclaredVersion::from_field(raw.get("version")),
            people: read_sequence(&raw, SequenceKind::People)?,
            vitals: read_sequence(&raw, SequenceKind::Vitals)?,
            measurements: read_sequence(&raw, SequenceKind::Measurements)?,
            raw,
        })
    }

    /// Untyped top-level field of the original snapshot
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }

    /// Records of one ordered sequence, in input order
    pub fn sequence(&self, kind: SequenceKind) -> &[Value] {
        match kind {
            SequenceKind::People => &self.people,
            SequenceKind::Vitals => &self.vitals,
            SequenceKind::Measurements => &self.measurements,
        }
    }
}

fn read_sequence(raw: &Map<String, Value>, kind: SequenceKind) -> RecordResult<Vec<Value>> {
    match raw.get(kind.field()) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(RecordError::MalformedInput(format!(
            "{} must be an array",
            kind
        ))),
    }
}

/// A parsed import snapshot
#[derive(Debug, Clone)]
pub enum Snapshot {
    /// Plain record in some older or current shape
    Legacy(LegacySnapshot),
    /// Encoded document state produced by an export
    Encoded {
        /// Decoded document bytes
        state: Vec<u8>,
        /// The snapshot `type` tag
        kind: String,
    },
}

impl Snapshot {
    /// Parse import text
    ///
    /// # Errors
    ///
    /// Returns `RecordError::MalformedInput` if the text is not JSON, is not an
    /// object, or does not match either snapshot shape.
    pub fn parse(text: &str) -> RecordResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| RecordError::MalformedInput(e.to_string()))?;
        let object = match value {
            Value::Object(object) => object,
            other => {
                return Err(RecordError::MalformedInput(format!(
                    "expected a JSON object, found {}",
                    json_kind(&other)
                )))
            }
        };

        if object.contains_key("state") {
            let encoded: EncodedSnapshot = serde_json::from_value(Value::Object(object))
                .map_err(|e| RecordError::MalformedInput(e.to_string()))?;
            let state = base64::engine::general_purpose::STANDARD
                .decode(encoded.state.trim())
                .map_err(|e| RecordError::MalformedInput(format!("state is not base64: {}", e)))?;
            Ok(Snapshot::Encoded {
                state,
                kind: encoded.kind,
            })
        } else {
            LegacySnapshot::from_object(object).map(Snapshot::Legacy)
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
