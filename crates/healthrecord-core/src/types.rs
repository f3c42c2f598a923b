//! Core types for Health Record

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version written by every import
pub const SCHEMA_VERSION: &str = "3";

/// `type` tag of exported encoded-state snapshots
pub const RECORD_TYPE: &str = "healthRecord";

/// Peer-to-peer connectivity preferences
///
/// Stored inside the replicated document, so every peer sees the same
/// connectivity intent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcPreferences {
    /// Whether this record should join its peer room
    #[serde(default)]
    pub enabled: bool,
    /// Signaling server used to find peers, if any
    #[serde(default)]
    pub signaler_url: Option<String>,
}

impl WebRtcPreferences {
    /// The signaler URL, ignoring empty strings
    pub fn signaler(&self) -> Option<&str> {
        self.signaler_url.as_deref().filter(|url| !url.is_empty())
    }
}

/// User preferences record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(rename = "webRTC", default)]
    pub web_rtc: WebRtcPreferences,
}

/// Nested `user` record of the document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub preferences: Option<UserPreferences>,
}

/// Encoded-state snapshot: the whole document history as base64
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedSnapshot {
    /// Base64 of the saved automerge document
    pub state: String,
    /// Snapshot type tag, `healthRecord` for exports
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Preferences carried by older exports; never applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefs: Option<Value>,
}

/// Read-only view of a record, used for display and comparisons
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub id: String,
    pub version: String,
    pub first_name: String,
    pub last_name: String,
    pub user: Option<UserProfile>,
    pub people: Vec<Value>,
    pub vitals: Vec<Value>,
    pub measurements: Vec<Value>,
}
