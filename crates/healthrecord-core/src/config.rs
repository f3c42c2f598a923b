//! Connectivity configuration

use crate::types::WebRtcPreferences;

/// Signaler used by development builds when the record names none
pub const DEV_SIGNALER_URL: &str = "ws://localhost:8787";

/// Local configuration of the connectivity controller
///
/// Everything that should be shared between peers lives in the document.
/// This only holds settings that are specific to one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityConfig {
    /// Fallback signaler when the preferences name none
    pub dev_signaler: Option<String>,
}

impl ConnectivityConfig {
    /// Configuration without any fallback signaler
    pub fn without_dev_signaler() -> Self {
        Self { dev_signaler: None }
    }

    /// Configuration with `url` as fallback signaler
    pub fn with_dev_signaler(url: impl Into<String>) -> Self {
        Self {
            dev_signaler: Some(url.into()),
        }
    }

    /// Signaling endpoints for a session
    ///
    /// The preferred signaler wins, then the development fallback. An empty
    /// list leaves it to the transport to decide whether it can run without
    /// signaling.
    pub fn resolve_signaling(&self, prefs: &WebRtcPreferences) -> Vec<String> {
        if let Some(url) = prefs.signaler() {
            vec![url.to_string()]
        } else if let Some(url) = self.dev_signaler.as_deref().filter(|u| !u.is_empty()) {
            vec![url.to_string()]
        } else {
            Vec::new()
        }
    }
}

impl Default for ConnectivityConfig {
    /// Debug builds fall back to [`DEV_SIGNALER_URL`]
    fn default() -> Self {
        Self {
            dev_signaler: cfg!(debug_assertions).then(|| DEV_SIGNALER_URL.to_string()),
        }
    }
}
