//! Session configuration.
//!
//! Every struct here implements `Default` and deserializes with
//! `#[serde(default)]`, so a JSON config only needs to mention the
//! fields it changes.

use retouch_ops::{Limits, OpError};
use serde::{Deserialize, Serialize};

/// What [`Session::submit`](crate::Session::submit) does while a job is
/// already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Fail with [`SessionError::Busy`](crate::SessionError::Busy).
    #[default]
    Reject,
    /// Queue the request; it runs on the result of the job before it.
    Queue,
}

/// Bounds on how much history a session keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryPolicy {
    /// Maximum number of entries. `None` means unlimited.
    pub max_entries: Option<usize>,
    /// Maximum bytes of result images held. `None` means unlimited.
    pub max_bytes: Option<usize>,
}

impl HistoryPolicy {
    /// Default entry limit.
    pub const DEFAULT_MAX_ENTRIES: usize = 50;

    /// Default memory limit (256 MiB).
    pub const DEFAULT_MAX_BYTES: usize = 256 * 1024 * 1024;

    /// Keep everything.
    pub const UNBOUNDED: Self = Self {
        max_entries: None,
        max_bytes: None,
    };
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            max_entries: Some(Self::DEFAULT_MAX_ENTRIES),
            max_bytes: Some(Self::DEFAULT_MAX_BYTES),
        }
    }
}

/// Everything a [`Session`](crate::Session) can be tuned with.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Parameter ranges handed to every handler.
    pub limits: Limits,
    /// History bounds.
    pub history: HistoryPolicy,
    /// Behaviour of `submit` while busy.
    pub busy: BusyPolicy,
}

impl SessionConfig {
    /// Parse a JSON config and check it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] on malformed JSON and
    /// [`ConfigError::Invalid`] if a limit range or history bound is
    /// unusable.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the limits and history bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a limit range is malformed or a
    /// history bound is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        if self.history.max_entries == Some(0) {
            return Err(ConfigError::Invalid(OpError::invalid(
                "history.max_entries",
                "must keep at least one entry",
            )));
        }
        if self.history.max_bytes == Some(0) {
            return Err(ConfigError::Invalid(OpError::invalid(
                "history.max_bytes",
                "must be greater than zero",
            )));
        }
        Ok(())
    }
}

/// Errors loading a [`SessionConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The JSON could not be parsed.
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is out of its usable range.
    #[error("invalid config: {0}")]
    Invalid(#[from] OpError),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use retouch_ops::Range;

    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        assert_eq!(SessionConfig::from_json("{}").unwrap(), SessionConfig::default());
    }

    #[test]
    fn partial_json_overrides_fields() {
        let config = SessionConfig::from_json(
            r#"{"busy": "queue", "history": {"max_entries": 5}, "limits": {"otsu_classes": {"min": 2, "max": 7}}}"#,
        )
        .unwrap();
        assert_eq!(config.busy, BusyPolicy::Queue);
        assert_eq!(config.history.max_entries, Some(5));
        assert_eq!(
            config.history.max_bytes,
            Some(HistoryPolicy::DEFAULT_MAX_BYTES)
        );
        assert_eq!(config.limits.otsu_classes, Range::new(2.0, 7.0));
    }

    #[test]
    fn null_disables_a_bound() {
        let config = SessionConfig::from_json(r#"{"history": {"max_bytes": null}}"#).unwrap();
        assert_eq!(config.history.max_bytes, None);
        assert_eq!(config.history.max_entries, Some(50));
    }

    #[test]
    fn zero_entries_is_rejected() {
        assert!(matches!(
            SessionConfig::from_json(r#"{"history": {"max_entries": 0}}"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            SessionConfig::from_json("{busy"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn inverted_limit_is_rejected() {
        assert!(matches!(
            SessionConfig::from_json(r#"{"limits": {"edge_threshold": {"min": 1, "max": 0}}}"#),
            Err(ConfigError::Invalid(_))
        ));
    }
}
