//! Store configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for a `JsonDb`.
///
/// Can be built in code or deserialized from any serde format:
///
/// ```rust
/// use jsondb::StoreConfig;
///
/// let config: StoreConfig = serde_json::from_str(r#"{"root": "data"}"#).unwrap();
/// assert_eq!(config.attachment_extension, ".bin");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the documents.
    pub root: PathBuf,

    /// Suffix of the attachment file stored next to each document.
    pub attachment_extension: String,

    /// Create missing parent directories when writing a document.
    pub create_parent_dirs: bool,

    /// Buffered events per subscriber before slow subscribers start lagging.
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("db"),
            attachment_extension: ".bin".to_string(),
            create_parent_dirs: true,
            event_capacity: 256,
        }
    }
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>, attachment_extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            attachment_extension: attachment_extension.into(),
            ..Self::default()
        }
    }

    pub fn with_parent_dirs(mut self, create: bool) -> Self {
        self.create_parent_dirs = create;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
