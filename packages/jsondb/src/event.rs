//! Notifications published by a `JsonDb`.

use std::sync::Arc;

use crate::error::Error;
use crate::record::Record;

/// An event observed on the store.
///
/// Events are sent only after the path's queue has advanced, so by the
/// time a subscriber sees one the next queued operation (if any) is
/// already running.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A write finished, successfully or not.
    Change {
        path: String,
        record: Arc<Record>,
        /// The error the writer received, if the write failed.
        error: Option<Error>,
    },

    /// The path's queue drained and it is idle again.
    Unlock { path: String },
}

impl StoreEvent {
    pub fn path(&self) -> &str {
        match self {
            StoreEvent::Change { path, .. } | StoreEvent::Unlock { path } => path,
        }
    }

    pub fn is_unlock(&self) -> bool {
        matches!(self, StoreEvent::Unlock { .. })
    }
}
