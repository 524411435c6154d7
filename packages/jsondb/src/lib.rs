//! jsondb: a document store that keeps each JSON record in its own file.
//!
//! A record at path `users/alice` lives in `<root>/users/alice.json`, with
//! an optional raw attachment next to it in `<root>/users/alice.bin` (the
//! suffix is configurable). Reading a path that has no document lists the
//! records in the directory at that path instead.
//!
//! Operations on the same path never overlap on disk. Each busy path has a
//! queue of pending operations; concurrent reads are folded into a single
//! filesystem read, and writes run one at a time in arrival order. Paths
//! that don't share a key proceed independently.
//!
//! # Example
//!
//! ```rust,ignore
//! use jsondb::{Entry, JsonDb, StoreConfig};
//! use serde_json::json;
//!
//! let db = JsonDb::open(StoreConfig::new("data", ".bin"))?;
//! db.put("dir/a", json!({})).await?;
//! db.put("dir/b", json!({})).await?;
//!
//! let Entry::Listing(names) = db.get("dir").await? else { unreachable!() };
//! assert_eq!(names.len(), 2);
//! ```

mod config;
mod db;
mod error;
mod event;
mod queue;
mod record;

pub use config::StoreConfig;
pub use db::JsonDb;
pub use error::{Error, Result};
pub use event::StoreEvent;
pub use queue::Queue;
pub use record::{Entry, Record, ATTACHMENT_KEY};

pub use jsondb_fs_backend as fs_backend;
pub use jsondb_fs_backend::{FileBackend, TokioFileBackend};
