//! jsondb-fs-backend: the file-I/O layer underneath jsondb.
//!
//! This is the narrow waist between the key lock manager and the disk.
//! Everything at this level is raw bytes and `std::io::Error` - no JSON,
//! no record semantics, no locking.
//!
//! A backend offers exactly three operations, each a single suspension
//! point:
//! - `read_file` - the whole contents of one file
//! - `write_file` - replace the whole contents of one file
//! - `read_dir` - the names of the entries in one directory
//!
//! # Example
//!
//! ```rust,ignore
//! use jsondb_fs_backend::{FileBackend, TokioFileBackend};
//! use bytes::Bytes;
//!
//! let backend = TokioFileBackend::new();
//! backend.write_file("/tmp/db/a.json".as_ref(), Bytes::from_static(b"{}")).await?;
//! let names = backend.read_dir("/tmp/db".as_ref()).await?;
//! ```
//!
//! # Test Support
//!
//! Enable the `test-utils` feature for `MemoryBackend`, an in-memory tree
//! that records every operation it serves.

pub use bytes::Bytes;

mod backend;
mod tokio_fs;

pub use backend::FileBackend;
pub use tokio_fs::TokioFileBackend;

#[cfg(any(test, feature = "test-utils"))]
mod memory;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::{MemoryBackend, Op, OpKind, Phase};
