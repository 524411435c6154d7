//! The async backend trait.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

/// Asynchronous access to files and directories.
///
/// Implementations must not block the calling thread. Each method is one
/// logical filesystem call; callers rely on that to reason about what is
/// in flight for a given path.
///
/// # Object Safety
///
/// This trait is object-safe: you can use `Box<dyn FileBackend>`.
#[async_trait]
pub trait FileBackend: Send + Sync + 'static {
    /// Read the entire contents of the file at `path`.
    ///
    /// A missing file must be reported as `io::ErrorKind::NotFound`.
    async fn read_file(&self, path: &Path) -> io::Result<Bytes>;

    /// Replace the contents of the file at `path` with `data`.
    async fn write_file(&self, path: &Path, data: Bytes) -> io::Result<()>;

    /// List the names of the entries directly inside the directory at `path`.
    ///
    /// Names are returned in the order the underlying directory
    /// enumeration yields them.
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>>;
}

// Blanket implementations for shared and boxed backends

#[async_trait]
impl<T: FileBackend + ?Sized> FileBackend for Arc<T> {
    async fn read_file(&self, path: &Path) -> io::Result<Bytes> {
        self.as_ref().read_file(path).await
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> io::Result<()> {
        self.as_ref().write_file(path, data).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        self.as_ref().read_dir(path).await
    }
}

#[async_trait]
impl<T: FileBackend + ?Sized> FileBackend for Box<T> {
    async fn read_file(&self, path: &Path) -> io::Result<Bytes> {
        self.as_ref().read_file(path).await
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> io::Result<()> {
        self.as_ref().write_file(path, data).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        self.as_ref().read_dir(path).await
    }
}
