//! Backend over `tokio::fs`.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

use crate::FileBackend;

/// A `FileBackend` that talks to the local filesystem through `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct TokioFileBackend {
    create_parent_dirs: bool,
}

impl TokioFileBackend {
    /// Create a backend that writes files only into existing directories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create missing parent directories before every write.
    pub fn with_parent_dirs(mut self, create: bool) -> Self {
        self.create_parent_dirs = create;
        self
    }
}

#[async_trait]
impl FileBackend for TokioFileBackend {
    async fn read_file(&self, path: &Path) -> io::Result<Bytes> {
        log::debug!("Reading {}...", path.display());
        tokio::fs::read(path).await.map(Bytes::from)
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> io::Result<()> {
        log::debug!("Writing {}...", path.display());
        if self.create_parent_dirs {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, &data).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        log::debug!("Listing {}...", path.display());
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            // Names that are not valid UTF-8 cannot be record keys.
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_works() {
        let dir = tempfile::tempdir().unwrap();
        let backend = TokioFileBackend::new();
        let file = dir.path().join("a.json");

        backend
            .write_file(&file, Bytes::from_static(b"{\"a\":1}"))
            .await
            .unwrap();

        let data = backend.read_file(&file).await.unwrap();
        assert_eq!(data, Bytes::from_static(b"{\"a\":1}"));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = TokioFileBackend::new();

        let err = backend
            .read_file(&dir.path().join("missing.json"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn write_without_parent_fails_unless_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("a.json");

        let strict = TokioFileBackend::new();
        assert!(strict.write_file(&file, Bytes::new()).await.is_err());

        let lenient = TokioFileBackend::new().with_parent_dirs(true);
        lenient.write_file(&file, Bytes::new()).await.unwrap();
        assert!(file.exists());
    }

    #[tokio::test]
    async fn read_dir_lists_entry_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("b.bin"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let backend = TokioFileBackend::new();
        let mut names = backend.read_dir(dir.path()).await.unwrap();
        names.sort();
        assert_eq!(names, vec!["a.json", "b.bin", "sub"]);
    }
}
