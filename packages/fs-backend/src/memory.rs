//! In-memory backend for tests.
//!
//! Besides serving reads and writes from a map, `MemoryBackend` keeps a
//! trace of every call it receives and tracks how many calls touch each
//! file at once, and each record at once. A record's key is its file path
//! without the last extension, so `p.json` and `p.bin` share the key `p`;
//! a listing of the directory `p` counts against `p` as well. Tests use this
//! to check what the lock manager actually sent to the disk.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::FileBackend;

/// Which backend call an `Op` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Read,
    Write,
    List,
}

/// Whether an `Op` marks the start or the end of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Start,
    Finish,
}

/// One entry in the backend's trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub kind: OpKind,
    pub phase: Phase,
    pub path: PathBuf,
}

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, Bytes>,
    dirs: BTreeSet<PathBuf>,
    trace: Vec<Op>,
    in_flight: HashMap<PathBuf, usize>,
    max_in_flight: HashMap<PathBuf, usize>,
    key_in_flight: HashMap<PathBuf, usize>,
    key_max_in_flight: HashMap<PathBuf, usize>,
    failures: HashMap<PathBuf, io::ErrorKind>,
}

/// An in-memory `FileBackend` with an operation trace.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    latency: Duration,
}

impl MemoryBackend {
    /// Create an empty backend that completes every call immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every call open for `latency` before it completes.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Seed a file without recording a trace entry.
    pub fn insert_file(&self, path: impl Into<PathBuf>, data: impl Into<Bytes>) {
        let path = path.into();
        let mut state = self.lock();
        add_ancestors(&mut state.dirs, &path);
        state.files.insert(path, data.into());
    }

    /// Seed an empty directory without recording a trace entry.
    pub fn insert_dir(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut state = self.lock();
        add_ancestors(&mut state.dirs, &path);
        state.dirs.insert(path);
    }

    /// Make every future call touching `path` fail with `kind`.
    pub fn fail_on(&self, path: impl Into<PathBuf>, kind: io::ErrorKind) {
        self.lock().failures.insert(path.into(), kind);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().files.contains_key(path)
    }

    /// Current contents of the file at `path`, if any.
    pub fn file(&self, path: &Path) -> Option<Bytes> {
        self.lock().files.get(path).cloned()
    }

    /// Every call seen so far, in the order starts and finishes happened.
    pub fn trace(&self) -> Vec<Op> {
        self.lock().trace.clone()
    }

    /// Number of calls of `kind` that have started on `path`.
    pub fn count(&self, kind: OpKind, path: &Path) -> usize {
        self.lock()
            .trace
            .iter()
            .filter(|op| op.kind == kind && op.phase == Phase::Start && op.path == path)
            .count()
    }

    /// The most calls that were ever in flight on `path` at the same time.
    pub fn max_in_flight(&self, path: &Path) -> usize {
        self.lock().max_in_flight.get(path).copied().unwrap_or(0)
    }

    /// The most calls that were ever in flight on the record `key` at the
    /// same time, counting its document, its attachment and its listing.
    pub fn max_in_flight_for_key(&self, key: &Path) -> usize {
        self.lock().key_max_in_flight.get(key).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A panicking test thread must not hide the trace from the others.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn begin(&self, kind: OpKind, path: &Path) -> io::Result<()> {
        {
            let mut state = self.lock();
            state.trace.push(Op {
                kind,
                phase: Phase::Start,
                path: path.to_path_buf(),
            });
            let in_flight = state.in_flight.entry(path.to_path_buf()).or_insert(0);
            *in_flight += 1;
            let now = *in_flight;
            let max = state.max_in_flight.entry(path.to_path_buf()).or_insert(0);
            *max = (*max).max(now);

            let key = record_key(kind, path);
            let in_flight = state.key_in_flight.entry(key.clone()).or_insert(0);
            *in_flight += 1;
            let now = *in_flight;
            let max = state.key_max_in_flight.entry(key).or_insert(0);
            *max = (*max).max(now);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.lock().failures.get(path) {
            Some(kind) => Err(io::Error::new(*kind, "injected failure")),
            None => Ok(()),
        }
    }

    fn finish(&self, kind: OpKind, path: &Path) {
        let mut state = self.lock();
        if let Some(in_flight) = state.in_flight.get_mut(path) {
            *in_flight = in_flight.saturating_sub(1);
        }
        if let Some(in_flight) = state.key_in_flight.get_mut(&record_key(kind, path)) {
            *in_flight = in_flight.saturating_sub(1);
        }
        state.trace.push(Op {
            kind,
            phase: Phase::Finish,
            path: path.to_path_buf(),
        });
    }
}

fn record_key(kind: OpKind, path: &Path) -> PathBuf {
    match kind {
        OpKind::List => path.to_path_buf(),
        OpKind::Read | OpKind::Write => path.with_extension(""),
    }
}

fn add_ancestors(dirs: &mut BTreeSet<PathBuf>, path: &Path) {
    for ancestor in path.ancestors().skip(1) {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        dirs.insert(ancestor.to_path_buf());
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file or directory: {}", path.display()),
    )
}

#[async_trait]
impl FileBackend for MemoryBackend {
    async fn read_file(&self, path: &Path) -> io::Result<Bytes> {
        let result = match self.begin(OpKind::Read, path).await {
            Ok(()) => {
                let state = self.lock();
                match state.files.get(path) {
                    Some(data) => Ok(data.clone()),
                    None if state.dirs.contains(path) => Err(io::Error::other(format!(
                        "is a directory: {}",
                        path.display()
                    ))),
                    None => Err(not_found(path)),
                }
            }
            Err(err) => Err(err),
        };
        self.finish(OpKind::Read, path);
        result
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> io::Result<()> {
        let result = match self.begin(OpKind::Write, path).await {
            Ok(()) => {
                let mut state = self.lock();
                add_ancestors(&mut state.dirs, path);
                state.files.insert(path.to_path_buf(), data);
                Ok(())
            }
            Err(err) => Err(err),
        };
        self.finish(OpKind::Write, path);
        result
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let result = match self.begin(OpKind::List, path).await {
            Ok(()) => {
                let state = self.lock();
                if state.dirs.contains(path) {
                    let children = state
                        .files
                        .keys()
                        .chain(state.dirs.iter())
                        .filter(|child| child.parent() == Some(path))
                        .filter_map(|child| child.file_name())
                        .filter_map(|name| name.to_str().map(str::to_owned))
                        .collect();
                    Ok(children)
                } else if state.files.contains_key(path) {
                    Err(io::Error::other(format!(
                        "not a directory: {}",
                        path.display()
                    )))
                } else {
                    Err(not_found(path))
                }
            }
            Err(err) => Err(err),
        };
        self.finish(OpKind::List, path);
        result
    }
}
