//! The key lock manager.
//!
//! Every busy path owns a `Queue` of pending operations in the lock table.
//! The front of a path's queue is the operation currently running against
//! the disk; everything behind it waits. Reads arriving while a read batch
//! sits at the back of the queue join that batch and share its single
//! filesystem read. Writes always get their own queue entry.
//!
//! When an operation finishes, the queue advances (dispatching the next
//! operation or unlocking the path) *before* any caller hears about the
//! outcome, so a callback never observes a half-advanced queue.

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use jsondb_fs_backend::{FileBackend, TokioFileBackend};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::event::StoreEvent;
use crate::queue::Queue;
use crate::record::{Entry, Record};

const DOCUMENT_EXTENSION: &str = ".json";

type ReadCallback = Box<dyn FnOnce(Result<Entry>) + Send + 'static>;
type WriteCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// One or more reads of the same path served by a single load.
struct ReadBatch {
    ticket: u64,
    path: String,
    batch: Vec<ReadCallback>,
}

struct WriteOp {
    ticket: u64,
    path: String,
    record: Arc<Record>,
    callback: WriteCallback,
}

enum Pending {
    Read(ReadBatch),
    Write(WriteOp),
}

impl Pending {
    fn ticket(&self) -> u64 {
        match self {
            Pending::Read(read) => read.ticket,
            Pending::Write(write) => write.ticket,
        }
    }

    fn path(&self) -> &str {
        match self {
            Pending::Read(read) => &read.path,
            Pending::Write(write) => &write.path,
        }
    }
}

type LockTable = HashMap<String, Queue<Pending>>;

/// An operation that reached the front of its queue and needs a task.
enum Task {
    Read {
        path: String,
        ticket: u64,
    },
    Write {
        path: String,
        ticket: u64,
        record: Arc<Record>,
    },
}

/// A JSON document store that serializes operations per path.
///
/// `JsonDb` is cheap to clone; clones share the same lock table.
///
/// All `get*`/`put*` methods enqueue immediately and run their I/O on
/// Tokio tasks. A store built inside a Tokio runtime keeps using that
/// runtime and can be driven from any thread; one built outside must be
/// used from within a runtime.
///
/// # Example
///
/// ```rust,ignore
/// use jsondb::{JsonDb, StoreConfig};
/// use serde_json::json;
///
/// let db = JsonDb::open(StoreConfig::new("data", ".bin"))?;
/// db.put("users/alice", json!({"age": 30, "attachment": "avatar"})).await?;
///
/// let record = db.get("users/alice").await?.into_record().unwrap();
/// assert_eq!(record.attachment_str(), Some("avatar"));
/// ```
pub struct JsonDb<B: FileBackend = TokioFileBackend> {
    inner: Arc<Inner<B>>,
}

impl<B: FileBackend> Clone for JsonDb<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<B> {
    root: PathBuf,
    attachment_extension: String,
    backend: B,
    locks: Mutex<LockTable>,
    events: broadcast::Sender<StoreEvent>,
    next_ticket: AtomicU64,
    runtime: Option<Handle>,
}

impl JsonDb<TokioFileBackend> {
    /// Open a store on the local filesystem.
    ///
    /// The root directory is created if it does not exist. An existing root
    /// that is not a directory is an error.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let root = prepare_root(&config.root)?;
        let backend = TokioFileBackend::new().with_parent_dirs(config.create_parent_dirs);
        Ok(Self::build(root, &config, backend))
    }
}

impl<B: FileBackend> JsonDb<B> {
    /// Create a store over any backend.
    ///
    /// `config.root` is used as given; no directory checks are made.
    pub fn with_backend(config: StoreConfig, backend: B) -> Self {
        let root = config.root.clone();
        Self::build(root, &config, backend)
    }

    fn build(root: PathBuf, config: &StoreConfig, backend: B) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                root,
                attachment_extension: config.attachment_extension.clone(),
                backend,
                locks: Mutex::new(HashMap::new()),
                events,
                next_ticket: AtomicU64::new(0),
                runtime: Handle::try_current().ok(),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Read `path`, delivering the outcome to `callback`.
    ///
    /// If a read batch is already waiting at the back of the path's queue,
    /// `callback` joins it and no new read is scheduled.
    pub fn get_with<F>(&self, path: &str, callback: F)
    where
        F: FnOnce(Result<Entry>) + Send + 'static,
    {
        let inner = &self.inner;
        let runtime = inner.runtime();
        let task = {
            let mut locks = inner.lock_table();

            if let Some(queue) = locks.get_mut(path) {
                if let Some(Pending::Read(read)) = queue.last_mut() {
                    log::debug!("Read on locked path {:?}: batched", path);
                    read.batch.push(Box::new(callback));
                    return;
                }
                log::debug!("Read on locked path {:?}: queued", path);
                queue.push(Pending::Read(ReadBatch {
                    ticket: inner.ticket(),
                    path: path.to_string(),
                    batch: vec![Box::new(callback)],
                }));
                return;
            }

            log::debug!("Read on idle path {:?}", path);
            let mut queue = Queue::new();
            queue.push(Pending::Read(ReadBatch {
                ticket: inner.ticket(),
                path: path.to_string(),
                batch: vec![Box::new(callback)],
            }));
            locks.insert(path.to_string(), queue);
            inner.process_queue(&mut locks, path)
        };
        if let Some(task) = task {
            inner.spawn(&runtime, task);
        }
    }

    /// Replace the record at `path`, delivering the outcome to `callback`.
    ///
    /// Writes are never merged; each one runs on its own, in arrival order.
    pub fn put_with<F>(&self, path: &str, record: impl Into<Record>, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let inner = &self.inner;
        let write = Pending::Write(WriteOp {
            ticket: inner.ticket(),
            path: path.to_string(),
            record: Arc::new(record.into()),
            callback: Box::new(callback),
        });

        let runtime = inner.runtime();
        let task = {
            let mut locks = inner.lock_table();
            if let Some(queue) = locks.get_mut(path) {
                log::debug!("Write on locked path {:?}: queued", path);
                queue.push(write);
                return;
            }

            log::debug!("Write on idle path {:?}", path);
            let mut queue = Queue::new();
            queue.push(write);
            locks.insert(path.to_string(), queue);
            inner.process_queue(&mut locks, path)
        };
        if let Some(task) = task {
            inner.spawn(&runtime, task);
        }
    }

    /// Read `path`.
    ///
    /// The read is enqueued before this returns; awaiting only waits for
    /// the outcome.
    pub fn get(&self, path: &str) -> impl Future<Output = Result<Entry>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.get_with(path, move |result| {
            let _ = tx.send(result);
        });
        let path = path.to_string();
        async move { rx.await.unwrap_or_else(|_| Err(Error::Abandoned { path })) }
    }

    /// Replace the record at `path`.
    ///
    /// The write is enqueued before this returns; awaiting only waits for
    /// the outcome.
    pub fn put(
        &self,
        path: &str,
        record: impl Into<Record>,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.put_with(path, record, move |result| {
            let _ = tx.send(result);
        });
        let path = path.to_string();
        async move { rx.await.unwrap_or_else(|_| Err(Error::Abandoned { path })) }
    }

    /// Read the document at `path` into `T`, ignoring any attachment.
    pub fn get_as<T: DeserializeOwned + 'static>(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<T>> + Send + 'static {
        let read = self.get(path);
        let path = path.to_string();
        async move {
            match read.await? {
                Entry::Record(record) => record.document_as(&path),
                Entry::Listing(_) => Err(Error::NotARecord { path }),
            }
        }
    }

    /// Serialize `data` and write it to `path`.
    ///
    /// A top-level `attachment` field goes to the attachment file.
    pub fn put_as<T: Serialize + ?Sized>(
        &self,
        path: &str,
        data: &T,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let write = Record::from_serializable(path, data).map(|record| self.put(path, record));
        async move { write?.await }
    }

    /// Subscribe to change and unlock events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// Whether `path` has pending or running operations.
    pub fn is_busy(&self, path: &str) -> bool {
        self.inner.lock_table().contains_key(path)
    }

    /// Number of paths with pending or running operations.
    pub fn busy_count(&self) -> usize {
        self.inner.lock_table().len()
    }

    /// Wait until `path` has no pending or running operations.
    pub async fn wait_idle(&self, path: &str) {
        let mut events = self.subscribe();
        if !self.is_busy(path) {
            return;
        }
        loop {
            match events.recv().await {
                Ok(StoreEvent::Unlock { path: unlocked }) if unlocked == path => return,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if !self.is_busy(path) {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

impl<B: FileBackend> Inner<B> {
    fn lock_table(&self) -> MutexGuard<'_, LockTable> {
        self.locks.lock().expect("lock table poisoned")
    }

    fn ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    /// The runtime that runs I/O tasks.
    ///
    /// Resolved before the lock table is touched, so a missing runtime
    /// panics without leaving a path locked.
    fn runtime(&self) -> Handle {
        match &self.runtime {
            Some(handle) => handle.clone(),
            None => Handle::current(),
        }
    }

    /// Pick the operation at the front of `path`'s queue, or unlock the
    /// path if the queue is empty.
    ///
    /// The returned task must be spawned once the lock table is released.
    fn process_queue(&self, locks: &mut LockTable, path: &str) -> Option<Task> {
        let Some(queue) = locks.get_mut(path) else {
            corrupted(path);
        };
        let path = path.to_string();
        match queue.first() {
            None => {
                log::debug!("Unlocking {:?}", path);
                locks.remove(&path);
                // No subscribers is fine.
                let _ = self.events.send(StoreEvent::Unlock { path });
                None
            }
            Some(Pending::Read(read)) => {
                log::debug!("Process read {:?}", path);
                Some(Task::Read {
                    ticket: read.ticket,
                    path,
                })
            }
            Some(Pending::Write(write)) => {
                log::debug!("Process write {:?}", path);
                Some(Task::Write {
                    ticket: write.ticket,
                    record: Arc::clone(&write.record),
                    path,
                })
            }
        }
    }

    fn spawn(self: &Arc<Self>, runtime: &Handle, task: Task) {
        let inner = Arc::clone(self);
        match task {
            Task::Read { path, ticket } => {
                runtime.spawn(async move {
                    let result = inner.load(&path).await;
                    inner.on_read_complete(&path, ticket, result);
                });
            }
            Task::Write {
                path,
                ticket,
                record,
            } => {
                runtime.spawn(async move {
                    let result = inner.store(&path, &record).await;
                    inner.on_write_complete(&path, ticket, result);
                });
            }
        }
    }

    /// Remove the finished operation from the front of `path`'s queue.
    fn finish(&self, locks: &mut LockTable, path: &str, ticket: u64) -> Pending {
        match locks.get_mut(path).and_then(Queue::shift) {
            Some(op) if op.ticket() == ticket && op.path() == path => op,
            _ => corrupted(path),
        }
    }

    fn on_read_complete(self: &Arc<Self>, path: &str, ticket: u64, result: Result<Entry>) {
        log::debug!("Read finished {:?}", path);
        let (read, next) = {
            let mut locks = self.lock_table();
            let Pending::Read(read) = self.finish(&mut locks, path, ticket) else {
                corrupted(path);
            };
            let next = self.process_queue(&mut locks, path);
            (read, next)
        };
        if let Some(next) = next {
            self.spawn(&self.runtime(), next);
        }

        if let Err(e) = &result {
            log::warn!("Read of {:?} failed: {}", path, e);
        }
        for callback in read.batch {
            callback(result.clone());
        }
    }

    fn on_write_complete(self: &Arc<Self>, path: &str, ticket: u64, result: Result<()>) {
        log::debug!("Write finished {:?}", path);
        let (write, next) = {
            let mut locks = self.lock_table();
            let Pending::Write(write) = self.finish(&mut locks, path, ticket) else {
                corrupted(path);
            };
            let next = self.process_queue(&mut locks, path);
            (write, next)
        };
        if let Some(next) = next {
            self.spawn(&self.runtime(), next);
        }

        if let Err(e) = &result {
            log::warn!("Write of {:?} failed: {}", path, e);
        }
        let error = result.as_ref().err().cloned();
        (write.callback)(result);

        let _ = self.events.send(StoreEvent::Change {
            path: write.path,
            record: write.record,
            error,
        });
    }

    fn document_path(&self, path: &str) -> PathBuf {
        self.root.join(format!("{}{}", path, DOCUMENT_EXTENSION))
    }

    fn attachment_path(&self, path: &str) -> PathBuf {
        self.root
            .join(format!("{}{}", path, self.attachment_extension))
    }

    fn directory_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }

    /// Load the document at `path`, or list the directory there if there
    /// is no document.
    async fn load(&self, path: &str) -> Result<Entry> {
        let document_path = self.document_path(path);
        let json = match self.backend.read_file(&document_path).await {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return self.list(path).await,
            Err(e) => return Err(Error::io(document_path, e)),
        };

        let document: Value = serde_json::from_slice(&json).map_err(|e| Error::InvalidJson {
            path: document_path.clone(),
            message: e.to_string(),
        })?;

        let attachment_path = self.attachment_path(path);
        let attachment = match self.backend.read_file(&attachment_path).await {
            Ok(data) => Some(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::io(attachment_path, e)),
        };

        Ok(Entry::Record(Record {
            document,
            attachment,
        }))
    }

    async fn list(&self, path: &str) -> Result<Entry> {
        let dir = self.directory_path(path);
        let names = self
            .backend
            .read_dir(&dir)
            .await
            .map_err(|e| Error::io(&dir, e))?;

        let entries = names
            .iter()
            .filter_map(|name| name.strip_suffix(DOCUMENT_EXTENSION))
            .map(str::to_owned)
            .collect();
        Ok(Entry::Listing(entries))
    }

    /// Write the document, then the attachment if the record has one.
    ///
    /// An attachment left over from an earlier write is not removed.
    async fn store(&self, path: &str, record: &Record) -> Result<()> {
        let json = record.encode_document(path)?;
        let document_path = self.document_path(path);
        self.backend
            .write_file(&document_path, json)
            .await
            .map_err(|e| Error::io(&document_path, e))?;

        if let Some(attachment) = &record.attachment {
            let attachment_path = self.attachment_path(path);
            self.backend
                .write_file(&attachment_path, attachment.clone())
                .await
                .map_err(|e| Error::io(&attachment_path, e))?;
        }
        Ok(())
    }
}

/// The lock table no longer matches the operations in flight.
fn corrupted(path: &str) -> ! {
    log::error!("Corrupted queue {:?}", path);
    panic!("corrupted queue for path {:?}", path);
}

fn prepare_root(root: &Path) -> Result<PathBuf> {
    let invalid = |source: io::Error| Error::RootPathInvalid {
        path: root.to_path_buf(),
        source: Arc::new(source),
    };

    let attr = match fs::metadata(root) {
        Ok(attr) => attr,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("Creating root directory {}", root.display());
            fs::create_dir_all(root).map_err(invalid)?;
            fs::metadata(root).map_err(invalid)?
        }
        Err(e) => return Err(invalid(e)),
    };

    if !attr.is_dir() {
        return Err(Error::RootNotDirectory {
            path: root.to_path_buf(),
        });
    }

    root.canonicalize().map_err(invalid)
}
