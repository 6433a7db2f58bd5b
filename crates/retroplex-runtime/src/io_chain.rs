// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The ordered I/O chain.
//!
//! Persistence is asynchronous and may be issued by overlapping instance
//! lifetimes for the same file. The chain keeps, per path, the completion signal
//! of the most recently scheduled operation. Scheduling swaps in a new signal
//! and hands the previous one to the new operation, which waits for it before
//! touching the file. Operations on one path therefore run strictly in
//! scheduling order; operations on different paths run in parallel.
//!
//! A completion signal is a channel whose only sender is dropped once the
//! operation has finished or failed. An abandoned operation still waits for its
//! own predecessor before releasing the next one, so abandoning never lets a
//! later operation overtake an earlier one. Spent signals are forgotten, so the
//! chain only tracks paths with work in flight.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use retroplex_core::PersistError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, TryLockError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Worker count of the process-wide chain unless configured otherwise.
pub const DEFAULT_IO_WORKERS: usize = 2;

type Completion = Receiver<()>;
type Job = Box<dyn FnOnce() + Send>;
type Links = Mutex<HashMap<PathBuf, Completion>>;

/// A reserved position in a path's chain.
///
/// The holder performs its I/O through [`run`](Self::run). Dropping a link
/// without running it releases the next operation on the path once the
/// previous one has completed.
#[derive(Debug)]
pub struct ChainLink {
    path: PathBuf,
    predecessor: Option<Completion>,
    done: Option<Sender<()>>,
    signal: Completion,
    links: Weak<Links>,
}

impl ChainLink {
    /// The path this link orders.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the previous operation on the path, runs `op`, then releases
    /// the next one.
    ///
    /// Must not be called from inside [`OrderedIoChain::schedule`].
    pub fn run<T>(mut self, op: impl FnOnce(&Path) -> T) -> T {
        if let Some(predecessor) = self.predecessor.take() {
            // Disconnection is the signal; success or failure does not matter.
            let _ = predecessor.recv();
        }
        let output = op(&self.path);
        self.done = None;
        if let Some(links) = self.links.upgrade() {
            let mut links = links.lock().unwrap_or_else(PoisonError::into_inner);
            forget_signal(&mut links, &self.path, &self.signal);
        }
        output
    }
}

impl Drop for ChainLink {
    fn drop(&mut self) {
        let Some(done) = self.done.take() else {
            return;
        };
        let pending = self
            .predecessor
            .take()
            .filter(|predecessor| matches!(predecessor.try_recv(), Err(TryRecvError::Empty)));
        let Some(predecessor) = pending else {
            drop(done);
            // The holder may be dropping this link inside `schedule`.
            let links = self.links.upgrade();
            let guard = match links.as_deref().map(Mutex::try_lock) {
                Some(Ok(guard)) => Some(guard),
                Some(Err(TryLockError::Poisoned(poisoned))) => Some(poisoned.into_inner()),
                Some(Err(TryLockError::WouldBlock)) | None => None,
            };
            if let Some(mut guard) = guard {
                forget_signal(&mut guard, &self.path, &self.signal);
            }
            return;
        };

        let path = std::mem::take(&mut self.path);
        let signal = self.signal.clone();
        let links = std::mem::take(&mut self.links);
        let spawned = thread::Builder::new()
            .name("retroplex-io-release".to_owned())
            .spawn(move || {
                let _ = predecessor.recv();
                drop(done);
                if let Some(links) = links.upgrade() {
                    let mut links = links.lock().unwrap_or_else(PoisonError::into_inner);
                    forget_signal(&mut links, &path, &signal);
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to defer release of an abandoned I/O operation: {e}");
        }
    }
}

/// Removes `path`'s entry if `signal` is still the latest one recorded for it.
fn forget_signal(links: &mut HashMap<PathBuf, Completion>, path: &Path, signal: &Completion) {
    if links.get(path).is_some_and(|latest| latest.same_channel(signal)) {
        links.remove(path);
    }
}

/// The eventual result of a scheduled operation.
#[derive(Debug)]
pub struct IoTicket<T> {
    rx: Receiver<Result<T, PersistError>>,
}

impl<T> IoTicket<T> {
    pub(crate) fn pair() -> (Sender<Result<T, PersistError>>, Self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (tx, Self { rx })
    }

    /// Blocks until the operation has finished.
    pub fn wait(self) -> Result<T, PersistError> {
        self.rx.recv().unwrap_or(Err(PersistError::Dropped))
    }

    /// Blocks for at most `timeout`. Returns `None` if the operation is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, PersistError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(PersistError::Dropped)),
        }
    }

    /// Returns the result if the operation has already finished.
    pub fn try_take(&self) -> Option<Result<T, PersistError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(PersistError::Dropped)),
        }
    }
}

/// Bytes a deferred write is waiting for.
///
/// Dropping it without calling [`fulfil`](Self::fulfil) cancels the write.
#[derive(Debug)]
pub struct PendingBytes {
    tx: Sender<Result<Vec<u8>, PersistError>>,
}

impl PendingBytes {
    /// Hands over the bytes to write.
    pub fn fulfil(self, bytes: Vec<u8>) {
        let _ = self.tx.send(Ok(bytes));
    }

    /// Cancels the write with a reason reported through its ticket.
    pub fn reject(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(PersistError::Rejected(reason.into())));
    }
}

/// Reads a whole file. A missing file is `Ok(None)`.
pub fn read_file(path: &Path) -> Result<Option<Vec<u8>>, PersistError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PersistError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Replaces a file's contents, creating parent directories as needed.
pub fn write_file(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let io_error = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, bytes).map_err(io_error)
}

struct WorkerPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn new(count: usize) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let workers = (0..count.max(1))
            .filter_map(|i| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("retroplex-io-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .map_err(|e| log::error!("Failed to spawn I/O worker {i}: {e}"))
                    .ok()
            })
            .collect();
        Self {
            tx: Some(tx),
            workers,
        }
    }

    fn submit(&self, job: Job) {
        let sent = self.tx.as_ref().is_some_and(|tx| tx.send(job).is_ok());
        if !sent {
            log::error!("I/O worker pool is gone; operation dropped");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.tx = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Path-keyed ordering of persistence operations, executed by a worker pool.
pub struct OrderedIoChain {
    links: Arc<Links>,
    pool: WorkerPool,
}

static GLOBAL_CHAIN: OnceLock<Arc<OrderedIoChain>> = OnceLock::new();

impl OrderedIoChain {
    /// Creates a chain with its own pool of `workers` threads.
    pub fn new(workers: usize) -> Self {
        Self {
            links: Arc::new(Mutex::new(HashMap::new())),
            pool: WorkerPool::new(workers),
        }
    }

    /// Sets the worker count of the process-wide chain. Only effective before
    /// the first call to [`global`](Self::global).
    pub fn init_global(workers: usize) -> bool {
        GLOBAL_CHAIN
            .set(Arc::new(OrderedIoChain::new(workers)))
            .is_ok()
    }

    /// The process-wide chain.
    pub fn global() -> Arc<OrderedIoChain> {
        Arc::clone(GLOBAL_CHAIN.get_or_init(|| Arc::new(OrderedIoChain::new(DEFAULT_IO_WORKERS))))
    }

    /// Schedules one or more operations atomically.
    ///
    /// Everything scheduled inside `f` is ordered after everything scheduled
    /// before this call and before everything scheduled after it. Work done in
    /// `f` should be short and must not block: the chain is locked for its duration.
    pub fn schedule<R>(&self, f: impl FnOnce(&mut IoSchedule<'_>) -> R) -> R {
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        let mut schedule = IoSchedule {
            links: &mut *links,
            registry: Arc::downgrade(&self.links),
            pool: &self.pool,
        };
        f(&mut schedule)
    }

    /// Reserves the next position on `path`.
    pub fn link(&self, path: &Path) -> ChainLink {
        self.schedule(|s| s.link(path))
    }

    /// Schedules a read of `path`. A missing file yields `Ok(None)`.
    pub fn read(&self, path: &Path) -> IoTicket<Option<Vec<u8>>> {
        self.schedule(|s| s.read(path))
    }

    /// Schedules a write of `bytes` to `path`.
    pub fn write(&self, path: &Path, bytes: Vec<u8>) -> IoTicket<()> {
        self.schedule(|s| s.write(path, bytes))
    }

    /// Number of paths with an operation that has not completed yet.
    pub fn tracked_paths(&self) -> usize {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Scheduling access to a locked [`OrderedIoChain`].
pub struct IoSchedule<'a> {
    links: &'a mut HashMap<PathBuf, Completion>,
    registry: Weak<Links>,
    pool: &'a WorkerPool,
}

impl IoSchedule<'_> {
    /// Reserves the next position on `path`.
    pub fn link(&mut self, path: &Path) -> ChainLink {
        let (done, completion) = crossbeam_channel::bounded(0);
        let predecessor = self.links.insert(path.to_path_buf(), completion.clone());
        ChainLink {
            path: path.to_path_buf(),
            predecessor,
            done: Some(done),
            signal: completion,
            links: Weak::clone(&self.registry),
        }
    }

    /// Schedules a read of `path` on the worker pool.
    pub fn read(&mut self, path: &Path) -> IoTicket<Option<Vec<u8>>> {
        let link = self.link(path);
        let (tx, ticket) = IoTicket::pair();
        self.pool.submit(Box::new(move || {
            let result = link.run(read_file);
            if let Err(e) = &result {
                log::error!("Chained read failed: {e}");
            }
            let _ = tx.send(result);
        }));
        ticket
    }

    /// Schedules a write of `bytes` to `path` on the worker pool.
    pub fn write(&mut self, path: &Path, bytes: Vec<u8>) -> IoTicket<()> {
        let (pending, ticket) = self.write_when_ready(path);
        pending.fulfil(bytes);
        ticket
    }

    /// Schedules a write whose bytes are supplied later through the returned
    /// [`PendingBytes`].
    ///
    /// The write keeps its position in the chain; later operations on the path
    /// wait until the bytes arrive (or are abandoned) and the write is done. An
    /// abandoned write still completes only after its predecessor.
    pub fn write_when_ready(&mut self, path: &Path) -> (PendingBytes, IoTicket<()>) {
        let link = self.link(path);
        let (bytes_tx, bytes_rx) = crossbeam_channel::bounded::<Result<Vec<u8>, PersistError>>(1);
        let (tx, ticket) = IoTicket::pair();
        self.pool.submit(Box::new(move || {
            let result = match bytes_rx.recv() {
                Ok(Ok(bytes)) => link.run(|path| write_file(path, &bytes)),
                Ok(Err(e)) => link.run(|_| Err(e)),
                Err(_) => link.run(|_| Err(PersistError::Dropped)),
            };
            match &result {
                Ok(()) | Err(PersistError::Dropped) => {}
                Err(e) => log::error!("Chained write failed: {e}"),
            }
            let _ = tx.send(result);
        }));
        (PendingBytes { tx: bytes_tx }, ticket)
    }
}
