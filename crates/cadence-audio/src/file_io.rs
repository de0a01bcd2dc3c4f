//! Background file writer.
//!
//! One worker thread drains a queue of write requests and reports the number
//! of bytes written through a completion callback. The callback runs on the
//! worker, so it should do no more than record the count (see
//! [`WriteStatus`]).

use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use cadence_common::{AudioError, AudioResult};
use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, info, warn};

/// Handle for one submitted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoHandle(u64);

impl IoHandle {
    /// No write issued.
    pub const NULL: Self = Self(0);

    /// Checks if this is the null handle.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Completion callback, given the number of bytes written (0 on failure).
pub type WriteCallback = Box<dyn FnOnce(u64) + Send + 'static>;

/// Single-word completion cell shared between a writer and its poller.
///
/// Negative while pending, then the byte count once the write finishes.
#[derive(Debug)]
pub struct WriteStatus(AtomicI64);

impl WriteStatus {
    /// Value while no result has been recorded.
    pub const PENDING: i64 = -1;

    /// A fresh, pending status.
    #[must_use]
    pub const fn pending() -> Self {
        Self(AtomicI64::new(Self::PENDING))
    }

    /// Records the outcome of the write.
    pub fn record(&self, bytes: u64) {
        self.0
            .store(i64::try_from(bytes).unwrap_or(i64::MAX), Ordering::Release);
    }

    /// Current value: negative = pending, 0 = failed, positive = bytes written.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Puts the status back to pending.
    pub fn reset(&self) {
        self.0.store(Self::PENDING, Ordering::Release);
    }
}

impl Default for WriteStatus {
    fn default() -> Self {
        Self::pending()
    }
}

enum IoRequest {
    Write {
        handle: IoHandle,
        path: PathBuf,
        data: Vec<u8>,
        offset: u64,
        callback: WriteCallback,
    },
    Shutdown,
}

/// The background writer.
pub struct IoThread {
    sender: Sender<IoRequest>,
    worker: Option<JoinHandle<()>>,
    next_handle: AtomicU64,
}

impl std::fmt::Debug for IoThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoThread")
            .field("running", &self.worker.is_some())
            .field("next_handle", &self.next_handle.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl IoThread {
    /// Starts the worker thread.
    pub fn spawn() -> AudioResult<Self> {
        let (sender, receiver) = unbounded::<IoRequest>();

        let worker = thread::Builder::new()
            .name("cadence-io".to_string())
            .spawn(move || {
                debug!("I/O thread started");
                while let Ok(request) = receiver.recv() {
                    match request {
                        IoRequest::Write {
                            handle,
                            path,
                            data,
                            offset,
                            callback,
                        } => {
                            let written = match write_at(&path, &data, offset) {
                                Ok(n) => n as u64,
                                Err(e) => {
                                    warn!(
                                        "Write {} to {} failed: {e}",
                                        handle.raw(),
                                        path.display()
                                    );
                                    0
                                },
                            };
                            callback(written);
                        },
                        IoRequest::Shutdown => break,
                    }
                }
                debug!("I/O thread stopped");
            })
            .map_err(|e| AudioError::WorkerSpawnFailed(e.to_string()))?;

        info!("Background I/O thread running");

        Ok(Self {
            sender,
            worker: Some(worker),
            next_handle: AtomicU64::new(1),
        })
    }

    /// Queues `data` to be written to `path` at byte `offset`.
    ///
    /// If the worker has already stopped, the callback fires immediately with
    /// zero bytes.
    pub fn submit_write(
        &self,
        path: impl Into<PathBuf>,
        data: Vec<u8>,
        offset: u64,
        callback: WriteCallback,
    ) -> IoHandle {
        let handle = IoHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let request = IoRequest::Write {
            handle,
            path: path.into(),
            data,
            offset,
            callback,
        };
        if let Err(rejected) = self.sender.send(request) {
            warn!("I/O thread gone, dropping write {}", handle.raw());
            if let IoRequest::Write { callback, .. } = rejected.into_inner() {
                callback(0);
            }
        }
        handle
    }

    /// Finishes queued writes and joins the worker.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.sender.send(IoRequest::Shutdown);
            if worker.join().is_err() {
                warn!("I/O thread panicked");
            }
        }
    }

    /// Whether the worker is still accepting writes.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn write_at(path: &Path, data: &[u8], offset: u64) -> io::Result<usize> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(offset == 0)
        .open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    file.flush()?;
    Ok(data.len())
}
