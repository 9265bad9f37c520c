//! Durable write-ahead log.
//!
//! Writes are encoded, snappy-compressed and appended to the current
//! segment under the writer lock; segments roll over once they pass the
//! size threshold.  Durability is group-committed: each write enqueues a
//! one-shot waiter and a single coordinator task fsyncs the segment once
//! per window, broadcasting the result to every waiter that accumulated in
//! the meantime.

mod entry;
mod segment_reader;
mod segment_writer;

pub use entry::WriteWalEntry;
pub use segment_reader::WalSegmentReader;
pub use segment_writer::WalSegmentWriter;

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::fs::OpenOptions;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::debug;

use bytedb_common::pool::LimitedBytes;

use crate::cache::value::Value;

/// DEFAULT_SEGMENT_SIZE is the size at which segments roll over.
pub const DEFAULT_SEGMENT_SIZE: usize = 10 * 1024 * 1024;

/// WAL_FILE_PREFIX is the prefix of segment file names.
pub const WAL_FILE_PREFIX: &str = "_";

/// WAL_FILE_EXTENSION is the extension of segment file names.
pub const WAL_FILE_EXTENSION: &str = "wal";

/// Largest encode buffer the shared pool will retain for reuse.
const WAL_ENCODE_BUF_SIZE: usize = 4 * 1024 * 1024;

/// Bound on the number of writes awaiting one fsync.
const SYNC_WAITERS_CAP: usize = 1024;

lazy_static! {
    pub(crate) static ref BYTES_POOL: LimitedBytes =
        LimitedBytes::new(256, WAL_ENCODE_BUF_SIZE * 2);
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when attempting to write to a closed WAL.
    #[error("WAL closed")]
    Closed,

    /// Returned when reading a corrupt WAL entry.
    #[error("corrupted WAL entry")]
    Corrupt,

    /// Returned when the fsync waiter queue is full; the write must be
    /// treated as not durable.
    #[error("error syncing wal")]
    SyncQueueFull,

    /// An fsync failed; every write waiting on it gets this result.
    #[error("error syncing wal: {0}")]
    Sync(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Default)]
pub struct WalStatistics {
    pub write_ok: AtomicI64,
    pub write_err: AtomicI64,
    pub current_bytes: AtomicI64,
    pub old_bytes: AtomicI64,
}

struct WalState {
    current_segment_id: u64,
    writer: Option<WalSegmentWriter>,
    sync_waiters: VecDeque<oneshot::Sender<Result<(), Error>>>,
    last_write_time: Option<SystemTime>,
}

struct WalInner {
    path: PathBuf,
    state: Mutex<WalState>,
    sync_count: AtomicU64,
    closing: watch::Receiver<bool>,
    stats: WalStatistics,
}

/// Wal appends write records durably before they become visible in the
/// cache.
pub struct Wal {
    sync_delay: Duration,
    segment_size: usize,
    closing: watch::Sender<bool>,
    inner: Arc<WalInner>,
}

impl Wal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (closing_tx, closing_rx) = watch::channel(false);
        Self {
            sync_delay: Duration::ZERO,
            segment_size: DEFAULT_SEGMENT_SIZE,
            closing: closing_tx,
            inner: Arc::new(WalInner {
                path: path.into(),
                state: Mutex::new(WalState {
                    current_segment_id: 0,
                    writer: None,
                    sync_waiters: VecDeque::new(),
                    last_write_time: None,
                }),
                sync_count: AtomicU64::new(0),
                closing: closing_rx,
                stats: WalStatistics::default(),
            }),
        }
    }

    /// Delays the group-commit fsync so more writes share one sync.
    pub fn with_sync_delay(mut self, delay: Duration) -> Self {
        self.sync_delay = delay;
        self
    }

    /// Overrides the segment rollover threshold.
    pub fn with_segment_size(mut self, sz: usize) -> Self {
        self.segment_size = sz;
        self
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn statistics(&self) -> &WalStatistics {
        &self.inner.stats
    }

    /// Time of the most recent successful write, if any.
    pub async fn last_write_time(&self) -> Option<SystemTime> {
        self.inner.state.lock().await.last_write_time
    }

    /// Creates the directory and resumes segment numbering after the
    /// highest existing segment.
    pub async fn open(&self) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.inner.path).await?;

        let names = segment_file_names(&self.inner.path).await?;
        if let Some(last) = names.last() {
            if let Some(id) = segment_id(last) {
                let mut state = self.inner.state.lock().await;
                state.current_segment_id = id;
            }
        }

        Ok(())
    }

    /// Appends the values for many series and blocks until the record is
    /// fsynced, returning the id of the segment holding it.
    pub async fn write_multi(&self, values: &BTreeMap<u32, Vec<Value>>) -> Result<u64, Error> {
        match self.write_to_log(values).await {
            Ok(id) => {
                self.inner.stats.write_ok.fetch_add(1, Ordering::SeqCst);
                Ok(id)
            }
            Err(e) => {
                self.inner.stats.write_err.fetch_add(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn write_to_log(&self, values: &BTreeMap<u32, Vec<Value>>) -> Result<u64, Error> {
        // Encode into a pooled buffer.
        let mut bytes = BYTES_POOL.get(WriteWalEntry::encoded_size(values));
        let encoded_len = WriteWalEntry::encode_values(values, &mut bytes).len();

        // Compress into a second pooled buffer.
        let mut enc_buf = BYTES_POOL.get(snap::raw::max_compress_len(encoded_len));
        let compressed_len = match snap::raw::Encoder::new()
            .compress(&bytes[..encoded_len], &mut enc_buf)
        {
            Ok(n) => n,
            Err(e) => {
                BYTES_POOL.put(bytes);
                BYTES_POOL.put(enc_buf);
                return Err(io::Error::new(io::ErrorKind::InvalidData, e).into());
            }
        };
        BYTES_POOL.put(bytes);

        let (tx, rx) = oneshot::channel();
        let res = self.write_locked(&enc_buf[..compressed_len], tx).await;
        BYTES_POOL.put(enc_buf);
        let seg_id = res?;

        // Block until the coordinator reports this record durable.
        match rx.await {
            Ok(res) => res.map(|_| seg_id),
            Err(_) => Err(Error::Closed),
        }
    }

    async fn write_locked(
        &self,
        compressed: &[u8],
        tx: oneshot::Sender<Result<(), Error>>,
    ) -> Result<u64, Error> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;

        if *inner.closing.borrow() {
            return Err(Error::Closed);
        }

        // Roll to the next segment when the current one is over size.
        let roll = match &state.writer {
            Some(w) => w.size() > self.segment_size,
            None => true,
        };
        if roll {
            inner.new_segment_file(&mut state).await?;
        }

        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no open wal segment"))?;
        writer.write(compressed).await?;

        if state.sync_waiters.len() >= SYNC_WAITERS_CAP {
            return Err(Error::SyncQueueFull);
        }
        state.sync_waiters.push_back(tx);

        self.schedule_sync();

        if let Some(w) = &state.writer {
            inner
                .stats
                .current_bytes
                .store(w.size() as i64, Ordering::SeqCst);
        }
        state.last_write_time = Some(SystemTime::now());

        Ok(state.current_segment_id)
    }

    /// Elects at most one coordinator task.  The coordinator fsyncs the
    /// current segment once per delay window while writes keep arriving
    /// and retires when a window passes with no waiters.
    fn schedule_sync(&self) {
        if self
            .inner
            .sync_count
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let inner = self.inner.clone();
        let delay = self.sync_delay;
        tokio::spawn(async move {
            let mut closing = inner.closing.clone();
            loop {
                tokio::select! {
                    _ = closing.changed() => {
                        inner.sync_count.store(0, Ordering::SeqCst);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {
                        let mut state = inner.state.lock().await;
                        if state.sync_waiters.is_empty() {
                            inner.sync_count.store(0, Ordering::SeqCst);
                            return;
                        }
                        sync_segment(&mut state).await;
                    }
                }
            }
        });
    }

    /// Closes the WAL: pending waiters get the final fsync result, the
    /// open segment is closed and subsequent writes fail.
    pub async fn close(&self) -> Result<(), Error> {
        let _ = self.closing.send(true);

        let mut state = self.inner.state.lock().await;
        sync_segment(&mut state).await;
        if let Some(w) = state.writer.take() {
            w.close().await?;
        }

        Ok(())
    }
}

impl WalInner {
    /// Closes out the current segment, notifying its waiters, and opens
    /// the next one.
    async fn new_segment_file(&self, state: &mut WalState) -> Result<(), Error> {
        state.current_segment_id += 1;

        if state.writer.is_some() {
            sync_segment(state).await;
            if let Some(w) = state.writer.take() {
                self.stats.old_bytes.store(w.size() as i64, Ordering::SeqCst);
                w.close().await?;
            }
        }

        let file_name = self.path.join(format!(
            "{}{:05}.{}",
            WAL_FILE_PREFIX, state.current_segment_id, WAL_FILE_EXTENSION
        ));
        debug!(segment = %file_name.display(), "rolling wal segment");

        let fd = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&file_name)
            .await?;
        state.writer = Some(WalSegmentWriter::new(fd));
        self.stats.current_bytes.store(0, Ordering::SeqCst);

        Ok(())
    }
}

/// Fsyncs the current segment once and hands the result to every waiter.
async fn sync_segment(state: &mut WalState) {
    let err = match state.writer.as_mut() {
        Some(w) => w.sync().await.err().map(|e| e.to_string()),
        None => None,
    };

    while let Some(tx) = state.sync_waiters.pop_front() {
        let res = match &err {
            None => Ok(()),
            Some(msg) => Err(Error::Sync(msg.clone())),
        };
        let _ = tx.send(res);
    }
}

/// Lists the WAL segment files of a directory in segment-id order.
pub async fn segment_file_names(dir: impl AsRef<Path>) -> io::Result<Vec<PathBuf>> {
    let mut names = Vec::new();

    let mut rd = tokio::fs::read_dir(dir).await?;
    while let Some(ent) = rd.next_entry().await? {
        let path = ent.path();
        let is_segment = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(WAL_FILE_PREFIX))
            .unwrap_or(false)
            && path
                .extension()
                .map(|e| e == WAL_FILE_EXTENSION)
                .unwrap_or(false);
        if is_segment {
            names.push(path);
        }
    }

    names.sort();
    Ok(names)
}

/// Parses the segment id out of a `_{id:05}.wal` path.
fn segment_id(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix(WAL_FILE_PREFIX)?.parse().ok()
}
