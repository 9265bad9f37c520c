use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tokio::fs::OpenOptions;
use tokio::sync::watch;
use tracing::info;

use bytedb_common::limiter::{self, Rate};

use crate::cache::Cache;
use crate::engine::tsm1::cache_key_iterator::CacheKeyIterator;
use crate::engine::tsm1::errors::Error;
use crate::engine::tsm1::file_store::{format_file_name, FileStore};
use crate::engine::tsm1::writer::tsm_writer::TsmWriter;

/// DEFAULT_MAX_POINTS_PER_BLOCK bounds the samples per encoded block.
pub const DEFAULT_MAX_POINTS_PER_BLOCK: usize = 240 * 8;

/// Hard cap on a single TSM file.
const MAX_TSM_FILE_SIZE: u32 = 2048 * 1024 * 1024;

struct CompactorState {
    snapshots_enabled: bool,
    compactions_enabled: bool,
    snapshots_interrupt: watch::Sender<bool>,
}

/// Compactor drains cache snapshots into TSM files.
pub struct Compactor {
    dir: PathBuf,
    file_store: Arc<FileStore>,
    rate_limit: Option<Arc<dyn Rate>>,
    state: RwLock<CompactorState>,
}

impl Compactor {
    pub fn new(dir: impl Into<PathBuf>, file_store: Arc<FileStore>) -> Self {
        let (interrupt, _) = watch::channel(false);
        Self {
            dir: dir.into(),
            file_store,
            rate_limit: None,
            state: RwLock::new(CompactorState {
                snapshots_enabled: false,
                compactions_enabled: false,
                snapshots_interrupt: interrupt,
            }),
        }
    }

    /// Throttles TSM writes through the given rate source.
    pub fn with_rate_limit(mut self, rate: Arc<dyn Rate>) -> Self {
        self.rate_limit = Some(rate);
        self
    }

    /// Enables snapshot and full compactions.
    pub fn open(&self) {
        let mut state = self.state.write().unwrap();
        if state.snapshots_enabled || state.compactions_enabled {
            return;
        }

        state.snapshots_enabled = true;
        state.compactions_enabled = true;
        // A fresh interrupt channel: the previous one stays signalled for
        // any compaction still draining from before the re-open.
        let (interrupt, _) = watch::channel(false);
        state.snapshots_interrupt = interrupt;
    }

    /// Disables compactions and interrupts the ones in flight.
    pub fn close(&self) {
        let mut state = self.state.write().unwrap();
        if !state.snapshots_enabled && !state.compactions_enabled {
            return;
        }

        state.snapshots_enabled = false;
        state.compactions_enabled = false;
        let _ = state.snapshots_interrupt.send(true);
    }

    /// Writes a cache snapshot to one or more TSM files and, on success,
    /// marks the snapshot drained so the owning cache can swap again.
    pub async fn write_snapshot(&self, cache: Arc<Cache>) -> Result<Vec<PathBuf>, Error> {
        let (enabled, interrupt) = {
            let state = self.state.read().unwrap();
            (
                state.snapshots_enabled,
                state.snapshots_interrupt.subscribe(),
            )
        };
        if !enabled {
            return Err(Error::SnapshotsDisabled);
        }

        let mut iter =
            CacheKeyIterator::new(cache.clone(), DEFAULT_MAX_POINTS_PER_BLOCK, interrupt);
        let generation = self.file_store.next_generation();
        let files = self
            .write_new_files(generation, 0, &mut iter, true)
            .await;

        // The compactor may have been disabled while writing.
        let enabled = self.state.read().unwrap().snapshots_enabled;
        if !enabled {
            return Err(Error::SnapshotsDisabled);
        }

        let files = files?;
        cache.release();
        info!(generation, files = files.len(), "cache snapshot written");

        Ok(files)
    }

    /// Writes the iterator out, rolling to a new sequence whenever a file
    /// fills up.  On an unknown failure every temp file of this call is
    /// removed.
    async fn write_new_files(
        &self,
        generation: u64,
        mut sequence: u64,
        iter: &mut CacheKeyIterator,
        throttle: bool,
    ) -> Result<Vec<PathBuf>, Error> {
        let mut files: Vec<PathBuf> = Vec::new();

        loop {
            sequence += 1;

            // Data lands in a .tmp file; the file store renames it to
            // .tsm once it is durable.
            let file_name = self.dir.join(format_file_name(generation, sequence));

            match self.write(&file_name, iter, throttle).await {
                Ok(()) => {
                    files.push(file_name);
                    break;
                }
                // The file filled up; keep it and open the next sequence.
                Err(Error::MaxFileExceeded) | Err(Error::MaxBlocksExceeded) => {
                    files.push(file_name);
                    continue;
                }
                // The iterator had nothing for this file.
                Err(Error::NoValues) => {
                    remove_if_exists(&file_name).await?;
                    break;
                }
                Err(e @ Error::CompactionInProgress(_)) => return Err(e),
                Err(e) => {
                    for f in &files {
                        remove_if_exists(f).await?;
                    }
                    remove_if_exists(&file_name).await?;
                    return Err(e);
                }
            }
        }

        Ok(files)
    }

    /// Fills one TSM file from the iterator.
    async fn write(
        &self,
        path: &Path,
        iter: &mut CacheKeyIterator,
        throttle: bool,
    ) -> Result<(), Error> {
        let fd = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| Error::CompactionInProgress(e.to_string()))?;

        let lw = match (&self.rate_limit, throttle) {
            (Some(rate), true) => limiter::Writer::with_rate(fd, path.to_path_buf(), rate.clone()),
            _ => limiter::Writer::new(fd, path.to_path_buf()),
        };
        let mut w = TsmWriter::new(lw);

        let res = self.write_blocks(&mut w, iter).await;
        match res {
            Ok(()) => w.close().await,
            // Full files keep their contents; the index was already
            // written by write_blocks.
            Err(e @ (Error::MaxFileExceeded | Error::MaxBlocksExceeded)) => {
                w.close().await?;
                Err(e)
            }
            Err(e) => {
                let _ = w.remove().await;
                Err(e)
            }
        }
    }

    async fn write_blocks(
        &self,
        w: &mut TsmWriter,
        iter: &mut CacheKeyIterator,
    ) -> Result<(), Error> {
        while iter.next().await {
            let enabled = {
                let state = self.state.read().unwrap();
                state.snapshots_enabled || state.compactions_enabled
            };
            if !enabled {
                return Err(Error::CompactionAborted);
            }

            let (key, min_time, max_time, block) = iter.read().map_err(Error::Other)?;
            if min_time > max_time {
                return Err(anyhow!(
                    "invalid index entry for block. min={}, max={}",
                    min_time,
                    max_time
                )
                .into());
            }

            match w.write_block(key, min_time, max_time, &block).await {
                // The key hit the block cap; seal the file and roll.
                Err(Error::MaxBlocksExceeded) => {
                    w.write_index().await?;
                    return Err(Error::MaxBlocksExceeded);
                }
                Err(e) => return Err(e),
                Ok(()) => {}
            }

            if w.size() > MAX_TSM_FILE_SIZE {
                w.write_index().await?;
                return Err(Error::MaxFileExceeded);
            }
        }

        if let Some(e) = iter.err() {
            return Err(anyhow!("{}", e).into());
        }

        w.write_index().await?;
        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), Error> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
