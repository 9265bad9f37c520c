use bytes::BufMut;

use bytedb_common::limiter;

use crate::engine::tsm1::errors::Error;
use crate::engine::tsm1::writer::index_writer::DirectIndex;
use crate::engine::tsm1::writer::{FSYNC_EVERY, MAGIC_NUMBER, MAX_INDEX_ENTRIES, VERSION};

/// TsmWriter writes TSM formatted keys and blocks.
///
/// Callers must feed keys in ascending order and, within a key, blocks in
/// time order; the index section is built from exactly that order.
pub struct TsmWriter {
    w: limiter::Writer,
    index: DirectIndex,

    /// Bytes written to the blocks section, header included.
    n: u64,
    /// The byte count as of the last forced fsync.
    last_sync: u64,
}

impl TsmWriter {
    pub fn new(w: limiter::Writer) -> Self {
        Self {
            w,
            index: DirectIndex::new(),
            n: 0,
            last_sync: 0,
        }
    }

    async fn write_header(&mut self) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(5);
        buf.put_u32(MAGIC_NUMBER);
        buf.put_u8(VERSION);

        let n = self.w.write(&buf).await?;
        self.n = n as u64;
        Ok(())
    }

    /// Writes one CRC-prefixed block for a key and records it in the
    /// index.  The index entry's size covers the CRC prefix.
    pub async fn write_block(
        &mut self,
        key: u32,
        min_time: i64,
        max_time: i64,
        block: &[u8],
    ) -> Result<(), Error> {
        if block.is_empty() {
            return Ok(());
        }

        // The header is written lazily so an abandoned writer leaves no
        // half-valid file behind.
        if self.n == 0 {
            self.write_header().await?;
        }

        let checksum = crc32fast::hash(block);
        self.w.write(&checksum.to_be_bytes()).await?;
        let mut n = 4;
        n += self.w.write(block).await?;

        self.index
            .add(key, min_time, max_time, self.n as i64, n as u32);

        self.n += n as u64;

        if self.n - self.last_sync > FSYNC_EVERY {
            self.w.sync().await?;
            self.last_sync = self.n;
        }

        if self.index.entries(key).len() >= MAX_INDEX_ENTRIES {
            return Err(Error::MaxBlocksExceeded);
        }

        Ok(())
    }

    /// Writes the index section and the footer pointing at it.
    pub async fn write_index(&mut self) -> Result<(), Error> {
        let index_pos = self.n;

        if self.index.key_count() == 0 {
            return Err(Error::NoValues);
        }

        self.index.write_to(&mut self.w).await?;
        self.w.write(&index_pos.to_be_bytes()).await?;

        Ok(())
    }

    /// Size returns the current file size: blocks written plus the index
    /// still buffered in memory.
    pub fn size(&self) -> u32 {
        self.n as u32 + self.index.size()
    }

    pub async fn close(mut self) -> Result<(), Error> {
        self.w.sync().await?;
        Ok(())
    }

    /// Removes the partially written file.
    pub async fn remove(self) -> Result<(), Error> {
        let path = self.w.path().to_path_buf();
        drop(self.w);
        tokio::fs::remove_file(path).await?;
        Ok(())
    }
}
