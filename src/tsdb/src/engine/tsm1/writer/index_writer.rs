use bytes::BufMut;

use bytedb_common::limiter;

use crate::engine::tsm1::errors::Error;
use crate::engine::tsm1::writer::{
    FSYNC_EVERY, INDEX_COUNT_SIZE, INDEX_ENTRY_SIZE, INDEX_KEY_SIZE,
};

/// IndexEntry locates one block of a series within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub min_time: i64,
    pub max_time: i64,
    /// File offset of the block's CRC word.
    pub offset: i64,
    /// Block size including the 4-byte CRC prefix.
    pub size: u32,
}

impl IndexEntry {
    fn append_to(&self, b: &mut Vec<u8>) {
        b.put_i64(self.min_time);
        b.put_i64(self.max_time);
        b.put_i64(self.offset);
        b.put_u32(self.size);
    }
}

/// DirectIndex accumulates the index in memory while blocks are written
/// and copies it out behind them.  Entries arrive grouped by key; a key
/// change seals the previous key's section into the encode buffer.
pub struct DirectIndex {
    buf: Vec<u8>,

    key: Option<u32>,
    index_entries: Vec<IndexEntry>,

    key_count: usize,
    size: u32,
}

impl DirectIndex {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(1024 * 1024),
            key: None,
            index_entries: Vec::new(),
            key_count: 0,
            size: 0,
        }
    }

    /// Records a block entry for a key.  Keys must arrive in ascending
    /// order; entries within a key may arrive in any time order.
    pub fn add(&mut self, key: u32, min_time: i64, max_time: i64, offset: i64, size: u32) {
        let entry = IndexEntry {
            min_time,
            max_time,
            offset,
            size,
        };

        match self.key {
            Some(k) if k == key => {
                self.index_entries.push(entry);
                self.size += INDEX_ENTRY_SIZE as u32;
            }
            Some(_) => {
                self.encode_pending();

                self.key = Some(key);
                self.index_entries.push(entry);
                self.size += (INDEX_KEY_SIZE + INDEX_COUNT_SIZE + INDEX_ENTRY_SIZE) as u32;
                self.key_count += 1;
            }
            None => {
                self.key = Some(key);
                self.index_entries.push(entry);
                self.size += (INDEX_KEY_SIZE + INDEX_COUNT_SIZE + INDEX_ENTRY_SIZE) as u32;
                self.key_count += 1;
            }
        }
    }

    /// Returns the entries buffered for key, which is only ever the key
    /// currently being written.
    pub fn entries(&self, key: u32) -> &[IndexEntry] {
        if self.key == Some(key) {
            self.index_entries.as_slice()
        } else {
            &[]
        }
    }

    pub fn key_count(&self) -> usize {
        self.key_count
    }

    /// Size returns the encoded size of the index in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Seals the pending key's entries into the encode buffer, sorted by
    /// minimum time.
    fn encode_pending(&mut self) {
        let key = match self.key.take() {
            Some(key) => key,
            None => return,
        };

        let sorted = self
            .index_entries
            .windows(2)
            .all(|w| w[0].min_time <= w[1].min_time);
        if !sorted {
            self.index_entries.sort_by_key(|e| e.min_time);
        }

        self.buf.put_u32(key);
        self.buf.put_u16(self.index_entries.len() as u16);
        for entry in &self.index_entries {
            entry.append_to(&mut self.buf);
        }

        self.index_entries.clear();
    }

    /// Copies the encoded index to the writer in chunks, fsyncing
    /// periodically so a huge index cannot stall the final sync.
    pub async fn write_to(&mut self, w: &mut limiter::Writer) -> Result<u64, Error> {
        self.encode_pending();

        let mut written = 0u64;
        let mut last_sync = 0u64;
        for chunk in self.buf.chunks(32 * 1024) {
            w.write(chunk).await?;
            written += chunk.len() as u64;

            if written - last_sync > FSYNC_EVERY {
                w.sync().await?;
                last_sync = written;
            }
        }

        Ok(written)
    }
}

impl Default for DirectIndex {
    fn default() -> Self {
        Self::new()
    }
}
