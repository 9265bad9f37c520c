use std::io;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// WalSegmentWriter appends length-prefixed, already-compressed records to
/// one segment file through a small write buffer.
pub struct WalSegmentWriter {
    bw: BufWriter<File>,
    size: usize,
}

impl WalSegmentWriter {
    pub fn new(fd: File) -> Self {
        Self {
            bw: BufWriter::with_capacity(16 * 1024, fd),
            size: 0,
        }
    }

    /// Writes one record: a big-endian u32 length then the payload.
    pub async fn write(&mut self, compressed: &[u8]) -> io::Result<()> {
        self.bw.write_u32(compressed.len() as u32).await?;
        self.bw.write_all(compressed).await?;

        self.size += 4 + compressed.len();
        Ok(())
    }

    /// Size returns the bytes written so far, length prefixes included.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Flushes the buffer and fsyncs the file.
    pub async fn sync(&mut self) -> io::Result<()> {
        self.bw.flush().await?;
        self.bw.get_ref().sync_all().await
    }

    pub async fn close(mut self) -> io::Result<()> {
        self.bw.flush().await?;
        self.bw.get_mut().shutdown().await
    }
}
