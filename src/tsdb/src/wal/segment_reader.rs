use std::io;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};

use crate::wal::entry::WriteWalEntry;
use crate::wal::{Error, BYTES_POOL};

/// WalSegmentReader iterates the records of one segment file.
///
/// `count` reports the bytes consumed through the last record that decoded
/// cleanly, which is where replay truncates a segment whose tail is
/// corrupt.
pub struct WalSegmentReader {
    r: BufReader<File>,
    entry: Option<WriteWalEntry>,
    n: i64,
    err: Option<Error>,
}

impl WalSegmentReader {
    pub fn new(fd: File) -> Self {
        Self {
            r: BufReader::new(fd),
            entry: None,
            n: 0,
            err: None,
        }
    }

    /// Advances to the next record.  Returns false only at a clean end of
    /// file; a decode failure still returns true so the error surfaces
    /// through `read`.
    pub async fn next(&mut self) -> bool {
        let mut lv = [0u8; 4];
        match read_full(&mut self.r, &mut lv).await {
            Ok(0) => return false,
            Ok(n) if n < lv.len() => {
                self.err = Some(Error::Corrupt);
                return true;
            }
            Ok(_) => {}
            Err(e) => {
                self.err = Some(e.into());
                return true;
            }
        }
        let length = u32::from_be_bytes(lv) as usize;

        let mut b = BYTES_POOL.get(length);
        if let Err(e) = self.r.read_exact(&mut b[..length]).await {
            self.err = Some(if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::Corrupt
            } else {
                e.into()
            });
            BYTES_POOL.put(b);
            return true;
        }

        // Decompress into a second pooled buffer; the compressed input
        // must never double as the output.
        let decoded = snap::raw::decompress_len(&b[..length]).ok().and_then(|sz| {
            let mut dec_buf = BYTES_POOL.get(sz);
            match snap::raw::Decoder::new().decompress(&b[..length], &mut dec_buf) {
                Ok(n) => Some((dec_buf, n)),
                Err(_) => {
                    BYTES_POOL.put(dec_buf);
                    None
                }
            }
        });
        BYTES_POOL.put(b);

        let (dec_buf, dec_len) = match decoded {
            Some(d) => d,
            None => {
                self.err = Some(Error::Corrupt);
                return true;
            }
        };

        match WriteWalEntry::unmarshal_binary(&dec_buf[..dec_len]) {
            Ok(entry) => {
                self.entry = Some(entry);
                self.n += (4 + length) as i64;
            }
            Err(e) => self.err = Some(e),
        }
        BYTES_POOL.put(dec_buf);

        true
    }

    /// Takes the record produced by the last `next`, or its error.
    pub fn read(&mut self) -> Result<WriteWalEntry, Error> {
        if let Some(e) = self.err.take() {
            return Err(e);
        }
        self.entry.take().ok_or(Error::Corrupt)
    }

    /// Count returns the bytes consumed through the last good record.
    pub fn count(&self) -> i64 {
        self.n
    }

    pub fn into_inner(self) -> File {
        self.r.into_inner()
    }
}

/// Reads until buf is full or EOF, returning the bytes read.  Unlike
/// read_exact this distinguishes a clean EOF (0 bytes) from a short read.
async fn read_full(r: &mut BufReader<File>, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        let m = r.read(&mut buf[n..]).await?;
        if m == 0 {
            break;
        }
        n += m;
    }
    Ok(n)
}
