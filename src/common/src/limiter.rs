use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Rate is the contract a write throttle has to satisfy: a token-bucket
/// style `wait_n` that suspends until `n` bytes worth of budget is
/// available, and the bucket's `burst` size.  The policy behind it lives
/// outside this crate.
#[async_trait]
pub trait Rate: Send + Sync {
    async fn wait_n(&self, n: usize) -> io::Result<()>;
    fn burst(&self) -> usize;
}

/// Writer gates file writes through an optional [`Rate`] limiter.
///
/// Writes are chunked to at most `burst()` bytes; after each chunk the
/// writer waits for the bucket to refill.  Without a limiter it is a plain
/// passthrough.
pub struct Writer {
    w: File,
    path: PathBuf,
    limiter: Option<Arc<dyn Rate>>,
}

impl Writer {
    pub fn new(w: File, path: PathBuf) -> Self {
        Self {
            w,
            path,
            limiter: None,
        }
    }

    pub fn with_rate(w: File, path: PathBuf, limiter: Arc<dyn Rate>) -> Self {
        Self {
            w,
            path,
            limiter: Some(limiter),
        }
    }

    pub async fn write(&mut self, b: &[u8]) -> io::Result<usize> {
        let limiter = match &self.limiter {
            Some(limiter) => limiter.clone(),
            None => {
                self.w.write_all(b).await?;
                return Ok(b.len());
            }
        };

        let mut n = 0;
        while n < b.len() {
            let want = (b.len() - n).min(limiter.burst());

            self.w.write_all(&b[n..n + want]).await?;
            n += want;

            // Wait until the written amount is allowed again.
            limiter.wait_n(want).await?;
        }

        Ok(n)
    }

    pub async fn sync(&mut self) -> io::Result<()> {
        self.w.flush().await?;
        self.w.sync_all().await
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{Rate, Writer};

    struct CountingRate {
        burst: usize,
        waits: AtomicUsize,
        waited_bytes: AtomicUsize,
    }

    #[async_trait]
    impl Rate for CountingRate {
        async fn wait_n(&self, n: usize) -> io::Result<()> {
            self.waits.fetch_add(1, Ordering::SeqCst);
            self.waited_bytes.fetch_add(n, Ordering::SeqCst);
            Ok(())
        }

        fn burst(&self) -> usize {
            self.burst
        }
    }

    #[tokio::test]
    async fn test_write_chunks_by_burst() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limited");
        let fd = tokio::fs::File::create(&path).await.unwrap();

        let rate = Arc::new(CountingRate {
            burst: 4,
            waits: AtomicUsize::new(0),
            waited_bytes: AtomicUsize::new(0),
        });

        let mut w = Writer::with_rate(fd, path.clone(), rate.clone());
        let n = w.write(&[7u8; 10]).await.unwrap();
        w.sync().await.unwrap();

        assert_eq!(n, 10, "written mismatch: got {}, exp {}", n, 10);
        assert_eq!(
            rate.waits.load(Ordering::SeqCst),
            3,
            "expected 3 chunked waits for 10 bytes at burst 4"
        );
        assert_eq!(rate.waited_bytes.load(Ordering::SeqCst), 10);

        let got = tokio::fs::read(&path).await.unwrap();
        assert_eq!(got, vec![7u8; 10], "file content mismatch");
    }

    #[tokio::test]
    async fn test_write_passthrough_without_limiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unlimited");
        let fd = tokio::fs::File::create(&path).await.unwrap();

        let mut w = Writer::new(fd, path.clone());
        let n = w.write(b"hello").await.unwrap();
        w.sync().await.unwrap();

        assert_eq!(n, 5, "written mismatch: got {}, exp {}", n, 5);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello");
    }
}
