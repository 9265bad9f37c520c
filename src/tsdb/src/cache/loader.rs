use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::wal::WalSegmentReader;

/// CacheLoader replays WAL segment files into a cache on startup.
///
/// A segment whose tail fails to decode is truncated at the last record
/// that read cleanly and skipped from there; everything before the corrupt
/// boundary is kept.
pub struct CacheLoader {
    files: Vec<PathBuf>,
}

impl CacheLoader {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    pub async fn load(&self, cache: &Cache) -> anyhow::Result<()> {
        for file_name in &self.files {
            let f = OpenOptions::new()
                .read(true)
                .write(true)
                .open(file_name)
                .await?;

            let meta = f.metadata().await?;
            info!(
                file = %file_name.display(),
                size = meta.len(),
                "reading wal segment"
            );
            if meta.len() == 0 {
                continue;
            }

            let mut r = WalSegmentReader::new(f);
            while r.next().await {
                match r.read() {
                    Ok(entry) => cache.write_multi(&entry.values)?,
                    Err(e) => {
                        let n = r.count();
                        warn!(
                            file = %file_name.display(),
                            offset = n,
                            error = %e,
                            "wal segment corrupt, truncating"
                        );
                        let f = r.into_inner();
                        f.set_len(n as u64).await?;
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tokio::io::AsyncWriteExt;

    use super::CacheLoader;
    use crate::cache::value::Value;
    use crate::cache::Cache;
    use crate::wal::{segment_file_names, Wal};

    fn sample_values() -> BTreeMap<u32, Vec<Value>> {
        let mut values = BTreeMap::new();
        values.insert(1u32, (0..10).map(|i| Value::new(i, (i + 5) as u8)).collect());
        values.insert(2u32, (0..10).map(|i| Value::new(i, (i + 25) as u8)).collect());
        values
    }

    #[tokio::test]
    async fn test_load_replays_segments() {
        let dir = tempfile::tempdir().unwrap();

        let wal = Wal::new(dir.path());
        wal.open().await.unwrap();
        wal.write_multi(&sample_values()).await.unwrap();
        wal.close().await.unwrap();

        let cache = Cache::new(0).unwrap();
        let files = segment_file_names(dir.path()).await.unwrap();
        CacheLoader::new(files).load(&cache).await.unwrap();

        assert_eq!(cache.keys(), vec![1, 2], "keys mismatch after replay");
        let got = cache.values(1);
        assert_eq!(got.len(), 10, "count mismatch: got {}, exp {}", got.len(), 10);
        assert_eq!(got[3], Value::new(3, 8), "sample mismatch after replay");
    }

    #[tokio::test]
    async fn test_load_truncates_corrupt_tail() {
        let dir = tempfile::tempdir().unwrap();

        let wal = Wal::new(dir.path());
        wal.open().await.unwrap();
        wal.write_multi(&sample_values()).await.unwrap();
        wal.close().await.unwrap();

        let files = segment_file_names(dir.path()).await.unwrap();
        let good_len = tokio::fs::metadata(&files[0]).await.unwrap().len();

        // A record header promising more bytes than exist is a torn write.
        let mut f = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&files[0])
            .await
            .unwrap();
        f.write_all(&[0, 0, 0, 99, 1, 2, 3]).await.unwrap();
        f.sync_all().await.unwrap();
        drop(f);

        let cache = Cache::new(0).unwrap();
        CacheLoader::new(files.clone()).load(&cache).await.unwrap();

        // The good prefix replays, the corrupt tail is cut off.
        assert_eq!(cache.keys(), vec![1, 2], "keys mismatch after replay");
        let truncated = tokio::fs::metadata(&files[0]).await.unwrap().len();
        assert_eq!(
            truncated, good_len,
            "file not truncated at last good record: got {}, exp {}",
            truncated, good_len
        );
    }

    #[tokio::test]
    async fn test_load_skips_empty_segment() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("_00001.wal");
        tokio::fs::File::create(&empty).await.unwrap();

        let cache = Cache::new(0).unwrap();
        CacheLoader::new(vec![empty]).load(&cache).await.unwrap();
        assert!(cache.keys().is_empty(), "empty segment must load nothing");
    }
}
