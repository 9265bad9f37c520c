pub mod tsm1;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::value::Value;
use crate::cache::{Cache, CacheLoader};
use crate::engine::tsm1::compact::Compactor;
use crate::engine::tsm1::file_store::FileStore;
use crate::wal::{self, Wal};

/// Config ties the write path's tunables together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding WAL segments.
    pub wal_dir: PathBuf,
    /// Directory TSM files are compacted into.
    pub tsm_dir: PathBuf,
    /// Upper bound on cache memory; zero disables the admission check.
    pub cache_max_memory_size: u64,
    /// Delay before a group-commit fsync, letting concurrent writes share
    /// one sync.
    pub wal_sync_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wal_dir: PathBuf::from("wal"),
            tsm_dir: PathBuf::from("data"),
            cache_max_memory_size: 1024 * 1024 * 1024,
            wal_sync_delay_ms: 0,
        }
    }
}

/// Engine is the write path: WAL for durability, cache for visibility,
/// compactor for turning snapshots into TSM files.
pub struct Engine {
    cache: Arc<Cache>,
    wal: Wal,
    compactor: Compactor,
}

impl Engine {
    /// Opens the engine: creates the directories, replays existing WAL
    /// segments into the cache and arms the compactor.
    pub async fn open(config: Config) -> anyhow::Result<Engine> {
        tokio::fs::create_dir_all(&config.wal_dir).await?;
        tokio::fs::create_dir_all(&config.tsm_dir).await?;

        let cache = Arc::new(Cache::new(config.cache_max_memory_size)?);

        let segments = wal::segment_file_names(&config.wal_dir).await?;
        if !segments.is_empty() {
            info!(segments = segments.len(), "replaying wal");
            CacheLoader::new(segments).load(&cache).await?;
        }

        let wal = Wal::new(config.wal_dir.clone())
            .with_sync_delay(Duration::from_millis(config.wal_sync_delay_ms));
        wal.open().await?;

        let compactor = Compactor::new(config.tsm_dir.clone(), Arc::new(FileStore::new()));
        compactor.open();

        Ok(Engine {
            cache,
            wal,
            compactor,
        })
    }

    /// Writes samples for many series: durable in the WAL first, then
    /// visible in the cache.
    pub async fn write_points(&self, values: &BTreeMap<u32, Vec<Value>>) -> anyhow::Result<()> {
        self.wal.write_multi(values).await?;
        self.cache.write_multi(values)?;
        Ok(())
    }

    /// Flushes the cache to TSM files: swap out a snapshot, deduplicate
    /// it, compact it.  Returns the files written.
    pub async fn write_snapshot(&self) -> anyhow::Result<Vec<PathBuf>> {
        let snapshot = self.cache.snapshot()?;
        snapshot.deduplicate();

        let files = self.compactor.write_snapshot(snapshot).await?;
        Ok(files)
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn wal(&self) -> &Wal {
        &self.wal
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        self.compactor.close();
        self.wal.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{Config, Engine};
    use crate::cache::value::Value;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            wal_dir: dir.join("wal"),
            tsm_dir: dir.join("data"),
            ..Config::default()
        }
    }

    fn sample_values(key: u32) -> BTreeMap<u32, Vec<Value>> {
        let mut values = BTreeMap::new();
        values.insert(key, (0..10).map(|i| Value::new(i, (i + 5) as u8)).collect());
        values
    }

    #[tokio::test]
    async fn test_write_snapshot_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(test_config(dir.path())).await.unwrap();

        engine.write_points(&sample_values(1)).await.unwrap();
        engine.write_points(&sample_values(2)).await.unwrap();

        let files = engine.write_snapshot().await.unwrap();
        assert_eq!(files.len(), 1, "file count mismatch: got {}, exp {}", files.len(), 1);
        assert!(files[0].exists(), "tsm file missing");

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_replays_wal() {
        let dir = tempfile::tempdir().unwrap();

        {
            let engine = Engine::open(test_config(dir.path())).await.unwrap();
            engine.write_points(&sample_values(9)).await.unwrap();
            engine.close().await.unwrap();
        }

        let engine = Engine::open(test_config(dir.path())).await.unwrap();
        let got = engine.cache().values(9);
        assert_eq!(got.len(), 10, "replayed count mismatch: got {}, exp {}", got.len(), 10);
        assert_eq!(got[0], Value::new(0, 5), "replayed sample mismatch");
        engine.close().await.unwrap();
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.wal_dir, std::path::PathBuf::from("wal"));
        assert_eq!(config.cache_max_memory_size, 1024 * 1024 * 1024);
        assert_eq!(config.wal_sync_delay_ms, 0);
    }
}
