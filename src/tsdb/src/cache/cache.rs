use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::cache::ring::{Ring, PARTITIONS};
use crate::cache::value::{self, Value};

/// CacheStatistics tracks write outcomes and the in-memory footprint.
#[derive(Default)]
pub struct CacheStatistics {
    pub mem_size_bytes: AtomicI64,
    pub write_ok: AtomicI64,
    pub write_err: AtomicI64,
}

struct CacheState {
    store: Ring,
    snapshot: Option<Arc<Cache>>,
    snapshotting: bool,
    last_write_time: Option<SystemTime>,
    last_snapshot: Option<SystemTime>,
}

/// Cache buffers recently written samples in a sharded ring until a
/// snapshot hands them to the compactor.
///
/// `size` counts bytes admitted into the active ring, `snapshot_size` the
/// bytes frozen in the snapshot cache; their sum is the total footprint
/// checked against `max_size` on admission.
pub struct Cache {
    max_size: u64,
    size: AtomicU64,
    snapshot_size: AtomicU64,
    stats: CacheStatistics,
    state: RwLock<CacheState>,
}

impl Cache {
    /// Creates a cache bounded to max_size bytes.  A max_size of zero
    /// disables the admission check.
    pub fn new(max_size: u64) -> anyhow::Result<Self> {
        Ok(Self {
            max_size,
            size: AtomicU64::new(0),
            snapshot_size: AtomicU64::new(0),
            stats: CacheStatistics::default(),
            state: RwLock::new(CacheState {
                store: Ring::new(PARTITIONS)?,
                snapshot: None,
                snapshotting: false,
                last_write_time: None,
                last_snapshot: None,
            }),
        })
    }

    /// Size returns the total in-memory footprint, active plus snapshot.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst) + self.snapshot_size.load(Ordering::SeqCst)
    }

    pub fn statistics(&self) -> &CacheStatistics {
        &self.stats
    }

    /// Time of the most recent successful write, if any.
    pub fn last_write_time(&self) -> Option<SystemTime> {
        self.state.read().unwrap().last_write_time
    }

    /// Time of the most recent snapshot swap, if any.
    pub fn last_snapshot(&self) -> Option<SystemTime> {
        self.state.read().unwrap().last_snapshot
    }

    /// Writes one series worth of samples.
    pub fn write(&self, key: u32, ts: &[i64], values: &[u8]) -> anyhow::Result<()> {
        if ts.len() != values.len() {
            return Err(anyhow!("data array length not equal"));
        }

        let mut added = ts.len() as u64;
        let limit = self.max_size;
        let n = self.size() + added;
        if limit > 0 && n > limit {
            self.stats.write_err.fetch_add(1, Ordering::SeqCst);
            return Err(anyhow!("cache-max-memory-size exceeded: ({}/{})", n, limit));
        }

        let new_key = {
            let state = self.state.read().unwrap();
            match state.store.write(key, ts, values) {
                Ok(new_key) => new_key,
                Err(e) => {
                    self.stats.write_err.fetch_add(1, Ordering::SeqCst);
                    return Err(e);
                }
            }
        };

        if new_key {
            // The series key itself occupies 4 bytes.
            added += 4;
        }
        self.size.fetch_add(added, Ordering::SeqCst);
        self.stats
            .mem_size_bytes
            .fetch_add(added as i64, Ordering::SeqCst);
        self.stats.write_ok.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.write().unwrap();
        state.last_write_time = Some(SystemTime::now());

        Ok(())
    }

    /// Writes samples for many series at once.  The admission check covers
    /// the aggregate size; a failed series is subtracted back out and the
    /// first error is surfaced after the remaining series were written.
    pub fn write_multi(&self, values: &BTreeMap<u32, Vec<Value>>) -> anyhow::Result<()> {
        let mut added: u64 = values.values().map(|v| v.len() as u64).sum();
        let limit = self.max_size;
        let n = self.size() + added;
        if limit > 0 && n > limit {
            self.stats.write_err.fetch_add(1, Ordering::SeqCst);
            return Err(anyhow!("cache-max-memory-size exceeded: ({}/{})", n, limit));
        }

        let mut werr = None;
        self.size.fetch_add(added, Ordering::SeqCst);
        {
            let state = self.state.read().unwrap();
            for (k, v) in values {
                match state.store.write_values(*k, v.clone()) {
                    Ok(true) => {
                        added += 4;
                        self.size.fetch_add(4, Ordering::SeqCst);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        added -= v.len() as u64;
                        self.size.fetch_sub(v.len() as u64, Ordering::SeqCst);
                        werr = Some(e);
                    }
                }
            }
        }

        if werr.is_some() {
            self.stats.write_err.fetch_add(1, Ordering::SeqCst);
        }
        self.stats
            .mem_size_bytes
            .fetch_add(added as i64, Ordering::SeqCst);
        self.stats.write_ok.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.write().unwrap();
        state.last_write_time = Some(SystemTime::now());

        match werr {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Freezes the active ring into the snapshot cache by swapping rings
    /// and moving the size accounting over.  An undrained snapshot from a
    /// previous call is returned as is.
    pub fn snapshot(&self) -> anyhow::Result<Arc<Cache>> {
        let mut state = self.state.write().unwrap();

        if state.snapshotting {
            return Err(anyhow!("snapshot in progress"));
        }
        state.snapshotting = true;

        let snap = match &state.snapshot {
            Some(snap) => snap.clone(),
            None => {
                let snap = Arc::new(Cache::new(0)?);
                state.snapshot = Some(snap.clone());
                snap
            }
        };

        // The previous snapshot has not been drained by the compactor yet.
        if snap.size() > 0 {
            state.snapshotting = false;
            return Ok(snap);
        }

        {
            let mut snap_state = snap.state.write().unwrap();
            std::mem::swap(&mut state.store, &mut snap_state.store);
        }

        // Only the active counter moves into the snapshot; the old
        // snapshot_size belongs to an already-released cycle and must not
        // be re-absorbed.
        let snapshot_size = self.size.load(Ordering::SeqCst);
        snap.size.store(snapshot_size, Ordering::SeqCst);
        self.snapshot_size.store(snapshot_size, Ordering::SeqCst);

        // The ring handed back by the snapshot still holds drained series.
        state.store.reset();
        self.size.store(0, Ordering::SeqCst);

        state.last_snapshot = Some(SystemTime::now());
        state.snapshotting = false;

        Ok(snap)
    }

    /// Marks this cache's contents as drained.  The compactor calls this
    /// on a snapshot cache once its blocks are durable, re-arming the
    /// owning cache's next snapshot swap.  The ring is cleared too, so
    /// drained series stop resolving through the owner's merge reads.
    pub fn release(&self) {
        let state = self.state.write().unwrap();
        state.store.reset();
        self.size.store(0, Ordering::SeqCst);
    }

    /// Returns the sorted keys of the active ring.
    pub fn keys(&self) -> Vec<u32> {
        let state = self.state.read().unwrap();
        state.store.keys(true)
    }

    /// Count returns the number of samples buffered in the active ring.
    pub fn count(&self) -> usize {
        let state = self.state.read().unwrap();
        state.store.count()
    }

    /// Deduplicates every entry in the active ring.
    pub fn deduplicate(&self) {
        let state = self.state.read().unwrap();
        state.store.apply(|_, e| e.deduplicate());
    }

    /// Returns the merged samples for a key: snapshot first, then active,
    /// deduplicated so the most recent write wins.
    pub fn values(&self, key: u32) -> Vec<Value> {
        let (e, snapshot_entry) = {
            let state = self.state.read().unwrap();
            let e = state.store.entry(key);
            let se = match &state.snapshot {
                Some(snap) => {
                    let snap_state = snap.state.read().unwrap();
                    snap_state.store.entry(key)
                }
                None => None,
            };
            (e, se)
        };

        let mut values = Vec::new();
        if let Some(se) = &snapshot_entry {
            se.deduplicate();
            values.extend(se.values());
        }
        if let Some(e) = &e {
            e.deduplicate();
            values.extend(e.values());
        }

        value::deduplicate(&mut values);
        values
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::Cache;
    use crate::cache::value::Value;

    #[test]
    fn test_write_then_read() {
        let c = Cache::new(0).unwrap();

        let ts: Vec<i64> = (0..10).collect();
        let values: Vec<u8> = (5..15).collect();
        c.write(2, &ts, &values).unwrap();

        let got = c.values(2);
        assert_eq!(got.len(), 10, "count mismatch: got {}, exp {}", got.len(), 10);
        for (i, v) in got.iter().enumerate() {
            assert_eq!(v.unix_nano, i as i64, "timestamp {} mismatch", i);
            assert_eq!(v.value, (i + 5) as u8, "value {} mismatch", i);
        }
    }

    #[test]
    fn test_write_length_mismatch() {
        let c = Cache::new(0).unwrap();
        let err = c.write(1, &[1, 2], &[1]).unwrap_err();
        assert!(
            err.to_string().contains("data array length not equal"),
            "unexpected error: {}",
            err
        );
    }

    #[test]
    fn test_write_max_size_exceeded() {
        let c = Cache::new(8).unwrap();

        c.write(1, &[1, 2, 3, 4], &[1, 2, 3, 4]).unwrap();

        // 4 samples + 4 bytes key overhead leave no room.
        let err = c.write(2, &[5], &[5]).unwrap_err();
        assert!(
            err.to_string().contains("cache-max-memory-size exceeded"),
            "unexpected error: {}",
            err
        );
        assert_eq!(
            c.statistics().write_err.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn test_size_accounting() {
        let c = Cache::new(0).unwrap();

        c.write(1, &[1, 2, 3], &[1, 2, 3]).unwrap();
        assert_eq!(c.size(), 3 + 4, "size mismatch: got {}, exp {}", c.size(), 7);

        c.write(1, &[4], &[4]).unwrap();
        assert_eq!(c.size(), 4 + 4, "size mismatch: got {}, exp {}", c.size(), 8);
        assert_eq!(c.count(), 4, "count mismatch: got {}, exp {}", c.count(), 4);
    }

    #[test]
    fn test_write_multi() {
        let c = Cache::new(0).unwrap();

        let mut values = BTreeMap::new();
        values.insert(1u32, vec![Value::new(1, 1), Value::new(2, 2)]);
        values.insert(2u32, vec![Value::new(1, 9)]);
        c.write_multi(&values).unwrap();

        assert_eq!(c.size(), 3 + 8, "size mismatch: got {}, exp {}", c.size(), 11);
        assert_eq!(c.values(1).len(), 2);
        assert_eq!(c.values(2).len(), 1);
    }

    #[test]
    fn test_dedup_last_wins() {
        let c = Cache::new(0).unwrap();

        let ts: Vec<i64> = (0..10).collect();
        c.write(1, &ts, &(5..15).collect::<Vec<u8>>()).unwrap();
        c.write(1, &ts, &(15..25).collect::<Vec<u8>>()).unwrap();

        c.deduplicate();

        let got = c.values(1);
        assert_eq!(got.len(), 10, "count mismatch: got {}, exp {}", got.len(), 10);
        for (i, v) in got.iter().enumerate() {
            assert_eq!(
                v.value,
                (i + 15) as u8,
                "value {} mismatch: got {}, exp {}",
                i,
                v.value,
                i + 15
            );
        }
    }

    #[test]
    fn test_snapshot_swap() {
        let c = Cache::new(0).unwrap();

        let ts: Vec<i64> = (0..10).collect();
        c.write(2, &ts, &(5..15).collect::<Vec<u8>>()).unwrap();

        let snap = c.snapshot().unwrap();
        assert_eq!(snap.size(), 14, "snapshot size mismatch: got {}, exp {}", snap.size(), 14);
        assert_eq!(c.size(), 14, "cache still accounts the snapshot bytes");
        assert!(c.keys().is_empty(), "active ring must be empty after snapshot");

        // Values for the snapshotted key still resolve through the cache.
        assert_eq!(c.values(2).len(), 10);

        // New writes after the snapshot land in the fresh active ring.
        let ts2: Vec<i64> = (20..30).collect();
        c.write(1, &ts2, &(25..35).collect::<Vec<u8>>()).unwrap();

        let got = c.values(1);
        assert_eq!(got.len(), 10, "count mismatch: got {}, exp {}", got.len(), 10);
        for (i, v) in got.iter().enumerate() {
            assert_eq!(v.unix_nano, 20 + i as i64, "timestamp {} mismatch", i);
            assert_eq!(v.value, (25 + i) as u8, "value {} mismatch", i);
        }
    }

    #[test]
    fn test_snapshot_returns_undrained() {
        let c = Cache::new(0).unwrap();
        c.write(1, &[1], &[1]).unwrap();

        let snap1 = c.snapshot().unwrap();
        c.write(2, &[2], &[2]).unwrap();

        // The first snapshot was not released, so it is handed back and
        // the new write stays in the active ring.
        let snap2 = c.snapshot().unwrap();
        assert!(Arc::ptr_eq(&snap1, &snap2), "expected the undrained snapshot");
        assert_eq!(snap2.keys(), vec![1]);
        assert_eq!(c.keys(), vec![2]);
    }

    #[test]
    fn test_snapshot_release_rearms() {
        let c = Cache::new(0).unwrap();
        c.write(1, &[1], &[1]).unwrap();

        let snap = c.snapshot().unwrap();
        snap.release();

        // The drained series no longer resolves through the merge read.
        assert!(
            c.values(1).is_empty(),
            "released snapshot still exposes key 1: {:?}",
            c.values(1)
        );

        c.write(2, &[2], &[2]).unwrap();
        let snap2 = c.snapshot().unwrap();
        assert_eq!(snap2.keys(), vec![2], "second snapshot must hold the new write");

        // The second cycle accounts only its own 5 bytes; the released
        // cycle's bytes must not be re-absorbed.
        assert_eq!(c.size(), 5, "size mismatch: got {}, exp {}", c.size(), 5);
        assert_eq!(
            snap2.size(),
            5,
            "snapshot size mismatch: got {}, exp {}",
            snap2.size(),
            5
        );
    }
}
