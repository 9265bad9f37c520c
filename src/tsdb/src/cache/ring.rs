use std::hash::Hasher;
use std::sync::Arc;

use twox_hash::XxHash64;

use crate::cache::entry::Entry;
use crate::cache::partition::Partition;
use crate::cache::value::Value;

/// PARTITIONS is the fixed shard count of a ring.
pub(crate) const PARTITIONS: usize = 16;

/// Ring routes series keys onto a fixed set of partitions by hash.
pub struct Ring {
    partitions: Vec<Arc<Partition>>,
}

impl Ring {
    pub fn new(n: usize) -> anyhow::Result<Self> {
        if n == 0 || n > PARTITIONS {
            return Err(anyhow!("invalid partition count: {}", n));
        }

        let mut partitions = Vec::with_capacity(n);
        for _ in 0..n {
            partitions.push(Arc::new(Partition::new()));
        }

        Ok(Self { partitions })
    }

    /// Routes by the xxhash of the key's 4 big-endian bytes.
    fn partition(&self, key: u32) -> &Partition {
        let mut h = XxHash64::with_seed(0);
        h.write(&key.to_be_bytes());
        let n = h.finish();
        &self.partitions[(n % self.partitions.len() as u64) as usize]
    }

    pub fn entry(&self, key: u32) -> Option<Entry> {
        self.partition(key).entry(key)
    }

    pub fn write(&self, key: u32, ts: &[i64], values: &[u8]) -> anyhow::Result<bool> {
        let vls: Vec<Value> = ts
            .iter()
            .zip(values.iter())
            .map(|(t, v)| Value::new(*t, *v))
            .collect();
        self.write_values(key, vls)
    }

    pub fn write_values(&self, key: u32, values: Vec<Value>) -> anyhow::Result<bool> {
        self.partition(key).write(key, values)
    }

    pub fn keys(&self, sorted: bool) -> Vec<u32> {
        let mut keys = Vec::new();
        for p in &self.partitions {
            p.keys(|key| keys.push(key));
        }

        if sorted {
            keys.sort_unstable();
        }

        keys
    }

    pub fn apply<F>(&self, mut f: F)
    where
        F: FnMut(u32, &Entry),
    {
        for p in &self.partitions {
            p.each(&mut f);
        }
    }

    pub fn reset(&self) {
        for p in &self.partitions {
            p.reset();
        }
    }

    pub fn count(&self) -> usize {
        self.partitions.iter().map(|p| p.count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::Ring;
    use crate::cache::value::Value;

    #[test]
    fn test_keys_sorted() {
        let ring = Ring::new(16).unwrap();
        for key in [9u32, 2, 14, 0, 7] {
            ring.write_values(key, vec![Value::new(1, 1)]).unwrap();
        }

        let keys = ring.keys(true);
        assert_eq!(keys, [0, 2, 7, 9, 14], "keys mismatch: got {:?}", keys);
    }

    #[test]
    fn test_keys_spread_across_partitions() {
        let ring = Ring::new(16).unwrap();
        for key in 0u32..256 {
            ring.write_values(key, vec![Value::new(1, 1)]).unwrap();
        }

        let used = ring
            .partitions
            .iter()
            .filter(|p| p.count() > 0)
            .count();
        assert!(
            used > 1,
            "keys collapsed into {} partition(s); hash routing is broken",
            used
        );
        assert_eq!(ring.count(), 256);
    }

    #[test]
    fn test_invalid_partition_count() {
        assert!(Ring::new(0).is_err(), "0 partitions must be rejected");
        assert!(Ring::new(17).is_err(), "17 partitions must be rejected");
    }
}
