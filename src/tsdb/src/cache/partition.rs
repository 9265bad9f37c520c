use std::collections::HashMap;
use std::sync::RwLock;

use crate::cache::entry::Entry;
use crate::cache::value::Value;

/// Partition is one shard of the ring: a series map behind a rw-lock.
pub struct Partition {
    store: RwLock<HashMap<u32, Entry>>,
}

impl Partition {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Appends values to the series entry, creating it when missing.
    /// Returns true only when the entry was created by this call.
    pub fn write(&self, key: u32, values: Vec<Value>) -> anyhow::Result<bool> {
        {
            let inner = self.store.read().unwrap();
            if let Some(e) = inner.get(&key) {
                e.add(values)?;
                return Ok(false);
            }
        }

        let mut inner = self.store.write().unwrap();

        // Another writer may have installed the entry while the read lock
        // was released.
        if let Some(e) = inner.get(&key) {
            e.add(values)?;
            return Ok(false);
        }

        inner.insert(key, Entry::new(values));
        Ok(true)
    }

    pub fn entry(&self, key: u32) -> Option<Entry> {
        let inner = self.store.read().unwrap();
        inner.get(&key).cloned()
    }

    pub fn keys<F>(&self, mut f: F)
    where
        F: FnMut(u32),
    {
        let inner = self.store.read().unwrap();
        for (k, e) in inner.iter() {
            if e.count() == 0 {
                continue;
            }
            f(*k);
        }
    }

    pub fn each<F>(&self, f: &mut F)
    where
        F: FnMut(u32, &Entry),
    {
        let inner = self.store.read().unwrap();
        for (k, e) in inner.iter() {
            f(*k, e);
        }
    }

    pub fn reset(&self) {
        let mut inner = self.store.write().unwrap();
        inner.clear();
    }

    pub fn count(&self) -> usize {
        let inner = self.store.read().unwrap();
        inner.values().map(|e| e.count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::Partition;
    use crate::cache::value::Value;

    #[test]
    fn test_write_reports_new_key() {
        let p = Partition::new();

        let new_key = p.write(7, vec![Value::new(1, 1)]).unwrap();
        assert!(new_key, "first write must create the entry");

        let new_key = p.write(7, vec![Value::new(2, 2)]).unwrap();
        assert!(!new_key, "second write must reuse the entry");

        assert_eq!(p.count(), 2, "count mismatch: got {}, exp {}", p.count(), 2);
    }

    #[test]
    fn test_reset_clears() {
        let p = Partition::new();
        p.write(1, vec![Value::new(1, 1)]).unwrap();

        p.reset();

        assert!(p.entry(1).is_none(), "entry must be dropped by reset");
        assert_eq!(p.count(), 0);
    }
}
