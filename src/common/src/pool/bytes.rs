use std::collections::VecDeque;
use std::sync::Mutex;

/// LimitedBytes is a bounded free-list of reusable byte buffers.
///
/// `get` never blocks: it pops a pooled buffer when one is available and
/// falls back to a fresh allocation otherwise.  `put` drops buffers that
/// have grown past `max_size` so the pool never pins oversized allocations.
pub struct LimitedBytes {
    max_size: usize,
    capacity: usize,
    pool: Mutex<VecDeque<Vec<u8>>>,
}

impl LimitedBytes {
    pub fn new(capacity: usize, max_size: usize) -> Self {
        Self {
            max_size,
            capacity,
            pool: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Returns a buffer of length `sz`.  A pooled buffer whose capacity is
    /// too small is discarded and replaced by a fresh allocation.
    pub fn get(&self, sz: usize) -> Vec<u8> {
        let pooled = self.pool.lock().unwrap().pop_front();

        match pooled {
            Some(mut buf) if buf.capacity() >= sz => {
                buf.clear();
                buf.resize(sz, 0);
                buf
            }
            _ => vec![0; sz],
        }
    }

    /// Returns a buffer to the pool.  Buffers at or above `max_size` are
    /// dropped, as are buffers arriving while the free-list is full.
    pub fn put(&self, buf: Vec<u8>) {
        if buf.capacity() >= self.max_size {
            return;
        }

        let mut pool = self.pool.lock().unwrap();
        if pool.len() < self.capacity {
            pool.push_back(buf);
        }
    }
}
