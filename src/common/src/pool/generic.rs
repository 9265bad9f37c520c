use std::sync::Mutex;

/// Generic is a bounded pool of reusable objects built by a constructor
/// function.  `get` falls through to the constructor when the pool is
/// empty; `put` drops the object when the pool is full.  Neither blocks.
pub struct Generic<T> {
    max: usize,
    f: fn(usize) -> T,
    pool: Mutex<Vec<T>>,
}

impl<T> Generic<T> {
    pub fn new(max: usize, f: fn(usize) -> T) -> Self {
        Self {
            max,
            f,
            pool: Mutex::new(Vec::with_capacity(max)),
        }
    }

    pub fn get(&self, sz: usize) -> T {
        let pooled = self.pool.lock().unwrap().pop();
        match pooled {
            Some(v) => v,
            None => (self.f)(sz),
        }
    }

    pub fn put(&self, v: T) {
        let mut pool = self.pool.lock().unwrap();
        if pool.len() < self.max {
            pool.push(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Generic;

    #[test]
    fn test_get_falls_through_to_constructor() {
        let pool: Generic<Vec<u64>> = Generic::new(2, Vec::with_capacity);

        let v = pool.get(16);
        assert!(v.capacity() >= 16, "constructor not applied");
    }

    #[test]
    fn test_put_then_get_round_trip() {
        let pool: Generic<Vec<u64>> = Generic::new(2, Vec::with_capacity);

        let mut v = pool.get(4);
        v.push(7);
        pool.put(v);

        let v = pool.get(4);
        assert_eq!(v, vec![7], "expected the pooled object back");
    }

    #[test]
    fn test_put_drops_on_full_pool() {
        let pool: Generic<Vec<u64>> = Generic::new(1, Vec::with_capacity);

        pool.put(vec![1]);
        pool.put(vec![2]);

        let inner = pool.pool.lock().unwrap();
        assert_eq!(inner.len(), 1, "pool overfilled: got {}, exp {}", inner.len(), 1);
    }
}
