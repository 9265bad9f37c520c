use std::sync::{Arc, RwLock};

use crate::cache::value::{self, Value};

/// Entry is the per-series in-memory buffer of samples, shared between the
/// partition map and readers.
#[derive(Clone)]
pub struct Entry {
    mu: Arc<RwLock<Vec<Value>>>,
}

impl Entry {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            mu: Arc::new(RwLock::new(values)),
        }
    }

    /// Appends values.  An empty entry takes ownership of the incoming
    /// buffer instead of copying it.
    pub fn add(&self, values: Vec<Value>) -> anyhow::Result<()> {
        if values.is_empty() {
            return Ok(());
        }

        let mut inner = self.mu.write().unwrap();
        if inner.is_empty() {
            *inner = values;
        } else {
            inner.extend_from_slice(&values);
        }
        Ok(())
    }

    pub fn deduplicate(&self) {
        let mut inner = self.mu.write().unwrap();
        if inner.len() <= 1 {
            return;
        }
        value::deduplicate(&mut inner);
    }

    pub fn count(&self) -> usize {
        let inner = self.mu.read().unwrap();
        inner.len()
    }

    pub fn values(&self) -> Vec<Value> {
        let inner = self.mu.read().unwrap();
        inner.clone()
    }
}
