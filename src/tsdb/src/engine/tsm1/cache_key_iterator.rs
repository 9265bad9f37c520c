use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, watch};

use crate::cache::Cache;
use crate::engine::tsm1::encoding::{
    encode_byte_block_using, get_byte_encoder, get_time_encoder, put_byte_encoder,
    put_time_encoder,
};

/// One encoded block of a series covering a contiguous time range.
struct CacheBlock {
    key: u32,
    min_time: i64,
    max_time: i64,
    block: Vec<u8>,
    err: Option<String>,
}

/// CacheKeyIterator drains a snapshot cache into encoded blocks.
///
/// Worker tasks claim key indexes through an atomic counter, encode each
/// key's samples into blocks of at most `size` values with pooled
/// encoders, and hand the finished list over a per-key one-shot channel.
/// The consumer walks keys in ascending order, blocking only when it
/// reaches a key that is still being encoded.
pub struct CacheKeyIterator {
    ready: Vec<Option<oneshot::Receiver<Vec<CacheBlock>>>>,
    i: isize,
    current: Vec<CacheBlock>,
    pos: usize,

    interrupt: watch::Receiver<bool>,
    err: Option<String>,
}

impl CacheKeyIterator {
    pub fn new(cache: Arc<Cache>, size: usize, interrupt: watch::Receiver<bool>) -> Self {
        let keys = Arc::new(cache.keys());

        let mut senders = Vec::with_capacity(keys.len());
        let mut receivers = Vec::with_capacity(keys.len());
        for _ in 0..keys.len() {
            let (tx, rx) = oneshot::channel();
            senders.push(Some(tx));
            receivers.push(Some(rx));
        }
        let senders = Arc::new(Mutex::new(senders));

        let iter = Self {
            ready: receivers,
            i: -1,
            current: Vec::new(),
            pos: 0,
            interrupt,
            err: None,
        };

        let concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let next_key = Arc::new(AtomicUsize::new(0));

        for _ in 0..concurrency {
            let cache = cache.clone();
            let keys = keys.clone();
            let senders = senders.clone();
            let next_key = next_key.clone();

            tokio::spawn(async move {
                let mut tenc = get_time_encoder(size);
                let mut venc = get_byte_encoder(size);

                loop {
                    let keyidx = next_key.fetch_add(1, Ordering::SeqCst);
                    if keyidx >= keys.len() {
                        break;
                    }

                    let key = keys[keyidx];
                    let values = cache.values(key);

                    let mut blocks = Vec::new();
                    let mut rest = values.as_slice();
                    while !rest.is_empty() {
                        let end = rest.len().min(size);
                        let (min_time, max_time) = (rest[0].unix_nano, rest[end - 1].unix_nano);

                        match encode_byte_block_using(&rest[..end], &mut tenc, &mut venc) {
                            Ok(b) => blocks.push(CacheBlock {
                                key,
                                min_time,
                                max_time,
                                block: b,
                                err: None,
                            }),
                            Err(e) => blocks.push(CacheBlock {
                                key,
                                min_time,
                                max_time,
                                block: Vec::new(),
                                err: Some(e.to_string()),
                            }),
                        }

                        rest = &rest[end..];
                    }

                    let tx = senders.lock().unwrap()[keyidx].take();
                    if let Some(tx) = tx {
                        let _ = tx.send(blocks);
                    }
                }

                put_time_encoder(tenc);
                put_byte_encoder(venc);
            });
        }

        iter
    }

    /// Advances to the next block, crossing to the next key once the
    /// current one is exhausted.  Keys whose encode produced nothing are
    /// skipped.
    pub async fn next(&mut self) -> bool {
        if self.i >= 0 && self.pos + 1 < self.current.len() {
            self.pos += 1;
            return true;
        }

        loop {
            self.i += 1;
            if self.i as usize >= self.ready.len() {
                return false;
            }

            let rx = match self.ready[self.i as usize].take() {
                Some(rx) => rx,
                None => continue,
            };
            let blocks = rx.await.unwrap_or_default();

            if let Some(e) = blocks.iter().find_map(|b| b.err.clone()) {
                self.err = Some(e);
            }

            if !blocks.is_empty() {
                self.current = blocks;
                self.pos = 0;
                return true;
            }
        }
    }

    /// Returns the current block.  The block bytes are handed out once;
    /// callers read each block exactly once per `next`.
    pub fn read(&mut self) -> anyhow::Result<(u32, i64, i64, Vec<u8>)> {
        if *self.interrupt.borrow() {
            return Err(anyhow!("compaction interrupted"));
        }

        let blk = &mut self.current[self.pos];
        if let Some(e) = &blk.err {
            return Err(anyhow!("{}", e));
        }

        Ok((
            blk.key,
            blk.min_time,
            blk.max_time,
            std::mem::take(&mut blk.block),
        ))
    }

    /// Err reports an encode failure seen on any key so far.
    pub fn err(&self) -> Option<&str> {
        self.err.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::watch;

    use super::CacheKeyIterator;
    use crate::cache::Cache;
    use crate::engine::tsm1::encoding::decode_byte_block;

    #[tokio::test]
    async fn test_iterates_keys_in_order() {
        let cache = Arc::new(Cache::new(0).unwrap());
        for key in [5u32, 1, 3] {
            let ts: Vec<i64> = (0..10).collect();
            let values: Vec<u8> = (0..10).map(|i| (key as u8) + i).collect();
            cache.write(key, &ts, &values).unwrap();
        }

        let (_tx, rx) = watch::channel(false);
        let mut iter = CacheKeyIterator::new(cache, 1920, rx);

        let mut got = Vec::new();
        while iter.next().await {
            let (key, min_time, max_time, block) = iter.read().unwrap();
            assert_eq!(min_time, 0);
            assert_eq!(max_time, 9);
            assert_eq!(decode_byte_block(&block).unwrap().len(), 10);
            got.push(key);
        }

        assert!(iter.err().is_none(), "unexpected iterator error");
        assert_eq!(got, [1, 3, 5], "keys not ascending: got {:?}", got);
    }

    #[tokio::test]
    async fn test_splits_blocks_at_size() {
        let cache = Arc::new(Cache::new(0).unwrap());
        let ts: Vec<i64> = (0..25).collect();
        let values: Vec<u8> = (0..25).map(|i| i as u8).collect();
        cache.write(1, &ts, &values).unwrap();

        let (_tx, rx) = watch::channel(false);
        let mut iter = CacheKeyIterator::new(cache, 10, rx);

        let mut ranges = Vec::new();
        while iter.next().await {
            let (_, min_time, max_time, block) = iter.read().unwrap();
            ranges.push((min_time, max_time, decode_byte_block(&block).unwrap().len()));
        }

        assert_eq!(
            ranges,
            [(0, 9, 10), (10, 19, 10), (20, 24, 5)],
            "block split mismatch: got {:?}",
            ranges
        );
    }

    #[tokio::test]
    async fn test_interrupt_fails_read() {
        let cache = Arc::new(Cache::new(0).unwrap());
        cache.write(1, &[1], &[1]).unwrap();

        let (tx, rx) = watch::channel(false);
        let mut iter = CacheKeyIterator::new(cache, 1920, rx);

        assert!(iter.next().await);
        tx.send(true).unwrap();
        assert!(iter.read().is_err(), "read must fail after interrupt");
    }

    #[tokio::test]
    async fn test_empty_cache() {
        let cache = Arc::new(Cache::new(0).unwrap());
        let (_tx, rx) = watch::channel(false);
        let mut iter = CacheKeyIterator::new(cache, 1920, rx);
        assert!(!iter.next().await, "empty cache must yield nothing");
    }
}
