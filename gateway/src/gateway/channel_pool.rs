//! Pool of reply channels.
//!
//! Each in-flight request holds one channel pair: the sender travels with the
//! request envelope to a replica, the receiver stays with the waiting handler.
//! Pooling only amortizes allocation; a miss simply builds a fresh pair.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::Error;

/// One encoded result, or the error that replaced it.
pub type Reply = Result<serde_json::Value, Error>;
pub type ReplySender = mpsc::Sender<Reply>;
pub type ReplyReceiver = mpsc::Receiver<Reply>;

/// A single reply fits without blocking the replica.
const REPLY_CAPACITY: usize = 1;

pub struct ChannelPool {
    pairs: Mutex<Vec<(ReplySender, ReplyReceiver)>>,
    max_size: usize,
}

impl ChannelPool {
    /// Create a pool pre-filled with `initial_size` pairs (capped at `max_size`).
    pub fn new(initial_size: usize, max_size: usize) -> Self {
        let pairs = (0..initial_size.min(max_size))
            .map(|_| mpsc::channel(REPLY_CAPACITY))
            .collect();
        Self {
            pairs: Mutex::new(pairs),
            max_size,
        }
    }

    /// Take a free pair, or build one when the pool is empty.
    pub fn acquire(&self) -> (ReplySender, ReplyReceiver) {
        self.pairs
            .lock()
            .pop()
            .unwrap_or_else(|| mpsc::channel(REPLY_CAPACITY))
    }

    /// Return a pair after its reply has been received.
    ///
    /// The pair is dropped instead when the pool is already full. Only pairs
    /// whose reply was consumed may be released; an abandoned pair could still
    /// receive a late reply and must be dropped by the caller.
    pub fn release(&self, sender: ReplySender, mut receiver: ReplyReceiver) {
        while receiver.try_recv().is_ok() {}

        let mut pairs = self.pairs.lock();
        if pairs.len() < self.max_size {
            pairs.push((sender, receiver));
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prefilled() {
        let pool = ChannelPool::new(100, 1000);
        assert_eq!(pool.len(), 100);

        let pool = ChannelPool::new(10, 4);
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn test_acquire_from_empty_pool_builds_pair() {
        let pool = ChannelPool::new(3, 10);
        for _ in 0..3 {
            pool.acquire();
        }
        assert!(pool.is_empty());

        let (tx, mut rx) = pool.acquire();
        tx.try_send(Ok(json!(1))).unwrap();
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!(1));
    }

    #[test]
    fn test_release_never_exceeds_max() {
        let pool = ChannelPool::new(0, 5);
        for _ in 0..15 {
            let (tx, rx) = mpsc::channel(REPLY_CAPACITY);
            pool.release(tx, rx);
            assert!(pool.len() <= pool.max_size());
        }
        assert_eq!(pool.len(), 5);
    }

    #[test]
    fn test_released_pair_is_drained() {
        let pool = ChannelPool::new(0, 1);
        let (tx, rx) = pool.acquire();
        tx.try_send(Ok(json!("stale"))).unwrap();
        pool.release(tx, rx);

        let (_tx, mut rx) = pool.acquire();
        assert!(rx.try_recv().is_err());
    }
}
