//! MPMC queue carrying request identifiers from the gateway to replicas.
//!
//! Ordering is best-effort FIFO. Replies are routed by identifier, so no
//! caller depends on the order in which replicas drain the queue.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use super::RequestId;
use crate::error::Error;

/// Every producer handle is gone; consumers should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("request queue closed")]
pub struct QueueClosed;

/// Create a queue, unbounded unless `capacity` is given.
pub fn request_queue(capacity: Option<usize>) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = match capacity {
        Some(cap) => crossbeam_channel::bounded(cap),
        None => crossbeam_channel::unbounded(),
    };
    (QueueSender { tx }, QueueReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: Sender<RequestId>,
}

impl QueueSender {
    /// Enqueue without blocking. A bounded queue at capacity rejects the id.
    pub fn put(&self, id: RequestId) -> Result<(), Error> {
        self.tx.try_send(id).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull,
            TrySendError::Disconnected(_) => Error::Internal(QueueClosed.to_string()),
        })
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct QueueReceiver {
    rx: Receiver<RequestId>,
}

impl QueueReceiver {
    /// Wait up to `timeout` for the next identifier.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. Items still buffered
    /// are handed out before `QueueClosed` is reported.
    pub fn get(&self, timeout: Duration) -> Result<Option<RequestId>, QueueClosed> {
        match self.rx.recv_timeout(timeout) {
            Ok(id) => Ok(Some(id)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(QueueClosed),
        }
    }
}
