//! Gateway-side dispatch of one unit of work.
//!
//! The dispatcher runs inside HTTP handlers. Its only suspension point is the
//! wait on the reply receiver, bounded by the configured timeout.

use std::time::Duration;

use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ChannelPool, QueueSender, Reply, ReplyReceiver, RequestId, RequestTable};
use crate::error::Error;

/// Chunks a streaming replica may run ahead of its caller.
pub const STREAM_BUFFER: usize = 16;

/// Removes the table entry when dropped.
///
/// Runs on every exit path of a dispatch: reply, error, timeout, or the
/// handler future being dropped because the client went away. A replica
/// that already took the entry turns this into a no-op.
struct CleanupGuard<'a> {
    table: &'a RequestTable,
    id: RequestId,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        if self.table.take(&self.id).is_some() {
            tracing::debug!(id = %self.id, "removed unconsumed request");
        }
    }
}

pub struct Dispatcher {
    table: RequestTable,
    queue: QueueSender,
    pool: ChannelPool,
    timeout: Duration,
    streaming: bool,
}

impl Dispatcher {
    pub fn new(
        table: RequestTable,
        queue: QueueSender,
        pool: ChannelPool,
        timeout: Duration,
    ) -> Self {
        Self {
            table,
            queue,
            pool,
            timeout,
            streaming: false,
        }
    }

    /// Replicas answer with chunk streams; use [`Dispatcher::dispatch_stream`].
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Hand `payload` to a replica and wait for its reply.
    pub async fn dispatch(&self, payload: serde_json::Value) -> Reply {
        if self.streaming {
            // A pooled pair would receive chunks meant for an earlier caller.
            return Err(Error::Internal(
                "single-reply dispatch on a streaming server".to_string(),
            ));
        }

        let id = RequestId::new();
        let (sender, mut receiver) = self.pool.acquire();

        self.table.insert(id, payload, sender.clone());
        let _cleanup = CleanupGuard {
            table: &self.table,
            id,
        };
        self.queue.put(id)?;

        match tokio::time::timeout(self.timeout, receiver.recv()).await {
            Ok(Some(reply)) => {
                self.pool.release(sender, receiver);
                reply
            }
            Ok(None) => Err(Error::Internal("reply channel closed".to_string())),
            Err(_) => {
                // The pair is dropped, not pooled: a late reply lands nowhere.
                tracing::warn!(
                    %id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(Error::RequestTimeout)
            }
        }
    }

    /// Hand `payload` to a streaming replica and wait for its first chunk.
    ///
    /// Each stream gets its own bounded channel, never pooled. The timeout
    /// covers the first chunk only. An error in place of the first chunk is
    /// returned directly, so it can still become an HTTP status.
    pub async fn dispatch_stream(&self, payload: serde_json::Value) -> Result<ReplyStream, Error> {
        let id = RequestId::new();
        let (sender, mut receiver) = mpsc::channel(STREAM_BUFFER);

        self.table.insert(id, payload, sender);
        let _cleanup = CleanupGuard {
            table: &self.table,
            id,
        };
        self.queue.put(id)?;

        match tokio::time::timeout(self.timeout, receiver.recv()).await {
            Ok(Some(first)) => Ok(ReplyStream {
                first: Some(first?),
                rest: receiver,
            }),
            Ok(None) => Ok(ReplyStream {
                first: None,
                rest: receiver,
            }),
            Err(_) => {
                tracing::warn!(
                    %id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "stream timed out before its first chunk"
                );
                Err(Error::RequestTimeout)
            }
        }
    }

    /// Number of requests not yet claimed by a replica.
    pub fn pending(&self) -> usize {
        self.table.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn pool(&self) -> &ChannelPool {
        &self.pool
    }

}

/// A streamed reply whose first chunk has already arrived.
///
/// Dropping it tells the replica to stop producing.
pub struct ReplyStream {
    first: Option<serde_json::Value>,
    rest: ReplyReceiver,
}

impl ReplyStream {
    /// Every chunk in production order. An `Err` item ends the stream.
    pub fn into_stream(self) -> impl Stream<Item = Reply> + Send + 'static {
        stream::iter(self.first.map(Ok)).chain(ReceiverStream::new(self.rest))
    }

    /// Drain the remaining chunks.
    pub async fn collect(self) -> Result<Vec<serde_json::Value>, Error> {
        let mut chunks = Vec::new();
        let mut chunks_stream = Box::pin(self.into_stream());
        while let Some(chunk) = chunks_stream.next().await {
            chunks.push(chunk?);
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{request_queue, QueueReceiver};
    use serde_json::json;
    use std::sync::Arc;

    fn dispatcher(timeout: Duration, capacity: Option<usize>) -> (Arc<Dispatcher>, QueueReceiver, RequestTable) {
        let table = RequestTable::new();
        let (tx, rx) = request_queue(capacity);
        let dispatcher = Dispatcher::new(table.clone(), tx, ChannelPool::new(2, 4), timeout);
        (Arc::new(dispatcher), rx, table)
    }

    /// Answers every request by echoing its payload back.
    fn echo_replica(rx: QueueReceiver, table: RequestTable) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            while let Ok(next) = rx.get(Duration::from_millis(10)) {
                if let Some(id) = next {
                    if let Some(envelope) = table.take(&id) {
                        let _ = envelope.reply.try_send(Ok(envelope.payload));
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn test_dispatch_round_trip() {
        let (dispatcher, rx, table) = dispatcher(Duration::from_secs(5), None);
        let replica = echo_replica(rx, table.clone());

        let reply = dispatcher.dispatch(json!({"input": 4.0})).await.unwrap();
        assert_eq!(reply, json!({"input": 4.0}));
        assert!(table.is_empty());
        // The used pair went back to the pool.
        assert_eq!(dispatcher.pool().len(), 2);

        drop(dispatcher);
        replica.join().unwrap();
    }

    #[tokio::test]
    async fn test_timeout_removes_entry_once() {
        let (dispatcher, rx, table) = dispatcher(Duration::from_millis(20), None);

        let err = dispatcher.dispatch(json!({"input": 1.0})).await.unwrap_err();
        assert!(matches!(err, Error::RequestTimeout));
        assert!(table.is_empty());

        // A replica reaching the id afterwards finds nothing to do.
        let id = rx.get(Duration::from_millis(10)).unwrap().unwrap();
        assert!(table.take(&id).is_none());
        // The abandoned pair was not pooled.
        assert_eq!(dispatcher.pool().len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_and_cleans_up() {
        let (dispatcher, _rx, table) = dispatcher(Duration::from_secs(1), Some(1));
        let first = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch(json!(1)).await })
        };
        tokio::task::yield_now().await;
        while dispatcher.queued() == 0 {
            tokio::task::yield_now().await;
        }

        let err = dispatcher.dispatch(json!(2)).await.unwrap_err();
        assert!(matches!(err, Error::QueueFull));
        assert_eq!(table.len(), 1);

        first.abort();
        let _ = first.await;
        assert!(table.is_empty());
    }

    /// Answers every request with `count` chunks numbered from zero.
    fn counting_replica(rx: QueueReceiver, table: RequestTable, count: u64) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            while let Ok(next) = rx.get(Duration::from_millis(10)) {
                let Some(envelope) = next.and_then(|id| table.take(&id)) else {
                    continue;
                };
                for i in 0..count {
                    if envelope.reply.blocking_send(Ok(json!(i))).is_err() {
                        break;
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn test_dispatch_stream_yields_chunks_in_order() {
        let (dispatcher, rx, table) = dispatcher(Duration::from_secs(5), None);
        let dispatcher = Arc::new(Arc::into_inner(dispatcher).unwrap().with_streaming(true));
        let replica = counting_replica(rx, table.clone(), 40);

        let stream = dispatcher.dispatch_stream(json!({})).await.unwrap();
        let chunks = stream.collect().await.unwrap();
        assert_eq!(chunks, (0..40).map(|i| json!(i)).collect::<Vec<_>>());
        assert!(table.is_empty());

        drop(dispatcher);
        replica.join().unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_stream_empty_reply() {
        let (dispatcher, rx, table) = dispatcher(Duration::from_secs(5), None);
        let replica = counting_replica(rx, table, 0);

        let stream = dispatcher.dispatch_stream(json!({})).await.unwrap();
        assert!(stream.collect().await.unwrap().is_empty());

        drop(dispatcher);
        replica.join().unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_stream_times_out_before_first_chunk() {
        let (dispatcher, _rx, table) = dispatcher(Duration::from_millis(20), None);

        let err = dispatcher.dispatch_stream(json!({})).await.err().unwrap();
        assert!(matches!(err, Error::RequestTimeout));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_stream_returns_leading_error() {
        let (dispatcher, rx, table) = dispatcher(Duration::from_secs(5), None);
        let replica = std::thread::spawn(move || {
            let id = rx.get(Duration::from_secs(5)).unwrap().unwrap();
            let envelope = table.take(&id).unwrap();
            envelope.reply.blocking_send(Err(Error::Decode("bad".to_string()))).unwrap();
        });

        let err = dispatcher.dispatch_stream(json!({})).await.err().unwrap();
        assert!(matches!(err, Error::Decode(_)));
        replica.join().unwrap();
    }

    #[tokio::test]
    async fn test_streaming_dispatcher_refuses_single_reply() {
        let (dispatcher, _rx, table) = dispatcher(Duration::from_secs(5), None);
        let dispatcher = Arc::into_inner(dispatcher).unwrap().with_streaming(true);
        assert!(dispatcher.is_streaming());

        let err = dispatcher.dispatch(json!(1)).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(table.is_empty());
        assert_eq!(dispatcher.queued(), 0);
    }

    #[tokio::test]
    async fn test_dropped_dispatch_cleans_up() {
        let (dispatcher, _rx, table) = dispatcher(Duration::from_secs(30), None);
        let pending = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch(json!(1)).await })
        };
        while table.is_empty() {
            tokio::task::yield_now().await;
        }

        pending.abort();
        let _ = pending.await;
        assert!(table.is_empty());
    }
}
