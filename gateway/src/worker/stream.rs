//! Streaming replies.
//!
//! A streaming replica answers each request with a sequence of chunks sent
//! through a bounded channel. Sending blocks while the buffer is full, and
//! fails once the caller has dropped its end, which ends production.

use std::marker::PhantomData;

use serde::Serialize;

use super::loops::{decode, guarded, SINGLE_POLL_TIMEOUT};
use crate::api::InferenceApi;
use crate::error::{ApiError, Error};
use crate::gateway::{Envelope, QueueClosed, QueueReceiver, ReplySender, RequestTable};

/// Producer side of one streamed reply.
pub struct StreamSink<R> {
    sender: ReplySender,
    sent: usize,
    _chunk: PhantomData<fn(R)>,
}

impl<R: Serialize> StreamSink<R> {
    pub(crate) fn new(sender: ReplySender) -> Self {
        Self {
            sender,
            sent: 0,
            _chunk: PhantomData,
        }
    }

    /// Send one chunk, blocking while the buffer is full.
    ///
    /// Returns `ApiError::StreamClosed` once the caller is gone.
    pub fn send(&mut self, chunk: R) -> Result<(), ApiError> {
        let value = serde_json::to_value(chunk).map_err(|e| ApiError::Encode(e.to_string()))?;
        self.sender
            .blocking_send(Ok(value))
            .map_err(|_| ApiError::StreamClosed)?;
        self.sent += 1;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Chunks delivered so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Terminate the stream with an error chunk.
    fn fail(&self, err: Error) {
        if self.sender.blocking_send(Err(err)).is_err() {
            tracing::debug!("caller no longer waiting, stream error dropped");
        }
    }
}

fn stream_one<A: InferenceApi>(
    api: &mut A,
    payload: serde_json::Value,
    sink: &mut StreamSink<A::Response>,
) -> Result<(), Error> {
    let input = decode(&*api, payload)?;
    api.predict_stream(input, sink)?;
    Ok(())
}

/// Serve one request at a time, streaming each reply.
///
/// The stream ends when the sink is dropped at the end of a request.
pub fn run_streaming_loop<A: InferenceApi>(
    api: &mut A,
    queue: &QueueReceiver,
    table: &RequestTable,
) {
    loop {
        let id = match queue.get(SINGLE_POLL_TIMEOUT) {
            Ok(Some(id)) => id,
            Ok(None) => continue,
            Err(QueueClosed) => return,
        };
        let Some(Envelope { payload, reply }) = table.take(&id) else {
            tracing::debug!(%id, "request already claimed or expired");
            continue;
        };

        let mut sink = StreamSink::new(reply);
        match guarded(|| stream_one(api, payload, &mut sink)) {
            Ok(()) => tracing::debug!(%id, chunks = sink.sent(), "stream finished"),
            Err(_) if sink.is_closed() => {
                tracing::debug!(%id, chunks = sink.sent(), "stream abandoned by caller")
            }
            Err(err) => {
                tracing::debug!(%id, chunks = sink.sent(), error = %err, "stream failed");
                sink.fail(err);
            }
        }
    }
}
