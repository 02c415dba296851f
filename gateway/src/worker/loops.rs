//! Replica processing loops.
//!
//! Both loops block on the request queue and return once it is closed. A
//! failing or panicking stage answers only the requests it was processing;
//! the loop itself keeps running.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crate::api::InferenceApi;
use crate::error::Error;
use crate::gateway::{
    Envelope, QueueClosed, QueueReceiver, Reply, ReplySender, RequestId, RequestTable,
};

/// How long the single-request loop waits on an empty queue before retrying.
pub const SINGLE_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Run `f`, turning a panic into `Error::WorkerPanicked`.
pub(super) fn guarded<T>(f: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(panic = %message, "inference stage panicked");
            Err(Error::WorkerPanicked)
        }
    }
}

/// Send a reply, ignoring callers that stopped waiting.
fn deliver(reply: &ReplySender, id: RequestId, result: Reply) {
    if reply.try_send(result).is_err() {
        tracing::debug!(%id, "caller no longer waiting, reply dropped");
    }
}

pub(super) fn decode<A: InferenceApi>(api: &A, payload: serde_json::Value) -> Result<A::Input, Error> {
    let request: A::Request =
        serde_json::from_value(payload).map_err(|e| Error::Decode(e.to_string()))?;
    Ok(api.decode_request(request)?)
}

fn encode<A: InferenceApi>(api: &A, output: A::Output) -> Reply {
    let response = api.encode_response(output)?;
    serde_json::to_value(response).map_err(|e| Error::Inference(format!("encode: {}", e)))
}

fn process_one<A: InferenceApi>(api: &mut A, payload: serde_json::Value) -> Reply {
    let input = decode(&*api, payload)?;
    let output = api.predict(input)?;
    encode(&*api, output)
}

/// Run batch → predict → unbatch and encode every output.
///
/// An error here fails every request of the batch. Encoding failures only
/// affect their own request.
fn process_batch<A: InferenceApi>(
    api: &mut A,
    inputs: Vec<A::Input>,
) -> Result<Vec<Reply>, Error> {
    let expected = inputs.len();
    let batch = api.batch(inputs)?;
    let output = api.predict_batch(batch)?;
    let outputs = api.unbatch(output)?;
    if outputs.len() != expected {
        return Err(Error::Inference(format!(
            "unbatch returned {} outputs for {} inputs",
            outputs.len(),
            expected
        )));
    }
    Ok(outputs.into_iter().map(|output| encode(&*api, output)).collect())
}

/// Serve one request at a time.
pub fn run_single_loop<A: InferenceApi>(api: &mut A, queue: &QueueReceiver, table: &RequestTable) {
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

        let result = guarded(|| process_one(api, payload));
        deliver(&reply, id, result);
    }
}

/// Collect up to `max_batch_size` requests, waiting at most `batch_timeout`
/// for each, and serve them with one batched predict call.
pub fn run_batched_loop<A: InferenceApi>(
    api: &mut A,
    queue: &QueueReceiver,
    table: &RequestTable,
    max_batch_size: usize,
    batch_timeout: Duration,
) {
    loop {
        let mut inputs = Vec::with_capacity(max_batch_size);
        let mut replies = Vec::with_capacity(max_batch_size);
        let mut closed = false;

        for _ in 0..max_batch_size {
            let id = match queue.get(batch_timeout) {
                Ok(Some(id)) => id,
                Ok(None) => break,
                Err(QueueClosed) => {
                    closed = true;
                    break;
                }
            };
            let Some(Envelope { payload, reply }) = table.take(&id) else {
                tracing::debug!(%id, "request already claimed or expired");
                continue;
            };

            match guarded(|| decode(&*api, payload)) {
                Ok(input) => {
                    inputs.push(input);
                    replies.push((id, reply));
                }
                Err(err) => deliver(&reply, id, Err(err)),
            }
        }

        if !inputs.is_empty() {
            tracing::debug!(batch_size = inputs.len(), "running batched predict");
            match guarded(|| process_batch(api, inputs)) {
                Ok(results) => {
                    for ((id, reply), result) in replies.iter().zip(results) {
                        deliver(reply, *id, result);
                    }
                }
                Err(err) => {
                    for (id, reply) in &replies {
                        deliver(reply, *id, Err(err.clone()));
                    }
                }
            }
        }

        if closed {
            return;
        }
    }
}
