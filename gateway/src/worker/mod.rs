//! Worker replicas.
//!
//! A replica is a dedicated OS thread bound to one device slot. It owns one
//! instance of the served API for its whole lifetime and drains the shared
//! request queue until the gateway closes it.

mod device;
pub mod loops;
mod stream;

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::api::InferenceApi;
use crate::gateway::{QueueReceiver, RequestTable};

pub use device::{
    assign_replicas, device_identifiers, resolve_devices, Accelerator, Device, DeviceSpec,
    Devices, ReplicaSlot,
};
pub use loops::{run_batched_loop, run_single_loop};
pub use stream::{run_streaming_loop, StreamSink};

/// Loop selection and batch window for a replica.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub max_batch_size: usize,
    pub batch_timeout: Duration,
    /// Answer with [`InferenceApi::predict_stream`]. Takes precedence over batching.
    pub stream: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 1,
            batch_timeout: Duration::from_millis(10),
            stream: false,
        }
    }
}

pub struct ReplicaHandle {
    slot: ReplicaSlot,
    thread: JoinHandle<()>,
}

impl ReplicaHandle {
    pub fn slot(&self) -> &ReplicaSlot {
        &self.slot
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the replica to exit. It exits once the queue is closed.
    pub fn join(self) -> thread::Result<()> {
        self.thread.join()
    }
}

/// Start a replica thread.
pub fn spawn_replica<A: InferenceApi>(
    api: A,
    slot: ReplicaSlot,
    queue: QueueReceiver,
    table: RequestTable,
    settings: WorkerSettings,
) -> io::Result<ReplicaHandle> {
    let thread_slot = slot.clone();
    let thread = thread::Builder::new()
        .name(format!("replica-{}", slot.worker_id))
        .spawn(move || run_replica(api, &thread_slot, &queue, &table, settings))?;

    Ok(ReplicaHandle { slot, thread })
}

/// Set up the API on the slot's device, then serve until the queue closes.
pub fn run_replica<A: InferenceApi>(
    mut api: A,
    slot: &ReplicaSlot,
    queue: &QueueReceiver,
    table: &RequestTable,
    settings: WorkerSettings,
) {
    let _span = tracing::info_span!(
        "replica",
        worker_id = slot.worker_id,
        device = %slot.device
    )
    .entered();

    if let Err(e) = api.setup(&slot.device) {
        tracing::error!("Replica setup failed, not serving: {}", e);
        return;
    }

    if settings.stream {
        if settings.max_batch_size > 1 {
            tracing::warn!("Batching is not applied to streamed replies");
        }
        tracing::info!("Replica ready (streaming)");
        run_streaming_loop(&mut api, queue, table);
    } else if settings.max_batch_size > 1 {
        tracing::info!(
            max_batch_size = settings.max_batch_size,
            batch_timeout_ms = settings.batch_timeout.as_millis() as u64,
            "Replica ready (batched)"
        );
        run_batched_loop(
            &mut api,
            queue,
            table,
            settings.max_batch_size,
            settings.batch_timeout,
        );
    } else {
        tracing::info!("Replica ready");
        run_single_loop(&mut api, queue, table);
    }

    tracing::info!("Replica stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::{CountApi, SquareApi};
    use crate::error::ApiError;
    use crate::gateway::{request_queue, RequestId};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn cpu_slot() -> ReplicaSlot {
        ReplicaSlot {
            worker_id: 0,
            device: Device::new(vec!["cpu".to_string()]),
        }
    }

    #[test]
    fn test_replica_serves_until_queue_closes() {
        let table = RequestTable::new();
        let (tx, rx) = request_queue(None);
        let replica = spawn_replica(
            SquareApi::default(),
            cpu_slot(),
            rx,
            table.clone(),
            WorkerSettings::default(),
        )
        .unwrap();
        assert_eq!(replica.slot().worker_id, 0);

        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        let id = RequestId::new();
        table.insert(id, json!({"input": 3.0}), reply_tx);
        tx.put(id).unwrap();

        let reply = reply_rx.blocking_recv().unwrap().unwrap();
        assert_eq!(reply, json!({"output": 9.0}));

        drop(tx);
        replica.join().unwrap();
    }

    #[test]
    fn test_streaming_replica() {
        let table = RequestTable::new();
        let (tx, rx) = request_queue(None);
        let settings = WorkerSettings {
            stream: true,
            ..WorkerSettings::default()
        };
        let replica = spawn_replica(CountApi, cpu_slot(), rx, table.clone(), settings).unwrap();

        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        let id = RequestId::new();
        table.insert(id, json!({"input": 2}), reply_tx);
        tx.put(id).unwrap();

        assert_eq!(reply_rx.blocking_recv().unwrap().unwrap(), json!({"output": 1}));
        assert_eq!(reply_rx.blocking_recv().unwrap().unwrap(), json!({"output": 2}));
        assert!(reply_rx.blocking_recv().is_none());

        drop(tx);
        replica.join().unwrap();
    }

    #[derive(Clone)]
    struct NoDevice;

    impl InferenceApi for NoDevice {
        type Request = serde_json::Value;
        type Response = serde_json::Value;
        type Input = ();
        type Output = ();
        type Batch = ();
        type BatchOutput = ();

        fn setup(&mut self, device: &Device) -> Result<(), ApiError> {
            Err(ApiError::Predict(format!("{} unavailable", device)))
        }

        fn decode_request(&self, _request: serde_json::Value) -> Result<(), ApiError> {
            Ok(())
        }

        fn predict(&mut self, _input: ()) -> Result<(), ApiError> {
            Ok(())
        }

        fn encode_response(&self, _output: ()) -> Result<serde_json::Value, ApiError> {
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn test_failed_setup_stops_replica() {
        let (_tx, rx) = request_queue(None);
        let replica = spawn_replica(
            NoDevice,
            cpu_slot(),
            rx,
            RequestTable::new(),
            WorkerSettings::default(),
        )
        .unwrap();
        // Exits even though the queue is still open.
        while !replica.is_finished() {
            thread::sleep(Duration::from_millis(5));
        }
        replica.join().unwrap();
    }
}
