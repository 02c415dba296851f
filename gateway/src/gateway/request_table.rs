//! Table of in-flight requests keyed by identifier.

use std::sync::Arc;

use dashmap::DashMap;

use super::{ReplySender, RequestId};

/// Payload and reply sender stored while a request is in flight.
#[derive(Debug)]
pub struct Envelope {
    pub payload: serde_json::Value,
    pub reply: ReplySender,
}

/// Concurrent map shared by the dispatcher and every replica.
///
/// `take` is the only way out of the table, so a replica consuming an entry
/// and the dispatcher cleaning it up can race freely: exactly one of them gets
/// the envelope.
#[derive(Debug, Clone, Default)]
pub struct RequestTable {
    entries: Arc<DashMap<RequestId, Envelope>>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: RequestId, payload: serde_json::Value, reply: ReplySender) {
        if self.entries.insert(id, Envelope { payload, reply }).is_some() {
            tracing::warn!(%id, "replaced a live envelope with the same identifier");
        }
    }

    /// Atomically look up and remove an entry.
    pub fn take(&self, id: &RequestId) -> Option<Envelope> {
        self.entries.remove(id).map(|(_, envelope)| envelope)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
