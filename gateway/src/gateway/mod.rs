//! Request routing between HTTP handlers and worker replicas.
//!
//! This module provides:
//! - A pool of reusable reply channels
//! - The request table correlating identifiers with payloads and reply senders
//! - The MPMC request queue carrying identifiers to replicas
//! - The dispatcher that ties them together for one request
//! - The fan-out aggregator for multi-completion chat requests

mod channel_pool;
pub mod dispatcher;
pub mod fanout;
mod request_queue;
mod request_table;

use std::fmt;

use uuid::Uuid;

pub use channel_pool::{ChannelPool, Reply, ReplyReceiver, ReplySender};
pub use dispatcher::{Dispatcher, ReplyStream, STREAM_BUFFER};
pub use request_queue::{request_queue, QueueClosed, QueueReceiver, QueueSender};
pub use request_table::{Envelope, RequestTable};

/// Opaque identifier minted once per dispatched unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
