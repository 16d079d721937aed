//! ---
//! hamq_section: "02-messaging-ipc-data-model"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Message schema helpers, codecs and transport contracts."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use hamq_common::config::EndpointConfig;

use crate::types::{Delivery, LockToken, OutboundMessage};
use crate::Result;

/// Opens clients against a queue endpoint.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    /// Establish a client for `endpoint`; failures map to [`crate::MessagingError::Connect`].
    async fn connect(&self, endpoint: &EndpointConfig) -> Result<Arc<dyn QueueClient>>;
}

/// Client bound to a single queue on a single endpoint.
///
/// Deliveries are peek-locked: a received message stays on the queue until it
/// is acknowledged or dead-lettered with its [`LockToken`].
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Human-readable endpoint name for logging.
    fn name(&self) -> &str;

    /// Send a message to the queue.
    async fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Wait for the next delivery.
    ///
    /// Must be cancel-safe: dropping the future before it resolves must not
    /// lose a message. Returns [`crate::MessagingError::Closed`] once the
    /// client has been closed.
    async fn receive(&self) -> Result<Delivery>;

    /// Complete a delivery, removing it from the queue.
    async fn acknowledge(&self, token: &LockToken) -> Result<()>;

    /// Move a delivery to the dead-letter queue.
    ///
    /// Returns `Ok(false)` when the transport has no dead-letter support, in
    /// which case the caller should acknowledge instead.
    async fn dead_letter(&self, _token: &LockToken, _reason: &str) -> Result<bool> {
        Ok(false)
    }

    /// Close the client. Further operations fail with `Closed`.
    async fn close(&self) -> Result<()>;
}
