//! ---
//! hamq_section: "02-messaging-ipc-data-model"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Message schema helpers, codecs and transport contracts."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use tracing::debug;

use crate::types::{CorrelationId, EndpointRole};

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Message sent out via an endpoint.
    Outbound,
    /// Message received from an endpoint.
    Inbound,
}

/// Emit a structured log entry for message activity on one endpoint.
pub fn log_message(
    direction: MessageDirection,
    endpoint: EndpointRole,
    correlation_id: &CorrelationId,
    body_len: usize,
) {
    debug!(
        correlation_id = %correlation_id,
        endpoint = endpoint.label(),
        body_len,
        direction = ?direction,
        "messaging activity"
    );
}
