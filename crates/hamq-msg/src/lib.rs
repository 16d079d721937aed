//! ---
//! hamq_section: "02-messaging-ipc-data-model"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Message schema helpers, codecs and transport contracts."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
#![warn(missing_docs)]

pub mod codec;
pub mod logging;
pub mod memory;
pub mod transport;
pub mod types;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors raised by codecs and queue transports.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// The endpoint could not be reached or refused the connection.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect {
        /// Endpoint description (credentials stripped).
        endpoint: String,
        /// Transport supplied reason.
        reason: String,
    },
    /// The endpoint rejected or failed an individual send.
    #[error("send to {endpoint} failed: {reason}")]
    Send {
        /// Endpoint description (credentials stripped).
        endpoint: String,
        /// Transport supplied reason.
        reason: String,
    },
    /// Receiving from the endpoint failed.
    #[error("receive from {endpoint} failed: {reason}")]
    Receive {
        /// Endpoint description (credentials stripped).
        endpoint: String,
        /// Transport supplied reason.
        reason: String,
    },
    /// Settling (acknowledging or dead-lettering) a delivery failed.
    #[error("settling delivery on {endpoint} failed: {reason}")]
    Settle {
        /// Endpoint description (credentials stripped).
        endpoint: String,
        /// Transport supplied reason.
        reason: String,
    },
    /// Operation attempted on a client that has been closed.
    #[error("endpoint {0} is closed")]
    Closed(String),
    /// Decompression of a message body failed.
    #[error("decode error: {0}")]
    Decode(#[source] std::io::Error),
    /// Compression of a message body failed.
    #[error("encode error: {0}")]
    Encode(#[source] std::io::Error),
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for CBOR serialization or deserialization problems.
    #[error("cbor serialization error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    /// A required message property was absent.
    #[error("message property '{0}' is missing")]
    MissingProperty(&'static str),
    /// The correlation id property could not be parsed.
    #[error("invalid correlation id '{0}'")]
    InvalidCorrelationId(String),
}

pub use codec::{Codec, GzipCodec, IdentityCodec, PayloadFormat, WireCodec};
pub use logging::{log_message, MessageDirection};
pub use memory::{DeadLetter, InMemoryBroker, MemoryConnector};
pub use transport::{QueueClient, QueueConnector};
pub use types::{
    CorrelationId, Delivery, EndpointRole, JobInformation, LockToken, MessageProperties, Order,
    OrderDetail, OrderStatus, OutboundMessage, CORRELATION_ID_PROPERTY,
};
