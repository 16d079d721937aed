//! ---
//! hamq_section: "07-resilience-fault-tolerance"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Endpoint health tracking and dual-endpoint dispatch."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
//! Health tracking and fan-out for a primary/secondary pair of queue endpoints.
//!
//! Availability only ever moves from available to unavailable within a run;
//! there is no reconnect loop. Once both endpoints are down, dispatch fails
//! with [`DispatchError::AllEndpointsUnavailable`] and the owning process is
//! expected to exit with [`EXIT_ALL_ENDPOINTS_UNAVAILABLE`].

mod dispatcher;
mod endpoint;

use hamq_msg::{CorrelationId, MessagingError};

pub use dispatcher::{BatchReport, DispatchOutcome, Dispatcher, SendAttempt};
pub use endpoint::{DualEndpoints, EndpointHandle};

/// Process exit status used when no endpoint can accept work.
pub const EXIT_ALL_ENDPOINTS_UNAVAILABLE: i32 = 3;

pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Neither endpoint can accept messages. Fatal for the process.
    #[error("all endpoints are unavailable")]
    AllEndpointsUnavailable,
    /// The job could not be serialized or compressed; no send was attempted.
    #[error("failed to encode job {correlation_id}: {source}")]
    Encode {
        correlation_id: CorrelationId,
        #[source]
        source: MessagingError,
    },
}

impl DispatchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::AllEndpointsUnavailable)
    }

    /// Exit status a binary should terminate with for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            DispatchError::AllEndpointsUnavailable => EXIT_ALL_ENDPOINTS_UNAVAILABLE,
            DispatchError::Encode { .. } => 1,
        }
    }
}
