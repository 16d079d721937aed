//! ---
//! hamq_section: "01-core-functionality"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Dual-endpoint consumption pipeline and dedup tracking."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
//! Consumption side: one intake pipeline per endpoint, united by a shared
//! [`DedupTracker`] so a job arriving on both endpoints is handled once.

pub mod dedup;
pub mod group;
pub mod handler;
pub mod pipeline;

use hamq_msg::EndpointRole;
use hamq_redundancy::EXIT_ALL_ENDPOINTS_UNAVAILABLE;

pub use dedup::DedupTracker;
pub use group::{ConsumerGroup, ConsumerHandle, GroupReport};
pub use handler::{HandlerError, HandlerFailure, JobHandler, LoggingJobHandler};
pub use pipeline::{ConsumerPipeline, PipelineReport, ProcessOutcome};

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no consumer endpoint could be connected")]
    AllEndpointsUnavailable,
    #[error("{endpoint} pipeline task failed: {source}")]
    Join {
        endpoint: EndpointRole,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::AllEndpointsUnavailable => EXIT_ALL_ENDPOINTS_UNAVAILABLE,
            PipelineError::Join { .. } => 1,
        }
    }
}
