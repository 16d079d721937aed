//! ---
//! hamq_section: "01-core-functionality"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Dual-endpoint consumption pipeline and dedup tracking."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use std::error::Error as StdError;
use std::fmt::Debug;

use async_trait::async_trait;
use hamq_msg::{CorrelationId, EndpointRole};
use tracing::info;

/// Failure reported by a business handler.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A handler failure forwarded to the pipeline owner.
#[derive(Debug)]
pub struct HandlerFailure {
    pub correlation_id: CorrelationId,
    pub endpoint: EndpointRole,
    pub error: HandlerError,
}

/// Business action invoked at most once per correlation id.
#[async_trait]
pub trait JobHandler<T>: Send + Sync {
    async fn handle(&self, record: T, source: EndpointRole) -> Result<(), HandlerError>;
}

/// Handler that only logs the record and the endpoint it came from.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingJobHandler;

#[async_trait]
impl<T> JobHandler<T> for LoggingJobHandler
where
    T: Debug + Send + 'static,
{
    async fn handle(&self, record: T, source: EndpointRole) -> Result<(), HandlerError> {
        info!(source = source.label(), record = ?record, "processing job");
        Ok(())
    }
}
