//! ---
//! hamq_section: "01-core-functionality"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Dual-endpoint consumption pipeline and dedup tracking."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use std::sync::Arc;

use hamq_common::config::{ConsumerConfig, EndpointsConfig};
use hamq_metrics::ConsumerMetrics;
use hamq_msg::{EndpointRole, QueueClient, QueueConnector, WireCodec};
use hamq_redundancy::DualEndpoints;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::dedup::DedupTracker;
use crate::handler::{HandlerFailure, JobHandler};
use crate::pipeline::{ConsumerPipeline, PipelineReport};
use crate::{PipelineError, Result};

/// Builder for the pair of pipelines sharing one dedup tracker.
pub struct ConsumerGroup<T> {
    handler: Arc<dyn JobHandler<T>>,
    codec: WireCodec,
    config: ConsumerConfig,
    dedup: Arc<DedupTracker>,
    metrics: Option<ConsumerMetrics>,
    failures: Option<mpsc::UnboundedSender<HandlerFailure>>,
}

impl<T> ConsumerGroup<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new(handler: Arc<dyn JobHandler<T>>, codec: WireCodec, config: ConsumerConfig) -> Self {
        Self {
            handler,
            codec,
            config,
            dedup: Arc::new(DedupTracker::new()),
            metrics: None,
            failures: None,
        }
    }

    /// Share an existing tracker instead of creating a fresh one.
    pub fn with_dedup(mut self, dedup: Arc<DedupTracker>) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_metrics(mut self, metrics: ConsumerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_failure_channel(mut self, sender: mpsc::UnboundedSender<HandlerFailure>) -> Self {
        self.failures = Some(sender);
        self
    }

    /// Connect consumer clients to both endpoints and start a pipeline on
    /// each one that connected.
    pub async fn start(
        self,
        connector: &dyn QueueConnector,
        endpoints: &EndpointsConfig,
    ) -> Result<ConsumerHandle> {
        let connected = DualEndpoints::connect(connector, endpoints)
            .await
            .map_err(|_| PipelineError::AllEndpointsUnavailable)?;
        let clients = connected
            .iter()
            .filter(|endpoint| endpoint.is_available())
            .filter_map(|endpoint| endpoint.client().map(|client| (endpoint.role(), client.clone())))
            .collect();
        self.start_with_clients(clients)
    }

    /// Start one pipeline per supplied client.
    pub fn start_with_clients(
        self,
        clients: Vec<(EndpointRole, Arc<dyn QueueClient>)>,
    ) -> Result<ConsumerHandle> {
        if clients.is_empty() {
            return Err(PipelineError::AllEndpointsUnavailable);
        }
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let mut pipelines = Vec::with_capacity(clients.len());
        for (role, client) in clients {
            let mut pipeline = ConsumerPipeline::new(
                role,
                client,
                self.codec.clone(),
                self.dedup.clone(),
                self.handler.clone(),
                &self.config,
            );
            if let Some(metrics) = &self.metrics {
                pipeline = pipeline.with_metrics(metrics.clone());
            }
            if let Some(failures) = &self.failures {
                pipeline = pipeline.with_failure_channel(failures.clone());
            }
            let task = tokio::spawn(pipeline.run(shutdown_rx.resubscribe()));
            pipelines.push((role, task));
        }
        info!(
            pipelines = pipelines.len(),
            max_concurrent = self.config.max_concurrent,
            "consumer group started"
        );
        Ok(ConsumerHandle {
            shutdown: shutdown_tx,
            pipelines,
            dedup: self.dedup,
        })
    }
}

/// Running pipelines. Dropping the handle closes the shutdown channel, which
/// stops every pipeline as [`ConsumerHandle::shutdown`] does but discards the
/// reports.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: broadcast::Sender<()>,
    pipelines: Vec<(EndpointRole, JoinHandle<PipelineReport>)>,
    dedup: Arc<DedupTracker>,
}

impl ConsumerHandle {
    pub fn dedup(&self) -> &Arc<DedupTracker> {
        &self.dedup
    }

    pub fn endpoints(&self) -> Vec<EndpointRole> {
        self.pipelines.iter().map(|(role, _)| *role).collect()
    }

    /// Signal shutdown and wait for every pipeline to drain and close.
    ///
    /// All pipelines are joined even when one of them panicked; the first
    /// join error is returned after the rest have stopped.
    pub async fn shutdown(self) -> Result<GroupReport> {
        let _ = self.shutdown.send(());
        let mut report = GroupReport::default();
        let mut first_error = None;
        for (endpoint, task) in self.pipelines {
            match task.await {
                Ok(pipeline) => report.pipelines.push((endpoint, pipeline)),
                Err(source) => {
                    error!(endpoint = endpoint.label(), error = %source, "pipeline task join error");
                    first_error.get_or_insert(PipelineError::Join { endpoint, source });
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        info!("consumer group shutdown complete");
        Ok(report)
    }
}

/// Per-endpoint reports collected at shutdown.
#[derive(Debug, Default, Clone)]
pub struct GroupReport {
    pub pipelines: Vec<(EndpointRole, PipelineReport)>,
}

impl GroupReport {
    pub fn endpoint(&self, role: EndpointRole) -> Option<&PipelineReport> {
        self.pipelines
            .iter()
            .find(|(endpoint, _)| *endpoint == role)
            .map(|(_, report)| report)
    }

    pub fn total(&self) -> PipelineReport {
        let mut total = PipelineReport::default();
        for (_, report) in &self.pipelines {
            total.merge(report);
        }
        total
    }
}
