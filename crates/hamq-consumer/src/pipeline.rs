//! ---
//! hamq_section: "01-core-functionality"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Dual-endpoint consumption pipeline and dedup tracking."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
//! Intake loop bound to a single endpoint.
//!
//! Each delivery moves through decode, dedup check, handle-or-skip and
//! acknowledge. Malformed deliveries are dead-lettered (or acknowledged when
//! the transport has no dead-letter queue) and never reach the handler.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hamq_common::config::ConsumerConfig;
use hamq_metrics::ConsumerMetrics;
use hamq_msg::{
    log_message, CorrelationId, Delivery, EndpointRole, LockToken, MessageDirection,
    MessagingError, QueueClient, WireCodec,
};
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::dedup::DedupTracker;
use crate::handler::{HandlerFailure, JobHandler};

/// Terminal state of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// First sighting; the handler ran and succeeded.
    Handled,
    /// Already processed via either endpoint; handler not called.
    Skipped,
    /// Body or properties could not be decoded.
    Rejected,
    /// First sighting; the handler returned an error. The id stays marked.
    HandlerFailed,
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Handled => "handled",
            ProcessOutcome::Skipped => "skipped",
            ProcessOutcome::Rejected => "rejected",
            ProcessOutcome::HandlerFailed => "handler_failed",
        }
    }
}

/// Counters accumulated by a pipeline over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub received: u64,
    pub handled: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub handler_failed: u64,
    pub ack_failures: u64,
    pub receive_errors: u64,
}

impl PipelineReport {
    pub fn merge(&mut self, other: &PipelineReport) {
        self.received += other.received;
        self.handled += other.handled;
        self.skipped += other.skipped;
        self.rejected += other.rejected;
        self.handler_failed += other.handler_failed;
        self.ack_failures += other.ack_failures;
        self.receive_errors += other.receive_errors;
    }
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    handled: AtomicU64,
    skipped: AtomicU64,
    rejected: AtomicU64,
    handler_failed: AtomicU64,
    ack_failures: AtomicU64,
    receive_errors: AtomicU64,
}

impl Counters {
    fn outcome(&self, outcome: ProcessOutcome) -> &AtomicU64 {
        match outcome {
            ProcessOutcome::Handled => &self.handled,
            ProcessOutcome::Skipped => &self.skipped,
            ProcessOutcome::Rejected => &self.rejected,
            ProcessOutcome::HandlerFailed => &self.handler_failed,
        }
    }

    fn snapshot(&self) -> PipelineReport {
        PipelineReport {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            handler_failed: self.handler_failed.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}

/// Consumption pipeline for one endpoint, decoding deliveries into `T`.
pub struct ConsumerPipeline<T> {
    role: EndpointRole,
    client: Arc<dyn QueueClient>,
    codec: WireCodec,
    dedup: Arc<DedupTracker>,
    handler: Arc<dyn JobHandler<T>>,
    max_concurrent: usize,
    receive_backoff: Duration,
    metrics: Option<ConsumerMetrics>,
    failures: Option<mpsc::UnboundedSender<HandlerFailure>>,
    counters: Arc<Counters>,
}

impl<T> Clone for ConsumerPipeline<T> {
    fn clone(&self) -> Self {
        Self {
            role: self.role,
            client: self.client.clone(),
            codec: self.codec.clone(),
            dedup: self.dedup.clone(),
            handler: self.handler.clone(),
            max_concurrent: self.max_concurrent,
            receive_backoff: self.receive_backoff,
            metrics: self.metrics.clone(),
            failures: self.failures.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl<T> ConsumerPipeline<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new(
        role: EndpointRole,
        client: Arc<dyn QueueClient>,
        codec: WireCodec,
        dedup: Arc<DedupTracker>,
        handler: Arc<dyn JobHandler<T>>,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            role,
            client,
            codec,
            dedup,
            handler,
            max_concurrent: config.max_concurrent.max(1),
            receive_backoff: config.receive_backoff,
            metrics: None,
            failures: None,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_metrics(mut self, metrics: ConsumerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Forward handler failures to `sender` in addition to logging them.
    pub fn with_failure_channel(mut self, sender: mpsc::UnboundedSender<HandlerFailure>) -> Self {
        self.failures = Some(sender);
        self
    }

    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn report(&self) -> PipelineReport {
        self.counters.snapshot()
    }

    /// Pull deliveries until `shutdown` fires, its sender is dropped, or the
    /// client is closed.
    ///
    /// At most `max_concurrent` deliveries are in flight. On exit the loop
    /// waits for in-flight handlers, then closes the client.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> PipelineReport {
        let endpoint = self.role.label();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut in_flight = JoinSet::new();
        info!(endpoint, max_concurrent = self.max_concurrent, "consumer pipeline started");

        loop {
            // A slot is reserved before receiving so no more than
            // `max_concurrent` deliveries hold a lock at once.
            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                Some(joined) = in_flight.join_next() => {
                    log_join_error(endpoint, joined);
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                _ = shutdown.recv() => break,
                received = self.client.receive() => received,
            };

            match received {
                Ok(delivery) => {
                    let pipeline = self.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        pipeline.process_delivery(delivery).await;
                    });
                }
                Err(MessagingError::Closed(_)) => {
                    debug!(endpoint, "endpoint closed; stopping intake");
                    break;
                }
                Err(err) => {
                    drop(permit);
                    self.counters.receive_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        endpoint,
                        error = %err,
                        backoff_ms = self.receive_backoff.as_millis() as u64,
                        "receive failed; backing off"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(self.receive_backoff) => {}
                    }
                }
            }
        }

        debug!(endpoint, pending = in_flight.len(), "draining in-flight deliveries");
        while let Some(joined) = in_flight.join_next().await {
            log_join_error(endpoint, joined);
        }
        if let Err(err) = self.client.close().await {
            warn!(endpoint, error = %err, "failed to close endpoint client");
        }

        let report = self.report();
        info!(
            endpoint,
            received = report.received,
            handled = report.handled,
            skipped = report.skipped,
            rejected = report.rejected,
            handler_failed = report.handler_failed,
            "consumer pipeline stopped"
        );
        report
    }

    /// Take one delivery through decode, dedup, handle and settlement.
    pub async fn process_delivery(&self, delivery: Delivery) -> ProcessOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let decoded = delivery.properties.correlation_id().and_then(|id| {
            self.codec
                .decode_record::<T>(&delivery.body)
                .map(|record| (id, record))
        });
        let (correlation_id, record) = match decoded {
            Ok(decoded) => decoded,
            Err(err) => {
                let reason = err.to_string();
                warn!(
                    endpoint = self.role.label(),
                    sequence_number = delivery.sequence_number,
                    error = %reason,
                    "rejecting malformed delivery"
                );
                self.reject(&delivery.lock_token, &reason).await;
                return self.finish(ProcessOutcome::Rejected);
            }
        };
        log_message(
            MessageDirection::Inbound,
            self.role,
            &correlation_id,
            delivery.body.len(),
        );

        let outcome = if self.dedup.check_and_mark(correlation_id) {
            debug!(
                endpoint = self.role.label(),
                correlation_id = %correlation_id,
                delivery_count = delivery.delivery_count,
                "duplicate delivery; skipping handler"
            );
            ProcessOutcome::Skipped
        } else {
            if let Some(metrics) = &self.metrics {
                metrics.inc_dedup_entries();
            }
            match self.handler.handle(record, self.role).await {
                Ok(()) => ProcessOutcome::Handled,
                Err(error) => {
                    error!(
                        endpoint = self.role.label(),
                        correlation_id = %correlation_id,
                        error = %error,
                        "job handler failed"
                    );
                    if let Some(failures) = &self.failures {
                        let _ = failures.send(HandlerFailure {
                            correlation_id,
                            endpoint: self.role,
                            error,
                        });
                    }
                    ProcessOutcome::HandlerFailed
                }
            }
        };

        self.acknowledge(&delivery.lock_token, Some(correlation_id))
            .await;
        self.finish(outcome)
    }

    async fn reject(&self, token: &LockToken, reason: &str) {
        match self.client.dead_letter(token, reason).await {
            Ok(true) => {}
            Ok(false) => self.acknowledge(token, None).await,
            Err(err) => self.record_settle_failure(None, &err),
        }
    }

    async fn acknowledge(&self, token: &LockToken, correlation_id: Option<CorrelationId>) {
        if let Err(err) = self.client.acknowledge(token).await {
            self.record_settle_failure(correlation_id, &err);
        }
    }

    fn record_settle_failure(&self, correlation_id: Option<CorrelationId>, err: &MessagingError) {
        self.counters.ack_failures.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_ack_failure(self.role.label());
        }
        match correlation_id {
            Some(id) => warn!(
                endpoint = self.role.label(),
                correlation_id = %id,
                error = %err,
                "failed to settle delivery; transport will redeliver"
            ),
            None => warn!(
                endpoint = self.role.label(),
                error = %err,
                "failed to settle delivery; transport will redeliver"
            ),
        }
    }

    fn finish(&self, outcome: ProcessOutcome) -> ProcessOutcome {
        self.counters.outcome(outcome).fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_delivery(self.role.label(), outcome.label());
        }
        outcome
    }
}

fn log_join_error(endpoint: &str, joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        error!(endpoint, error = %err, "delivery task failed");
    }
}
