//! ---
//! hamq_section: "07-resilience-fault-tolerance"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Endpoint health tracking and dual-endpoint dispatch."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use hamq_common::config::DeliveryMode;
use hamq_metrics::DispatchMetrics;
use hamq_msg::{
    log_message, CorrelationId, EndpointRole, MessageDirection, OutboundMessage, WireCodec,
};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::endpoint::DualEndpoints;
use crate::{DispatchError, Result};

/// What happened on one endpoint for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAttempt {
    /// The endpoint accepted the message.
    Accepted,
    /// The send failed and the endpoint was marked unavailable.
    Failed,
    /// Not attempted: the mode did not require it or the endpoint was already down.
    Skipped,
}

/// Per-endpoint result of dispatching a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub correlation_id: CorrelationId,
    pub primary: SendAttempt,
    pub secondary: SendAttempt,
}

impl DispatchOutcome {
    pub fn attempt(&self, role: EndpointRole) -> SendAttempt {
        match role {
            EndpointRole::Primary => self.primary,
            EndpointRole::Secondary => self.secondary,
        }
    }

    /// At least one endpoint holds the message.
    pub fn delivered(&self) -> bool {
        self.primary == SendAttempt::Accepted || self.secondary == SendAttempt::Accepted
    }

    pub fn accepted_by(&self) -> impl Iterator<Item = EndpointRole> + '_ {
        EndpointRole::ALL
            .into_iter()
            .filter(move |role| self.attempt(*role) == SendAttempt::Accepted)
    }
}

/// Summary of a concurrently dispatched batch.
#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    pub outcomes: Vec<DispatchOutcome>,
    /// Jobs whose payload could not be encoded.
    pub rejected: Vec<CorrelationId>,
}

impl BatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.len()
    }

    /// Jobs that reached both endpoints.
    pub fn duplicated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.accepted_by().count() == 2)
            .count()
    }
}

/// Sends jobs to the endpoint pair according to the delivery mode.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    endpoints: Arc<DualEndpoints>,
    mode: DeliveryMode,
    codec: WireCodec,
    metrics: Option<DispatchMetrics>,
}

impl Dispatcher {
    pub fn new(endpoints: Arc<DualEndpoints>, mode: DeliveryMode, codec: WireCodec) -> Self {
        Self {
            endpoints,
            mode,
            codec,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: DispatchMetrics) -> Self {
        for endpoint in self.endpoints.iter() {
            metrics.set_available(endpoint.role().label(), endpoint.is_available());
        }
        self.metrics = Some(metrics);
        self
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn endpoints(&self) -> &Arc<DualEndpoints> {
        &self.endpoints
    }

    /// Dispatch one job.
    ///
    /// Endpoint failures are recorded against endpoint health and never
    /// returned; the call only fails when no endpoint accepted the message.
    pub async fn send<T>(&self, correlation_id: CorrelationId, job: &T) -> Result<DispatchOutcome>
    where
        T: Serialize + Sync,
    {
        let body = self
            .codec
            .encode_record(job)
            .map_err(|source| DispatchError::Encode {
                correlation_id,
                source,
            })?;

        if self.endpoints.all_unavailable() {
            error!(correlation_id = %correlation_id, "no endpoint available; refusing job");
            self.record_job("unavailable");
            return Err(DispatchError::AllEndpointsUnavailable);
        }

        let message = OutboundMessage::new(body, correlation_id);
        let primary = self
            .attempt(EndpointRole::Primary, correlation_id, &message)
            .await;

        let secondary_required =
            self.mode.mirrors_to_secondary() || !self.endpoints.primary().is_available();
        let secondary = if secondary_required {
            self.attempt(EndpointRole::Secondary, correlation_id, &message)
                .await
        } else {
            SendAttempt::Skipped
        };

        let outcome = DispatchOutcome {
            correlation_id,
            primary,
            secondary,
        };
        if !outcome.delivered() {
            error!(
                correlation_id = %correlation_id,
                mode = %self.mode,
                "job was not accepted by any endpoint"
            );
            self.record_job("undelivered");
            return Err(DispatchError::AllEndpointsUnavailable);
        }
        self.record_job("delivered");
        Ok(outcome)
    }

    /// Dispatch every job concurrently and wait for all of them.
    ///
    /// Encoding failures are collected in the report. The whole batch reports
    /// [`DispatchError::AllEndpointsUnavailable`] if any job could not be
    /// delivered anywhere, or if both endpoints are unavailable once every
    /// job has finished.
    pub async fn send_batch<T>(&self, jobs: &[(CorrelationId, T)]) -> Result<BatchReport>
    where
        T: Serialize + Sync,
    {
        let results = join_all(jobs.iter().map(|(id, job)| self.send(*id, job))).await;

        let mut report = BatchReport::default();
        let mut undelivered = 0usize;
        for result in results {
            match result {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(DispatchError::Encode {
                    correlation_id,
                    source,
                }) => {
                    warn!(correlation_id = %correlation_id, error = %source, "job rejected before dispatch");
                    report.rejected.push(correlation_id);
                }
                Err(DispatchError::AllEndpointsUnavailable) => undelivered += 1,
            }
        }
        if undelivered > 0 {
            error!(
                undelivered,
                delivered = report.delivered(),
                "batch aborted: all endpoints unavailable"
            );
            return Err(DispatchError::AllEndpointsUnavailable);
        }
        if self.endpoints.all_unavailable() {
            error!(
                delivered = report.delivered(),
                "batch delivered but no endpoint remains available"
            );
            return Err(DispatchError::AllEndpointsUnavailable);
        }
        debug!(
            delivered = report.delivered(),
            duplicated = report.duplicated(),
            rejected = report.rejected.len(),
            "batch dispatched"
        );
        Ok(report)
    }

    async fn attempt(
        &self,
        role: EndpointRole,
        correlation_id: CorrelationId,
        message: &OutboundMessage,
    ) -> SendAttempt {
        let endpoint = self.endpoints.get(role);
        let client = match endpoint.client() {
            Some(client) if endpoint.is_available() => client,
            _ => {
                debug!(
                    endpoint = role.label(),
                    correlation_id = %correlation_id,
                    "endpoint unavailable; skipping"
                );
                return SendAttempt::Skipped;
            }
        };

        let started = Instant::now();
        let result = client.send(message.clone()).await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_send(role.label(), result.is_ok(), started.elapsed());
        }

        match result {
            Ok(()) => {
                log_message(
                    MessageDirection::Outbound,
                    role,
                    &correlation_id,
                    message.body.len(),
                );
                SendAttempt::Accepted
            }
            Err(err) => {
                if endpoint.mark_unavailable() {
                    warn!(
                        endpoint = role.label(),
                        target = %endpoint.target(),
                        correlation_id = %correlation_id,
                        error = %err,
                        "send failed; endpoint marked unavailable"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.set_available(role.label(), false);
                    }
                } else {
                    debug!(
                        endpoint = role.label(),
                        correlation_id = %correlation_id,
                        error = %err,
                        "send failed on endpoint already marked unavailable"
                    );
                }
                SendAttempt::Failed
            }
        }
    }

    fn record_job(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_job(outcome);
        }
    }
}
