//! ---
//! hamq_section: "07-resilience-fault-tolerance"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Endpoint health tracking and dual-endpoint dispatch."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hamq_common::config::{DeliveryMode, EndpointConfig, EndpointsConfig};
use hamq_msg::{
    CorrelationId, Delivery, EndpointRole, InMemoryBroker, JobInformation, LockToken,
    MemoryConnector, MessagingError, OutboundMessage, QueueClient, WireCodec,
};
use hamq_redundancy::{
    DispatchError, Dispatcher, DualEndpoints, EndpointHandle, SendAttempt,
    EXIT_ALL_ENDPOINTS_UNAVAILABLE,
};
use parking_lot::Mutex;

const QUEUE: &str = "job-queue";

fn endpoints_config() -> EndpointsConfig {
    EndpointsConfig {
        primary: EndpointConfig::new("memory://west", QUEUE),
        secondary: EndpointConfig::new("memory://east", QUEUE),
    }
}

async fn dispatcher(broker: &Arc<InMemoryBroker>, mode: DeliveryMode) -> Dispatcher {
    let connector = MemoryConnector::new(broker.clone());
    let endpoints = DualEndpoints::connect(&connector, &endpoints_config())
        .await
        .expect("at least one endpoint connects");
    Dispatcher::new(Arc::new(endpoints), mode, WireCodec::default())
}

fn job() -> (CorrelationId, JobInformation) {
    let id = CorrelationId::new();
    (id, JobInformation::new(id))
}

#[tokio::test]
async fn active_passive_does_not_touch_secondary_while_primary_accepts() {
    let broker = InMemoryBroker::new();
    let dispatcher = dispatcher(&broker, DeliveryMode::ActivePassive).await;

    let (id, record) = job();
    let outcome = dispatcher.send(id, &record).await.expect("delivered");

    assert_eq!(outcome.primary, SendAttempt::Accepted);
    assert_eq!(outcome.secondary, SendAttempt::Skipped);
    assert_eq!(broker.send_attempts("west"), 1);
    assert_eq!(broker.send_attempts("east"), 0);
}

#[tokio::test]
async fn active_passive_fails_over_and_stops_using_failed_primary() {
    let broker = InMemoryBroker::new();
    let dispatcher = dispatcher(&broker, DeliveryMode::ActivePassive).await;
    broker.fail_sends("west", true);

    let (id, record) = job();
    let outcome = dispatcher.send(id, &record).await.expect("failover delivers");
    assert_eq!(outcome.primary, SendAttempt::Failed);
    assert_eq!(outcome.secondary, SendAttempt::Accepted);
    assert!(!dispatcher.endpoints().primary().is_available());

    // Health never heals within a run, even once the primary recovers.
    broker.fail_sends("west", false);
    let (id, record) = job();
    let outcome = dispatcher.send(id, &record).await.expect("secondary delivers");
    assert_eq!(outcome.primary, SendAttempt::Skipped);
    assert_eq!(outcome.secondary, SendAttempt::Accepted);
    assert_eq!(broker.send_attempts("west"), 1);
    assert_eq!(broker.pending("east", QUEUE), 2);
}

#[tokio::test]
async fn active_active_attempts_both_endpoints_independently() {
    let broker = InMemoryBroker::new();
    let dispatcher = dispatcher(&broker, DeliveryMode::ActiveActive).await;

    let (id, record) = job();
    let outcome = dispatcher.send(id, &record).await.expect("delivered");
    assert_eq!(outcome.accepted_by().count(), 2);

    broker.fail_sends("west", true);
    let (id, record) = job();
    let outcome = dispatcher.send(id, &record).await.expect("secondary still accepts");
    assert_eq!(outcome.primary, SendAttempt::Failed);
    assert_eq!(outcome.secondary, SendAttempt::Accepted);
    assert_eq!(broker.pending("west", QUEUE), 1);
    assert_eq!(broker.pending("east", QUEUE), 2);
}

#[tokio::test]
async fn startup_with_no_reachable_endpoint_is_fatal_without_sends() {
    let broker = InMemoryBroker::new();
    broker.refuse_connections("west", true);
    broker.refuse_connections("east", true);
    let connector = MemoryConnector::new(broker.clone());

    let err = DualEndpoints::connect(&connector, &endpoints_config())
        .await
        .expect_err("both connects fail");
    assert!(err.is_fatal());
    assert_eq!(err.exit_code(), EXIT_ALL_ENDPOINTS_UNAVAILABLE);
    assert_eq!(broker.send_attempts("west"), 0);
    assert_eq!(broker.send_attempts("east"), 0);
}

#[tokio::test]
async fn single_connect_failure_leaves_the_other_endpoint_in_service() {
    let broker = InMemoryBroker::new();
    broker.refuse_connections("west", true);
    let dispatcher = dispatcher(&broker, DeliveryMode::ActivePassive).await;
    assert!(!dispatcher.endpoints().primary().is_available());

    let (id, record) = job();
    let outcome = dispatcher.send(id, &record).await.expect("secondary accepts");
    assert_eq!(outcome.primary, SendAttempt::Skipped);
    assert_eq!(outcome.secondary, SendAttempt::Accepted);
}

#[tokio::test]
async fn losing_both_endpoints_mid_run_refuses_further_jobs() {
    let broker = InMemoryBroker::new();
    let dispatcher = dispatcher(&broker, DeliveryMode::ActivePassive).await;
    broker.fail_sends("west", true);
    broker.fail_sends("east", true);

    let (id, record) = job();
    let err = dispatcher.send(id, &record).await.expect_err("nowhere to deliver");
    assert!(matches!(err, DispatchError::AllEndpointsUnavailable));
    assert!(dispatcher.endpoints().all_unavailable());

    let attempts = broker.send_attempts("west") + broker.send_attempts("east");
    let (id, record) = job();
    let err = dispatcher.send(id, &record).await.expect_err("fails fast");
    assert!(err.is_fatal());
    assert_eq!(
        broker.send_attempts("west") + broker.send_attempts("east"),
        attempts
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn thousand_concurrent_jobs_reach_both_endpoints() {
    let broker = InMemoryBroker::new();
    let dispatcher = dispatcher(&broker, DeliveryMode::ActiveActive).await;
    let jobs: Vec<_> = (0..1000).map(|_| job()).collect();

    let report = dispatcher.send_batch(&jobs).await.expect("batch delivered");
    assert_eq!(report.delivered(), 1000);
    assert_eq!(report.duplicated(), 1000);
    assert!(report.rejected.is_empty());
    assert_eq!(broker.pending("west", QUEUE), 1000);
    assert_eq!(broker.pending("east", QUEUE), 1000);
}

/// Client that appends its role to a shared log on every send.
struct RecordingClient {
    role: EndpointRole,
    fail: bool,
    log: Arc<Mutex<Vec<EndpointRole>>>,
}

#[async_trait]
impl QueueClient for RecordingClient {
    fn name(&self) -> &str {
        self.role.label()
    }

    async fn send(&self, _message: OutboundMessage) -> hamq_msg::Result<()> {
        self.log.lock().push(self.role);
        if self.fail {
            return Err(MessagingError::Send {
                endpoint: self.role.label().into(),
                reason: "injected".into(),
            });
        }
        Ok(())
    }

    async fn receive(&self) -> hamq_msg::Result<Delivery> {
        Err(MessagingError::Closed(self.role.label().into()))
    }

    async fn acknowledge(&self, _token: &LockToken) -> hamq_msg::Result<()> {
        Ok(())
    }

    async fn close(&self) -> hamq_msg::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn primary_attempt_always_precedes_secondary() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let client = |role: EndpointRole, fail: bool| -> Arc<dyn QueueClient> {
        Arc::new(RecordingClient {
            role,
            fail,
            log: log.clone(),
        })
    };
    let endpoints = DualEndpoints::from_handles(
        EndpointHandle::connected(EndpointRole::Primary, "primary", client(EndpointRole::Primary, true)),
        EndpointHandle::connected(
            EndpointRole::Secondary,
            "secondary",
            client(EndpointRole::Secondary, false),
        ),
    );
    let dispatcher = Dispatcher::new(
        Arc::new(endpoints),
        DeliveryMode::ActivePassive,
        WireCodec::default(),
    );

    let (id, record) = job();
    dispatcher.send(id, &record).await.expect("secondary accepts");
    assert_eq!(
        *log.lock(),
        vec![EndpointRole::Primary, EndpointRole::Secondary]
    );
}

/// Client whose n-th send waits `delay` and then succeeds or fails as scripted.
struct ScriptedClient {
    role: EndpointRole,
    script: Vec<(Duration, bool)>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(role: EndpointRole, script: Vec<(Duration, bool)>) -> Arc<dyn QueueClient> {
        Arc::new(Self {
            role,
            script,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl QueueClient for ScriptedClient {
    fn name(&self) -> &str {
        self.role.label()
    }

    async fn send(&self, _message: OutboundMessage) -> hamq_msg::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, accept) = self
            .script
            .get(call)
            .copied()
            .unwrap_or((Duration::ZERO, false));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if accept {
            Ok(())
        } else {
            Err(MessagingError::Send {
                endpoint: self.role.label().into(),
                reason: format!("scripted failure on call {call}"),
            })
        }
    }

    async fn receive(&self) -> hamq_msg::Result<Delivery> {
        Err(MessagingError::Closed(self.role.label().into()))
    }

    async fn acknowledge(&self, _token: &LockToken) -> hamq_msg::Result<()> {
        Ok(())
    }

    async fn close(&self) -> hamq_msg::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn batch_that_leaves_no_endpoint_available_is_fatal() {
    // Job one: primary accepts, secondary fails late. Job two: primary
    // fails, secondary accepts. Every job lands somewhere, yet both
    // endpoints end up unavailable.
    let primary = ScriptedClient::new(
        EndpointRole::Primary,
        vec![(Duration::ZERO, true), (Duration::ZERO, false)],
    );
    let secondary = ScriptedClient::new(
        EndpointRole::Secondary,
        vec![(Duration::from_millis(50), false), (Duration::ZERO, true)],
    );
    let endpoints = DualEndpoints::from_handles(
        EndpointHandle::connected(EndpointRole::Primary, "primary", primary),
        EndpointHandle::connected(EndpointRole::Secondary, "secondary", secondary),
    );
    let dispatcher = Dispatcher::new(
        Arc::new(endpoints),
        DeliveryMode::ActiveActive,
        WireCodec::default(),
    );

    let err = dispatcher
        .send_batch(&[job(), job()])
        .await
        .expect_err("no endpoint left for further work");
    assert!(matches!(err, DispatchError::AllEndpointsUnavailable));
    assert_eq!(err.exit_code(), EXIT_ALL_ENDPOINTS_UNAVAILABLE);
    assert!(dispatcher.endpoints().all_unavailable());
}
