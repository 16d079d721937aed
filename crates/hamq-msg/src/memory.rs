//! ---
//! hamq_section: "02-messaging-ipc-data-model"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Message schema helpers, codecs and transport contracts."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
//! In-process broker used by tests and the demo daemon.
//!
//! Connection strings take the form `memory://<namespace>`; each namespace
//! stands in for one regional broker and can be told to refuse connections
//! or fail sends.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hamq_common::config::EndpointConfig;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::transport::{QueueClient, QueueConnector};
use crate::types::{Delivery, LockToken, MessageProperties, OutboundMessage};
use crate::{MessagingError, Result};

const SCHEME: &str = "memory://";

/// Message moved to the dead-letter queue.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Original body.
    pub body: Bytes,
    /// Original properties.
    pub properties: MessageProperties,
    /// Reason given by the consumer.
    pub reason: String,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Bytes,
    properties: MessageProperties,
    sequence_number: u64,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    next_sequence: u64,
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<LockToken, StoredMessage>,
    dead_letters: Vec<DeadLetter>,
    completed: u64,
}

#[derive(Debug, Default)]
struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryQueue {
    fn enqueue(&self, body: Bytes, properties: MessageProperties) {
        {
            let mut state = self.state.lock();
            state.next_sequence += 1;
            let sequence_number = state.next_sequence;
            state.ready.push_back(StoredMessage {
                body,
                properties,
                sequence_number,
                delivery_count: 0,
            });
        }
        self.notify.notify_one();
    }

    fn try_take(&self) -> Option<Delivery> {
        let mut state = self.state.lock();
        let mut message = state.ready.pop_front()?;
        message.delivery_count += 1;
        let lock_token = LockToken::new();
        let delivery = Delivery {
            body: message.body.clone(),
            properties: message.properties.clone(),
            lock_token,
            sequence_number: message.sequence_number,
            delivery_count: message.delivery_count,
        };
        state.in_flight.insert(lock_token, message);
        Some(delivery)
    }
}

#[derive(Debug, Default)]
struct Namespace {
    refuse_connections: AtomicBool,
    fail_sends: AtomicBool,
    send_attempts: AtomicU64,
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
}

impl Namespace {
    fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        self.queues
            .lock()
            .entry(name.to_owned())
            .or_default()
            .clone()
    }
}

/// Set of in-memory namespaces shared by every client created from it.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    namespaces: Mutex<HashMap<String, Arc<Namespace>>>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn namespace(&self, name: &str) -> Arc<Namespace> {
        self.namespaces
            .lock()
            .entry(name.to_owned())
            .or_default()
            .clone()
    }

    fn queue(&self, namespace: &str, queue: &str) -> Arc<MemoryQueue> {
        self.namespace(namespace).queue(queue)
    }

    /// Make future connection attempts to `namespace` fail.
    pub fn refuse_connections(&self, namespace: &str, refuse: bool) {
        self.namespace(namespace)
            .refuse_connections
            .store(refuse, Ordering::SeqCst);
    }

    /// Make sends to `namespace` fail while `fail` is set.
    pub fn fail_sends(&self, namespace: &str, fail: bool) {
        self.namespace(namespace)
            .fail_sends
            .store(fail, Ordering::SeqCst);
    }

    /// Number of send attempts (successful or not) made against `namespace`.
    pub fn send_attempts(&self, namespace: &str) -> u64 {
        self.namespace(namespace)
            .send_attempts
            .load(Ordering::SeqCst)
    }

    /// Enqueue a raw message, bypassing any client.
    pub fn inject(&self, namespace: &str, queue: &str, message: OutboundMessage) {
        self.queue(namespace, queue)
            .enqueue(message.body, message.properties);
    }

    /// Messages not yet acknowledged (ready or locked).
    pub fn pending(&self, namespace: &str, queue: &str) -> usize {
        let queue = self.queue(namespace, queue);
        let state = queue.state.lock();
        state.ready.len() + state.in_flight.len()
    }

    /// Messages acknowledged so far.
    pub fn completed(&self, namespace: &str, queue: &str) -> u64 {
        self.queue(namespace, queue).state.lock().completed
    }

    /// Snapshot of the dead-letter queue.
    pub fn dead_letters(&self, namespace: &str, queue: &str) -> Vec<DeadLetter> {
        self.queue(namespace, queue)
            .state
            .lock()
            .dead_letters
            .clone()
    }

    /// Release every locked delivery back to the queue, as an expired lock would.
    pub fn abandon_in_flight(&self, namespace: &str, queue: &str) -> usize {
        let queue = self.queue(namespace, queue);
        let released = {
            let mut state = queue.state.lock();
            let mut released: Vec<StoredMessage> =
                state.in_flight.drain().map(|(_, message)| message).collect();
            released.sort_by_key(|message| message.sequence_number);
            let count = released.len();
            for message in released.into_iter().rev() {
                state.ready.push_front(message);
            }
            count
        };
        for _ in 0..released {
            queue.notify.notify_one();
        }
        released
    }
}

/// [`QueueConnector`] resolving `memory://` connection strings against a broker.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    broker: Arc<InMemoryBroker>,
}

impl MemoryConnector {
    /// Connector bound to `broker`.
    pub fn new(broker: Arc<InMemoryBroker>) -> Self {
        Self { broker }
    }

    /// Underlying broker, for inspection and failure injection.
    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }
}

#[async_trait]
impl QueueConnector for MemoryConnector {
    async fn connect(&self, endpoint: &EndpointConfig) -> Result<Arc<dyn QueueClient>> {
        let described = endpoint.describe();
        let namespace_name = endpoint
            .connection
            .trim()
            .strip_prefix(SCHEME)
            .map(|rest| rest.trim_end_matches('/'))
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| MessagingError::Connect {
                endpoint: described.clone(),
                reason: format!("expected a {}<namespace> connection string", SCHEME),
            })?;

        let namespace = self.broker.namespace(namespace_name);
        if namespace.refuse_connections.load(Ordering::SeqCst) {
            return Err(MessagingError::Connect {
                endpoint: described,
                reason: "namespace unreachable".into(),
            });
        }
        let queue = namespace.queue(&endpoint.queue);
        debug!(endpoint = %described, "memory client connected");
        Ok(Arc::new(MemoryQueueClient {
            name: described,
            namespace,
            queue,
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryQueueClient {
    name: String,
    namespace: Arc<Namespace>,
    queue: Arc<MemoryQueue>,
    closed: AtomicBool,
}

impl MemoryQueueClient {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(MessagingError::Closed(self.name.clone()))
        } else {
            Ok(())
        }
    }

    fn settle_error(&self, token: &LockToken) -> MessagingError {
        MessagingError::Settle {
            endpoint: self.name.clone(),
            reason: format!("lock token {} is not held", token),
        }
    }
}

#[async_trait]
impl QueueClient for MemoryQueueClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.ensure_open()?;
        self.namespace.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.namespace.fail_sends.load(Ordering::SeqCst) {
            return Err(MessagingError::Send {
                endpoint: self.name.clone(),
                reason: "namespace rejected the message".into(),
            });
        }
        self.queue.enqueue(message.body, message.properties);
        Ok(())
    }

    async fn receive(&self) -> Result<Delivery> {
        loop {
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_open()?;
            if let Some(delivery) = self.queue.try_take() {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn acknowledge(&self, token: &LockToken) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.queue.state.lock();
        if state.in_flight.remove(token).is_none() {
            return Err(self.settle_error(token));
        }
        state.completed += 1;
        Ok(())
    }

    async fn dead_letter(&self, token: &LockToken, reason: &str) -> Result<bool> {
        self.ensure_open()?;
        let mut state = self.queue.state.lock();
        let message = state
            .in_flight
            .remove(token)
            .ok_or_else(|| self.settle_error(token))?;
        state.dead_letters.push(DeadLetter {
            body: message.body,
            properties: message.properties,
            reason: reason.to_owned(),
        });
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.queue.notify.notify_waiters();
            debug!(endpoint = %self.name, "memory client closed");
        }
        Ok(())
    }
}
