//! ---
//! hamq_section: "07-resilience-fault-tolerance"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Endpoint health tracking and dual-endpoint dispatch."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hamq_common::config::{EndpointConfig, EndpointsConfig};
use hamq_msg::{EndpointRole, MessagingError, QueueClient, QueueConnector};
use tracing::{debug, error, info, warn};

use crate::{DispatchError, Result};

/// Connection to one queue endpoint plus its health flag.
pub struct EndpointHandle {
    role: EndpointRole,
    target: String,
    client: Option<Arc<dyn QueueClient>>,
    available: AtomicBool,
    closed: AtomicBool,
}

impl EndpointHandle {
    /// Handle for an endpoint whose connection succeeded.
    pub fn connected(role: EndpointRole, target: impl Into<String>, client: Arc<dyn QueueClient>) -> Self {
        Self {
            role,
            target: target.into(),
            client: Some(client),
            available: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    /// Handle for an endpoint that could not be reached at startup.
    pub fn unavailable(role: EndpointRole, target: impl Into<String>) -> Self {
        Self {
            role,
            target: target.into(),
            client: None,
            available: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Connect to `config`, recording a connect failure as unavailability.
    pub async fn open(
        role: EndpointRole,
        connector: &dyn QueueConnector,
        config: &EndpointConfig,
    ) -> Self {
        let target = config.describe();
        match connector.connect(config).await {
            Ok(client) => {
                info!(endpoint = role.label(), target = %target, "endpoint connected");
                Self::connected(role, target, client)
            }
            Err(err) => {
                warn!(
                    endpoint = role.label(),
                    target = %target,
                    error = %err,
                    "endpoint connection failed; marking unavailable"
                );
                Self::unavailable(role, target)
            }
        }
    }

    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Client for this endpoint, if the connection was ever established.
    pub fn client(&self) -> Option<&Arc<dyn QueueClient>> {
        self.client.as_ref()
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Flip the endpoint to unavailable. Returns `true` only for the call that
    /// performed the transition.
    pub fn mark_unavailable(&self) -> bool {
        self.available.swap(false, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the underlying client once. Subsequent calls are no-ops.
    pub async fn close(&self) -> std::result::Result<(), MessagingError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match &self.client {
            Some(client) => {
                debug!(endpoint = self.role.label(), target = %self.target, "closing endpoint");
                client.close().await
            }
            None => Ok(()),
        }
    }
}

impl fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("role", &self.role)
            .field("target", &self.target)
            .field("connected", &self.client.is_some())
            .field("available", &self.is_available())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The primary/secondary endpoint pair.
#[derive(Debug)]
pub struct DualEndpoints {
    primary: EndpointHandle,
    secondary: EndpointHandle,
}

impl DualEndpoints {
    pub fn from_handles(primary: EndpointHandle, secondary: EndpointHandle) -> Self {
        Self { primary, secondary }
    }

    /// Connect both endpoints. A single failed connect is tolerated; if both
    /// fail the pair is unusable and [`DispatchError::AllEndpointsUnavailable`]
    /// is returned.
    pub async fn connect(connector: &dyn QueueConnector, config: &EndpointsConfig) -> Result<Self> {
        let (primary, secondary) = tokio::join!(
            EndpointHandle::open(EndpointRole::Primary, connector, &config.primary),
            EndpointHandle::open(EndpointRole::Secondary, connector, &config.secondary),
        );
        let endpoints = Self::from_handles(primary, secondary);
        if endpoints.all_unavailable() {
            error!(
                primary = %endpoints.primary.target(),
                secondary = %endpoints.secondary.target(),
                "both endpoints failed to connect"
            );
            return Err(DispatchError::AllEndpointsUnavailable);
        }
        Ok(endpoints)
    }

    pub fn primary(&self) -> &EndpointHandle {
        &self.primary
    }

    pub fn secondary(&self) -> &EndpointHandle {
        &self.secondary
    }

    pub fn get(&self, role: EndpointRole) -> &EndpointHandle {
        match role {
            EndpointRole::Primary => &self.primary,
            EndpointRole::Secondary => &self.secondary,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointHandle> {
        [&self.primary, &self.secondary].into_iter()
    }

    pub fn all_unavailable(&self) -> bool {
        !self.primary.is_available() && !self.secondary.is_available()
    }

    /// Close both endpoints, logging rather than returning close failures.
    pub async fn close(&self) {
        for endpoint in self.iter() {
            if let Err(err) = endpoint.close().await {
                warn!(endpoint = endpoint.role().label(), error = %err, "failed to close endpoint");
            }
        }
    }
}
