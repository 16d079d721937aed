//! ---
//! hamq_section: "02-messaging-ipc-data-model"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Message schema helpers, codecs and transport contracts."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{MessagingError, Result};

/// Name of the transport user property carrying the [`CorrelationId`].
pub const CORRELATION_ID_PROPERTY: &str = "job-id";

/// Producer-minted identifier for a logical job.
///
/// Travels as a message property rather than inside the encoded body so
/// consumers can deduplicate without decoding the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Mint a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID value.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CorrelationId {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| MessagingError::InvalidCorrelationId(s.to_owned()))
    }
}

/// Which of the two regional endpoints a handle or delivery belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EndpointRole {
    /// Preferred endpoint, always attempted first.
    Primary,
    /// Failover or mirror endpoint.
    Secondary,
}

impl EndpointRole {
    /// Both roles in attempt order.
    pub const ALL: [EndpointRole; 2] = [EndpointRole::Primary, EndpointRole::Secondary];

    /// Stable label used for logs and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            EndpointRole::Primary => "primary",
            EndpointRole::Secondary => "secondary",
        }
    }
}

/// Out-of-band user properties attached to a queue message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageProperties(BTreeMap<String, String>);

impl MessageProperties {
    /// Empty property bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Property bag pre-populated with the correlation id.
    pub fn for_correlation(id: CorrelationId) -> Self {
        let mut properties = Self::new();
        properties.insert(CORRELATION_ID_PROPERTY, id.to_string());
        properties
    }

    /// Insert or replace a property.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a property value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Extract and parse the correlation id property.
    pub fn correlation_id(&self) -> Result<CorrelationId> {
        self.get(CORRELATION_ID_PROPERTY)
            .ok_or(MessagingError::MissingProperty(CORRELATION_ID_PROPERTY))?
            .parse()
    }
}

/// Encoded message handed to a transport for sending.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Encoded (serialized then compressed) body.
    pub body: Bytes,
    /// Out-of-band properties.
    pub properties: MessageProperties,
}

impl OutboundMessage {
    /// Construct an outbound message carrying `correlation_id` as a property.
    pub fn new(body: Bytes, correlation_id: CorrelationId) -> Self {
        Self {
            body,
            properties: MessageProperties::for_correlation(correlation_id),
        }
    }
}

/// Opaque token identifying a peek-locked delivery on its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(Uuid);

impl LockToken {
    /// Mint a fresh lock token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Message delivered by a transport and awaiting settlement.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Encoded body as sent by the producer.
    pub body: Bytes,
    /// Out-of-band properties.
    pub properties: MessageProperties,
    /// Token used to acknowledge or dead-letter the delivery.
    pub lock_token: LockToken,
    /// Broker assigned sequence number.
    pub sequence_number: u64,
    /// Number of times this message has been handed out, starting at 1.
    pub delivery_count: u32,
}

/// Demo job record emitted by the producer driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobInformation {
    /// Job identifier, equal to the correlation id of the message carrying it.
    pub job_id: Uuid,
    /// Free-form description.
    pub message: String,
    /// Whether the job has been processed.
    pub process: bool,
}

impl JobInformation {
    /// Build the standard demo job for `job_id`.
    pub fn new(job_id: CorrelationId) -> Self {
        Self {
            job_id: job_id.as_uuid(),
            message: format!("Message Id: {}", job_id),
            process: false,
        }
    }
}

/// Lifecycle status of an [`Order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Accepted but not yet picked up.
    #[default]
    Pending,
    /// Being worked on.
    Processing,
    /// Completed.
    Processed,
}

/// Line item of an [`Order`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    /// Stock keeping unit.
    pub sku: String,
    /// Human readable description.
    pub description: String,
    /// Ordered quantity.
    pub qty: i32,
    /// Unit price.
    pub price: f64,
}

/// Order record accepted as an alternative job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier, equal to the correlation id of the message carrying it.
    #[serde(rename = "orderID")]
    pub order_id: Uuid,
    /// Free-form note.
    pub message: String,
    /// Current status.
    #[serde(rename = "orderStatus")]
    pub status: OrderStatus,
    /// Line items.
    #[serde(rename = "OrderDetails", default)]
    pub order_details: Vec<OrderDetail>,
}

impl Order {
    /// Pending order with no line items.
    pub fn new(order_id: CorrelationId, message: impl Into<String>) -> Self {
        Self {
            order_id: order_id.as_uuid(),
            message: message.into(),
            status: OrderStatus::Pending,
            order_details: Vec::new(),
        }
    }

    /// Append a line item.
    pub fn with_detail(
        mut self,
        sku: impl Into<String>,
        description: impl Into<String>,
        qty: i32,
        price: f64,
    ) -> Self {
        self.order_details.push(OrderDetail {
            sku: sku.into(),
            description: description.into(),
            qty,
            price,
        });
        self
    }

    /// Sum of `qty * price` over all line items.
    pub fn total(&self) -> f64 {
        self.order_details
            .iter()
            .map(|detail| f64::from(detail.qty) * detail.price)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_travels_through_properties() {
        let id = CorrelationId::new();
        let properties = MessageProperties::for_correlation(id);
        assert_eq!(properties.get(CORRELATION_ID_PROPERTY), Some(id.to_string().as_str()));
        assert_eq!(properties.correlation_id().expect("parse"), id);
    }

    #[test]
    fn missing_or_garbled_correlation_id_is_malformed() {
        let missing = MessageProperties::new().correlation_id().unwrap_err();
        assert!(matches!(missing, MessagingError::MissingProperty(_)));

        let mut garbled = MessageProperties::new();
        garbled.insert(CORRELATION_ID_PROPERTY, "not-a-uuid");
        let err = garbled.correlation_id().unwrap_err();
        assert!(matches!(err, MessagingError::InvalidCorrelationId(_)));
    }

    #[test]
    fn job_information_uses_pascal_case_fields() {
        let id = CorrelationId::new();
        let job = JobInformation::new(id);
        let json = serde_json::to_value(&job).expect("serialize");
        assert_eq!(json["JobId"], id.to_string());
        assert_eq!(json["Message"], format!("Message Id: {}", id));
        assert_eq!(json["Process"], false);
    }

    #[test]
    fn order_wire_names_match_producers() {
        let order = Order::new(CorrelationId::new(), "rush")
            .with_detail("SKU-1", "widget", 2, 1.5)
            .with_detail("SKU-2", "gadget", 1, 4.0);
        let json = serde_json::to_value(&order).expect("serialize");
        assert!(json.get("orderID").is_some());
        assert_eq!(json["orderStatus"], "Pending");
        assert_eq!(json["OrderDetails"][0]["sku"], "SKU-1");
        assert!((order.total() - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn endpoint_role_labels() {
        assert_eq!(EndpointRole::Primary.label(), "primary");
        assert_eq!(EndpointRole::Secondary.to_string(), "secondary");
        assert_eq!(
            "secondary".parse::<EndpointRole>().unwrap(),
            EndpointRole::Secondary
        );
    }
}
