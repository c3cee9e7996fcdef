//! Event types moving through a tillflow job.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A single raw message as received from the message bus. Ephemeral, only
/// lives until decoding.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Opaque message payload, expected to be a UTF-8 JSON document
    pub payload: Vec<u8>,
    /// Bus partition this message arrived on, if the bus has partitions
    pub partition: Option<i32>,
    /// Offset within the partition, if the bus tracks offsets
    pub offset: Option<i64>,
}

impl RawEvent {
    /// Wrap a bare payload with no arrival metadata
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            partition: None,
            offset: None,
        }
    }
}

/// Whether an invoice records a sale or a return.
///
/// Feed values other than `"ORDER"` and `"RETURN"` decode to [`EventType::Unknown`]
/// and flow through with both indicator flags unset rather than being
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A sale
    #[serde(rename = "ORDER")]
    Order,
    /// A refunded sale
    #[serde(rename = "RETURN")]
    Return,
    /// Any other value carried by the feed
    #[serde(other)]
    Unknown,
}

/// One line item of an invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stock keeping unit. The feed spells this field `SKU`.
    #[serde(rename = "SKU")]
    pub sku: String,
    /// Product title
    pub title: String,
    /// Price of a single unit
    pub unit_price: f64,
    /// Units bought or returned
    pub quantity: u32,
}

/// An order or return event as carried by the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Invoice number of the transaction
    pub invoice_no: i64,
    /// Country the transaction happened in
    pub country: String,
    /// Event time embedded in the record, **not** arrival time
    #[serde(deserialize_with = "de_event_time")]
    pub timestamp: DateTime<Utc>,
    /// Sale or return
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Line items, may be empty
    pub items: Vec<Item>,
}

/// An [OrderEvent] extended with derived financial and count fields.
///
/// Invariant: `is_order + is_return == 1` whenever the event type is known,
/// both are `0` for [`EventType::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    /// Invoice number of the transaction
    pub invoice_no: i64,
    /// Country the transaction happened in
    pub country: String,
    /// Event time of the transaction
    pub timestamp: DateTime<Utc>,
    /// Sale or return
    pub event_type: EventType,
    /// Total units across all line items
    pub total_items: u64,
    /// Signed transaction value, negative for returns
    pub total_cost: f64,
    /// `1` iff this is an order
    pub is_order: u8,
    /// `1` iff this is a return
    pub is_return: u8,
}

/// Timestamp format used by the order feed
pub(crate) const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The feed formats timestamps as e.g. `2020-09-18 10:55:00`, assumed UTC.
fn de_event_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: &str = Deserialize::deserialize(deserializer)?;
    NaiveDateTime::parse_from_str(raw, EVENT_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}
