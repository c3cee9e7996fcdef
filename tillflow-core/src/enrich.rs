//! Pure per-record derivation of financial and count fields.

use crate::types::{EnrichedEvent, EventType, Item, OrderEvent};

/// Total number of units across all line items
pub fn total_item_count(items: &[Item]) -> u64 {
    items.iter().map(|item| u64::from(item.quantity)).sum()
}

/// Signed transaction value. The sum of `unit_price * quantity` over all
/// line items, negated for returns.
pub fn total_cost(items: &[Item], event_type: EventType) -> f64 {
    let gross: f64 = items
        .iter()
        .map(|item| item.unit_price * f64::from(item.quantity))
        .sum();
    match event_type {
        EventType::Return => -gross,
        _ => gross,
    }
}

/// Derive the enriched form of an order event.
///
/// Stateless mapping, safe to apply from any task.
pub fn enrich(event: OrderEvent) -> EnrichedEvent {
    let total_items = total_item_count(&event.items);
    let total_cost = total_cost(&event.items, event.event_type);
    let is_order = u8::from(event.event_type == EventType::Order);
    let is_return = u8::from(event.event_type == EventType::Return);
    EnrichedEvent {
        invoice_no: event.invoice_no,
        country: event.country,
        timestamp: event.timestamp,
        event_type: event.event_type,
        total_items,
        total_cost,
        is_order,
        is_return,
    }
}
