//! Tillflow is an engine for turning an unbounded stream of retail
//! order/return events into time-windowed sales KPIs.
//!
//! Events are decoded from JSON payloads, enriched with derived fields and
//! fanned out to three independent consumers: a console feed of the raw
//! enriched records and two event-time aggregation pipelines (global and
//! per-country) which write their windowed KPI rows to checkpointed
//! append-only sinks.
pub mod aggregate;
pub mod checkpoint;
pub mod config;
pub mod decode;
pub mod enrich;
pub mod job;
pub mod metrics;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod time;
pub mod types;
