//! Incremental per-window aggregation state and the KPI rows derived from
//! it.

use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::time::Window;
use crate::types::EnrichedEvent;

/// Running aggregate state for one window key.
///
/// Only the raw sums and counts are stored; ratios are derived at emission
/// time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    /// Sum of signed transaction values
    pub sum_cost: f64,
    /// Number of events folded in
    pub count: u64,
    /// Number of events with the order flag set
    pub order_count: u64,
    /// Number of events with the return flag set
    pub return_count: u64,
}

impl Accumulator {
    /// Fold one event into this accumulator
    pub fn fold(&mut self, event: &EnrichedEvent) {
        self.sum_cost += event.total_cost;
        self.count += 1;
        self.order_count += u64::from(event.is_order);
        self.return_count += u64::from(event.is_return);
    }

    /// Mean signed transaction value, `0` for an empty accumulator
    pub fn average_transaction_size(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_cost / self.count as f64
        }
    }

    /// Share of returns among all flagged events, `0` when no event carried
    /// either flag
    pub fn rate_of_return(&self) -> f64 {
        let flagged = self.order_count + self.return_count;
        if flagged == 0 {
            0.0
        } else {
            self.return_count as f64 / flagged as f64
        }
    }
}

/// How an aggregation pipeline keys and reports its windows.
///
/// Implementations pick the grouping component of the window key and shape
/// the emitted row. [GlobalKpis] keys by window alone, [CountryKpis] by
/// window and country.
pub trait Grouping: 'static {
    /// Grouping component of the window key
    type Group: Eq + Hash + Clone + Debug + Send;
    /// Row emitted for a closed window key
    type Row: Serialize + Clone + Debug + Send;

    /// Name of this pipeline in logs and errors
    const NAME: &'static str;

    /// Extract the grouping component from an event
    fn group(event: &EnrichedEvent) -> Self::Group;

    /// Build the output row for a closed window key
    fn row(window: Window, group: &Self::Group, acc: &Accumulator) -> Self::Row;
}

/// Stream-wide KPIs keyed by window alone
pub struct GlobalKpis;

/// KPI row of the global pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalKpiRow {
    /// The closed window this row describes
    pub window: Window,
    /// Sum of signed transaction values in the window
    pub total_volume_of_sales: f64,
    /// Mean signed transaction value in the window
    pub average_transaction_size: f64,
    /// Share of returns among the window's events
    pub rate_of_return: f64,
}

impl Grouping for GlobalKpis {
    type Group = ();
    type Row = GlobalKpiRow;

    const NAME: &'static str = "global-kpis";

    fn group(_event: &EnrichedEvent) -> Self::Group {}

    fn row(window: Window, _group: &Self::Group, acc: &Accumulator) -> Self::Row {
        GlobalKpiRow {
            window,
            total_volume_of_sales: acc.sum_cost,
            average_transaction_size: acc.average_transaction_size(),
            rate_of_return: acc.rate_of_return(),
        }
    }
}

/// KPIs keyed by window and country
pub struct CountryKpis;

/// KPI row of the per-country pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryKpiRow {
    /// The closed window this row describes
    pub window: Window,
    /// Country this row describes
    pub country: String,
    /// Orders per minute proxy: number of events for this key
    #[serde(rename = "OPM")]
    pub opm: u64,
    /// Sum of signed transaction values for this key
    pub total_volume_of_sales: f64,
    /// Share of returns among this key's events
    pub rate_of_return: f64,
}

impl Grouping for CountryKpis {
    type Group = String;
    type Row = CountryKpiRow;

    const NAME: &'static str = "country-kpis";

    fn group(event: &EnrichedEvent) -> Self::Group {
        event.country.clone()
    }

    fn row(window: Window, group: &Self::Group, acc: &Accumulator) -> Self::Row {
        CountryKpiRow {
            window,
            country: group.clone(),
            opm: acc.count,
            total_volume_of_sales: acc.sum_cost,
            rate_of_return: acc.rate_of_return(),
        }
    }
}

/// Keyed accumulator state of one aggregation pipeline.
///
/// Exclusively owned by its pipeline task, which serializes all updates to
/// a key. Entries live until the pipeline drains them on window close.
#[derive(Debug)]
pub struct AggregationStore<G: Grouping> {
    accumulators: IndexMap<(Window, G::Group), Accumulator>,
}

impl<G: Grouping> Default for AggregationStore<G> {
    fn default() -> Self {
        Self {
            accumulators: IndexMap::new(),
        }
    }
}

impl<G: Grouping> AggregationStore<G> {
    /// Fold an admitted event into the accumulator of the given window,
    /// creating it on first contact
    pub fn apply(&mut self, window: Window, event: &EnrichedEvent) {
        self.accumulators
            .entry((window, G::group(event)))
            .or_default()
            .fold(event);
    }

    /// Remove and return the rows of every window closed by the given
    /// watermark, together with the greatest removed end boundary
    pub fn drain_closed(
        &mut self,
        watermark: DateTime<Utc>,
    ) -> (Vec<G::Row>, Option<DateTime<Utc>>) {
        let mut rows = Vec::new();
        let mut boundary = None;
        self.accumulators.retain(|(window, group), acc| {
            if window.closed_by(watermark) {
                rows.push(G::row(*window, group, acc));
                boundary = boundary.max(Some(window.end));
                false
            } else {
                true
            }
        });
        (rows, boundary)
    }

    /// Remove and return the rows of every remaining window. Used when the
    /// input stream has finished and event time is exhausted.
    pub fn drain_all(&mut self) -> (Vec<G::Row>, Option<DateTime<Utc>>) {
        self.drain_closed(DateTime::<Utc>::MAX_UTC)
    }

    /// Number of open window keys
    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    /// True if no window key is open
    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, TimeDelta};

    use super::*;
    use crate::time::TumblingWindows;
    use crate::types::EventType;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 9, 18, h, m, s).unwrap()
    }

    fn event(country: &str, cost: f64, is_return: bool, ts: DateTime<Utc>) -> EnrichedEvent {
        EnrichedEvent {
            invoice_no: 1,
            country: country.to_owned(),
            timestamp: ts,
            event_type: if is_return {
                EventType::Return
            } else {
                EventType::Order
            },
            total_items: 1,
            total_cost: if is_return { -cost } else { cost },
            is_order: u8::from(!is_return),
            is_return: u8::from(is_return),
        }
    }

    fn minute_window(h: u32, m: u32) -> Window {
        TumblingWindows::new(TimeDelta::minutes(1)).assign(at(h, m, 0))
    }

    #[test]
    fn accumulator_folds_counts_and_sums() {
        let mut acc = Accumulator::default();
        acc.fold(&event("UK", 10.0, false, at(12, 0, 5)));
        acc.fold(&event("UK", 4.0, true, at(12, 0, 40)));
        assert_eq!(acc.sum_cost, 6.0);
        assert_eq!(acc.count, 2);
        assert_eq!(acc.order_count, 1);
        assert_eq!(acc.return_count, 1);
        assert_eq!(acc.average_transaction_size(), 3.0);
        assert_eq!(acc.rate_of_return(), 0.5);
    }

    #[test]
    fn empty_accumulator_derives_zero_ratios() {
        let acc = Accumulator::default();
        assert_eq!(acc.average_transaction_size(), 0.0);
        assert_eq!(acc.rate_of_return(), 0.0);
    }

    #[test]
    fn unknown_type_events_do_not_move_the_return_rate() {
        let mut acc = Accumulator::default();
        let mut ev = event("UK", 5.0, false, at(12, 0, 5));
        ev.event_type = EventType::Unknown;
        ev.is_order = 0;
        ev.is_return = 0;
        acc.fold(&ev);
        assert_eq!(acc.count, 1);
        assert_eq!(acc.rate_of_return(), 0.0);
    }

    #[test]
    fn drain_closed_removes_only_closed_windows() {
        let mut store = AggregationStore::<GlobalKpis>::default();
        store.apply(minute_window(12, 0), &event("UK", 10.0, false, at(12, 0, 5)));
        store.apply(minute_window(12, 1), &event("FR", 7.0, false, at(12, 1, 10)));

        let (rows, boundary) = store.drain_closed(at(12, 1, 0));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].window, minute_window(12, 0));
        assert_eq!(rows[0].total_volume_of_sales, 10.0);
        assert_eq!(boundary, Some(at(12, 1, 0)));
        assert_eq!(store.len(), 1);

        // a second drain at the same watermark is a no-op
        let (rows, boundary) = store.drain_closed(at(12, 1, 0));
        assert!(rows.is_empty());
        assert_eq!(boundary, None);
    }

    #[test]
    fn per_country_keys_are_independent() {
        let mut store = AggregationStore::<CountryKpis>::default();
        let window = minute_window(12, 0);
        store.apply(window, &event("UK", 10.0, false, at(12, 0, 5)));
        store.apply(window, &event("UK", 4.0, true, at(12, 0, 40)));
        store.apply(window, &event("FR", 7.0, false, at(12, 0, 50)));

        let (mut rows, _) = store.drain_all();
        rows.sort_by(|a, b| a.country.cmp(&b.country));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].country, "FR");
        assert_eq!(rows[0].opm, 1);
        assert_eq!(rows[0].rate_of_return, 0.0);
        assert_eq!(rows[1].country, "UK");
        assert_eq!(rows[1].opm, 2);
        assert_eq!(rows[1].total_volume_of_sales, 6.0);
        assert_eq!(rows[1].rate_of_return, 0.5);
    }

    #[test]
    fn replay_into_fresh_store_is_idempotent() {
        let events = [
            event("UK", 10.0, false, at(12, 0, 5)),
            event("UK", 4.0, true, at(12, 0, 40)),
            event("FR", 7.0, false, at(12, 1, 10)),
        ];
        let assigner = TumblingWindows::new(TimeDelta::minutes(1));

        let run = || {
            let mut store = AggregationStore::<CountryKpis>::default();
            for ev in &events {
                store.apply(assigner.assign(ev.timestamp), ev);
            }
            store.drain_all().0
        };
        assert_eq!(run(), run());
    }
}
