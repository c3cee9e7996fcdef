//! One aggregation pipeline: watermark, window assignment, keyed
//! accumulators and a checkpointed sink, driven by its own trigger clock.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::aggregate::{AggregationStore, Grouping};
use crate::metrics::Counter;
use crate::sinks::{RowSink, SinkError};
use crate::time::{TumblingWindows, WatermarkTracker};
use crate::types::EnrichedEvent;

/// A pipeline stopped because its sink failed
#[derive(Debug, Error)]
#[error("Pipeline {pipeline} failed flushing windows up to {boundary}")]
pub struct PipelineError {
    /// Name of the failed pipeline
    pub pipeline: &'static str,
    /// End boundary of the batch that could not be flushed
    pub boundary: DateTime<Utc>,
    /// Underlying sink failure
    #[source]
    pub source: SinkError,
}

/// Event-time aggregation of one enriched-event stream into windowed KPI
/// rows.
///
/// The pipeline exclusively owns its watermark and accumulator state;
/// updates to a window key are serialized by construction since only the
/// pipeline's task touches them. Once a window has been flushed it never
/// re-opens: its boundary is remembered (and restored from the sink's
/// checkpoint on startup) and anything at or behind it is dropped as late.
pub struct AggregationPipeline<G: Grouping, S: RowSink<G::Row>> {
    assigner: TumblingWindows,
    watermark: WatermarkTracker,
    store: AggregationStore<G>,
    sink: S,
    flushed_up_to: Option<DateTime<Utc>>,
    late_drops: Counter,
}

impl<G, S> AggregationPipeline<G, S>
where
    G: Grouping,
    S: RowSink<G::Row>,
{
    /// Create a pipeline over the given sink, resuming from the sink's
    /// checkpoint if it has one
    pub fn new(
        window_width: TimeDelta,
        allowed_lateness: TimeDelta,
        sink: S,
        late_drops: Counter,
    ) -> Self {
        let flushed_up_to = sink.resume_from();
        if let Some(boundary) = flushed_up_to {
            info!(
                pipeline = G::NAME,
                up_to = %boundary,
                "Resuming, windows before this boundary stay flushed"
            );
        }
        Self {
            assigner: TumblingWindows::new(window_width),
            watermark: WatermarkTracker::new(allowed_lateness),
            store: AggregationStore::default(),
            sink,
            flushed_up_to,
            late_drops,
        }
    }

    /// Advance the watermark and fold the event into its window, or drop it
    /// as late
    pub fn observe(&mut self, event: &EnrichedEvent) {
        self.watermark.observe(event.timestamp);
        let window = self.assigner.assign(event.timestamp);
        let already_flushed = self
            .flushed_up_to
            .is_some_and(|boundary| window.end <= boundary);
        if self.watermark.is_on_time(&window) && !already_flushed {
            self.store.apply(window, event);
        } else {
            self.late_drops.incr();
            debug!(
                pipeline = G::NAME,
                window = %window,
                timestamp = %event.timestamp,
                "Dropping late event"
            );
        }
    }

    /// Emit every window closed by the current watermark
    pub async fn flush_closed(&mut self) -> Result<(), PipelineError> {
        let Some(watermark) = self.watermark.current() else {
            return Ok(());
        };
        let (rows, boundary) = self.store.drain_closed(watermark);
        self.emit(rows, boundary).await
    }

    /// Emit everything still open. Called once the input has finished and
    /// event time is exhausted.
    async fn flush_all(&mut self) -> Result<(), PipelineError> {
        let (rows, boundary) = self.store.drain_all();
        self.emit(rows, boundary).await
    }

    async fn emit(
        &mut self,
        rows: Vec<G::Row>,
        boundary: Option<DateTime<Utc>>,
    ) -> Result<(), PipelineError> {
        let Some(boundary) = boundary else {
            return Ok(());
        };
        let failed = |source| PipelineError {
            pipeline: G::NAME,
            boundary,
            source,
        };
        self.sink.write_batch(&rows).await.map_err(failed)?;
        self.sink.commit(boundary).await.map_err(failed)?;
        self.flushed_up_to = self.flushed_up_to.max(Some(boundary));
        info!(
            pipeline = G::NAME,
            rows = rows.len(),
            up_to = %boundary,
            "Flushed closed windows"
        );
        Ok(())
    }

    /// Consume the stream until it disconnects, flushing on every trigger
    /// tick and once more at the end
    pub async fn run(
        mut self,
        events: flume::Receiver<EnrichedEvent>,
        trigger_interval: Duration,
    ) -> Result<(), PipelineError> {
        let mut ticker = tokio::time::interval(trigger_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of a tokio interval completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                event = events.recv_async() => match event {
                    Ok(event) => self.observe(&event),
                    Err(_) => break,
                },
                _ = ticker.tick() => self.flush_closed().await?,
            }
        }
        info!(pipeline = G::NAME, "Input finished, closing remaining windows");
        self.flush_all().await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::aggregate::{CountryKpis, GlobalKpis};
    use crate::sinks::VecRowSink;
    use crate::types::EventType;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 9, 18, h, m, s).unwrap()
    }

    fn event(country: &str, cost: f64, is_return: bool, ts: DateTime<Utc>) -> EnrichedEvent {
        EnrichedEvent {
            invoice_no: 7,
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

    fn minute() -> TimeDelta {
        TimeDelta::minutes(1)
    }

    fn pipeline<G: Grouping>(
        sink: VecRowSink<G::Row>,
    ) -> AggregationPipeline<G, VecRowSink<G::Row>>
    where
        G::Row: Clone + Sync,
    {
        AggregationPipeline::new(minute(), minute(), sink, Counter::default())
    }

    #[tokio::test]
    async fn emits_closed_windows_once() {
        let sink = VecRowSink::new();
        let mut pipeline = pipeline::<GlobalKpis>(sink.clone());

        pipeline.observe(&event("UK", 10.0, false, at(12, 0, 5)));
        pipeline.observe(&event("UK", 4.0, true, at(12, 0, 40)));
        // advances max_seen to 12:02:00, watermark to 12:01:00
        pipeline.observe(&event("FR", 7.0, false, at(12, 2, 0)));

        pipeline.flush_closed().await.unwrap();
        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_volume_of_sales, 6.0);
        assert_eq!(rows[0].average_transaction_size, 3.0);
        assert_eq!(rows[0].rate_of_return, 0.5);

        // spurious re-trigger emits nothing new
        pipeline.flush_closed().await.unwrap();
        assert_eq!(sink.rows().len(), 1);
        assert_eq!(sink.commits(), vec![at(12, 1, 0)]);
    }

    #[tokio::test]
    async fn late_event_does_not_alter_emitted_window() {
        let late_drops = Counter::default();
        let sink = VecRowSink::new();
        let mut pipeline: AggregationPipeline<GlobalKpis, _> =
            AggregationPipeline::new(minute(), minute(), sink.clone(), late_drops.clone());

        pipeline.observe(&event("UK", 10.0, false, at(12, 0, 5)));
        pipeline.observe(&event("UK", 5.0, false, at(12, 3, 0)));
        pipeline.flush_closed().await.unwrap();
        assert_eq!(sink.rows().len(), 1);

        // watermark is 12:02:00, [12:00, 12:01) is long gone
        pipeline.observe(&event("UK", 99.0, false, at(12, 0, 30)));
        assert_eq!(late_drops.get(), 1);
        pipeline.flush_closed().await.unwrap();
        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_volume_of_sales, 10.0);
    }

    #[tokio::test]
    async fn window_ending_on_watermark_is_still_admitted() {
        let late_drops = Counter::default();
        let sink = VecRowSink::new();
        let mut pipeline: AggregationPipeline<GlobalKpis, _> =
            AggregationPipeline::new(minute(), minute(), sink, late_drops.clone());

        pipeline.observe(&event("UK", 5.0, false, at(12, 2, 0)));
        // watermark 12:01:00 == end of [12:00, 12:01)
        pipeline.observe(&event("UK", 10.0, false, at(12, 0, 30)));
        assert_eq!(late_drops.get(), 0);

        // one more minute and the same window is behind the watermark
        pipeline.observe(&event("UK", 5.0, false, at(12, 3, 0)));
        pipeline.observe(&event("UK", 10.0, false, at(12, 0, 45)));
        assert_eq!(late_drops.get(), 1);
    }

    #[tokio::test]
    async fn resumed_pipeline_drops_replayed_windows() {
        let sink = VecRowSink::new();
        let mut pipeline: AggregationPipeline<CountryKpis, _> = AggregationPipeline {
            assigner: TumblingWindows::new(minute()),
            watermark: WatermarkTracker::new(minute()),
            store: AggregationStore::default(),
            sink: sink.clone(),
            // as restored from a sink checkpoint
            flushed_up_to: Some(at(12, 1, 0)),
            late_drops: Counter::default(),
        };

        // replayed from the bus after restart
        pipeline.observe(&event("UK", 10.0, false, at(12, 0, 5)));
        // genuinely new window
        pipeline.observe(&event("FR", 7.0, false, at(12, 1, 10)));
        pipeline.flush_all().await.unwrap();

        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].country, "FR");
    }

    #[tokio::test]
    async fn run_flushes_remaining_windows_on_disconnect() {
        let sink = VecRowSink::new();
        let pipeline = pipeline::<CountryKpis>(sink.clone());
        let (tx, rx) = flume::bounded(8);

        let task = tokio::spawn(pipeline.run(rx, Duration::from_secs(3600)));
        tx.send_async(event("UK", 10.0, false, at(12, 0, 5)))
            .await
            .unwrap();
        tx.send_async(event("FR", 7.0, false, at(12, 1, 10)))
            .await
            .unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        let mut countries: Vec<String> = sink.rows().into_iter().map(|r| r.country).collect();
        countries.sort();
        assert_eq!(countries, vec!["FR".to_owned(), "UK".to_owned()]);
    }
}
