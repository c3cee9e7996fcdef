//! Wiring of a complete streaming job: ingest, fan-out and the three
//! consumer tasks.

use std::time::Duration;

use bon::Builder;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::aggregate::{CountryKpiRow, CountryKpis, GlobalKpiRow, GlobalKpis};
use crate::config::JobConfig;
use crate::decode::decode_order;
use crate::enrich::enrich;
use crate::metrics::{Counter, JobMetrics};
use crate::pipeline::{AggregationPipeline, PipelineError};
use crate::sinks::{ConsoleSink, JsonFileSink, RowSink, SinkError};
use crate::sources::{EventSource, SourceError};
use crate::types::EnrichedEvent;

/// A job stopped with a failure
#[derive(Debug, Error)]
pub enum JobError {
    /// The message bus read failed
    #[error(transparent)]
    Source(#[from] SourceError),
    /// One of the aggregation pipelines failed; the error names the
    /// pipeline and the window boundary that could not be flushed
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// A task panicked or was aborted
    #[error("A job task stopped unexpectedly")]
    Task(#[source] tokio::task::JoinError),
}

/// Open the two checkpointed KPI file sinks described by the config.
///
/// Fails if either sink finds a corrupt checkpoint.
pub fn open_file_sinks(
    config: &JobConfig,
) -> Result<(JsonFileSink<GlobalKpiRow>, JsonFileSink<CountryKpiRow>), SinkError> {
    let global = JsonFileSink::new(
        &config.global_kpi_path,
        &config.global_kpi_checkpoint,
        config.sink_retry_budget,
    )?;
    let country = JsonFileSink::new(
        &config.country_kpi_path,
        &config.country_kpi_checkpoint,
        config.sink_retry_budget,
    )?;
    Ok((global, country))
}

/// A complete streaming job over one event source.
///
/// The ingest task decodes and enriches every payload and fans the
/// enriched events out over bounded channels to three independent
/// consumers: the console table, the global KPI pipeline and the
/// per-country KPI pipeline. Each consumer advances on its own trigger
/// clock and owns its own recovery state; no lock is shared across them.
#[derive(Builder)]
pub struct StreamJob<Src, GS, CS> {
    source: Src,
    config: JobConfig,
    global_sink: GS,
    country_sink: CS,
    #[builder(default)]
    metrics: JobMetrics,
    /// Whether to run the console consumer
    #[builder(default = true)]
    console: bool,
}

impl<Src, GS, CS> StreamJob<Src, GS, CS>
where
    Src: EventSource,
    GS: RowSink<GlobalKpiRow>,
    CS: RowSink<CountryKpiRow>,
{
    /// Handle observing the job's drop counters
    pub fn metrics(&self) -> JobMetrics {
        self.metrics.clone()
    }

    /// Run until the source finishes or a pipeline fails.
    ///
    /// A failed pipeline does not tear the others down mid-flight; they
    /// keep draining and flushing, and the first error is returned once
    /// every task has stopped.
    pub async fn run(self) -> Result<(), JobError> {
        let config = self.config;
        let capacity = config.channel_capacity;

        let (console_tx, console_rx) = flume::bounded::<EnrichedEvent>(capacity);
        let (global_tx, global_rx) = flume::bounded::<EnrichedEvent>(capacity);
        let (country_tx, country_rx) = flume::bounded::<EnrichedEvent>(capacity);

        let global = AggregationPipeline::<GlobalKpis, GS>::new(
            config.window_width(),
            config.allowed_lateness(),
            self.global_sink,
            self.metrics.late_drops_global.clone(),
        );
        let country = AggregationPipeline::<CountryKpis, CS>::new(
            config.window_width(),
            config.allowed_lateness(),
            self.country_sink,
            self.metrics.late_drops_country.clone(),
        );

        let mut outputs = vec![global_tx, country_tx];
        if self.console {
            outputs.push(console_tx);
        } else {
            // close the channel so the console task exits right away
            drop(console_tx);
        }

        let ingest = tokio::spawn(ingest_loop(
            self.source,
            outputs,
            self.metrics.decode_errors.clone(),
        ));
        let console = tokio::spawn(console_loop(console_rx, config.console_interval()));
        let global = tokio::spawn(global.run(global_rx, config.global_trigger()));
        let country = tokio::spawn(country.run(country_rx, config.country_trigger()));

        let (ingest, _console, global, country) =
            tokio::try_join!(ingest, console, global, country).map_err(JobError::Task)?;
        ingest?;
        global?;
        country?;
        Ok(())
    }
}

/// Poll the source, decode and enrich, fan out to every consumer.
///
/// Sending blocks while a consumer's channel is full, so a slow consumer
/// backpressures the bus read. Undecodable payloads are counted and
/// dropped.
async fn ingest_loop<Src: EventSource>(
    mut source: Src,
    outputs: Vec<flume::Sender<EnrichedEvent>>,
    decode_errors: Counter,
) -> Result<(), JobError> {
    loop {
        if source.is_finished() {
            info!("Source finished, closing stream");
            return Ok(());
        }
        let Some(raw) = source.poll().await.map_err(JobError::Source)? else {
            continue;
        };
        let event = match decode_order(&raw.payload) {
            Ok(event) => enrich(event),
            Err(e) => {
                decode_errors.incr();
                warn!(error = %e, "Dropping undecodable payload");
                continue;
            }
        };
        let mut any_alive = false;
        for output in &outputs {
            if output.send_async(event.clone()).await.is_ok() {
                any_alive = true;
            }
        }
        if !any_alive {
            info!("All consumers stopped, closing stream");
            return Ok(());
        }
    }
}

/// Buffer enriched events and print them as a table on every tick
async fn console_loop(events: flume::Receiver<EnrichedEvent>, interval: Duration) {
    let mut sink = ConsoleSink::new();
    let mut buffer: Vec<EnrichedEvent> = Vec::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            event = events.recv_async() => match event {
                Ok(event) => buffer.push(event),
                Err(_) => break,
            },
            _ = ticker.tick() => {
                sink.print_batch(&buffer);
                buffer.clear();
            }
        }
    }
    if !buffer.is_empty() {
        sink.print_batch(&buffer);
    }
}
