//! Job configuration. All knobs of the engine live here; bus address and
//! topic belong to the source implementation instead.

use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Configuration of a [StreamJob](crate::job::StreamJob).
///
/// Build one with [JobConfig::builder] or deserialize it from a config
/// file; every field has a default matching the classic one-minute retail
/// KPI setup.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Width of the tumbling windows in seconds
    #[builder(default = 60)]
    pub window_secs: u64,
    /// Lateness granted before the watermark passes a window
    #[builder(default = 60)]
    pub allowed_lateness_secs: u64,
    /// Cadence of the console table
    #[builder(default = 60)]
    pub console_interval_secs: u64,
    /// Trigger interval of the global KPI pipeline
    #[builder(default = 60)]
    pub global_trigger_secs: u64,
    /// Trigger interval of the per-country KPI pipeline
    #[builder(default = 60)]
    pub country_trigger_secs: u64,
    /// Capacity of each fan-out channel; a full channel blocks the ingest
    /// loop
    #[builder(default = 1024)]
    pub channel_capacity: usize,
    /// Attempts per sink batch before the pipeline gives up
    #[builder(default = 3)]
    pub sink_retry_budget: u32,
    /// Data file of the global KPI sink
    #[builder(default = PathBuf::from("time-wise-kpi/rows.json"))]
    pub global_kpi_path: PathBuf,
    /// Checkpoint of the global KPI sink
    #[builder(default = PathBuf::from("time-wise-kpi/checkpoint"))]
    pub global_kpi_checkpoint: PathBuf,
    /// Data file of the per-country KPI sink
    #[builder(default = PathBuf::from("time-country-wise-kpi/rows.json"))]
    pub country_kpi_path: PathBuf,
    /// Checkpoint of the per-country KPI sink
    #[builder(default = PathBuf::from("time-country-wise-kpi/checkpoint"))]
    pub country_kpi_checkpoint: PathBuf,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl JobConfig {
    /// Window width as event-time delta
    pub fn window_width(&self) -> TimeDelta {
        TimeDelta::seconds(self.window_secs as i64)
    }

    /// Allowed lateness as event-time delta
    pub fn allowed_lateness(&self) -> TimeDelta {
        TimeDelta::seconds(self.allowed_lateness_secs as i64)
    }

    /// Console cadence as wall-clock duration
    pub fn console_interval(&self) -> Duration {
        Duration::from_secs(self.console_interval_secs)
    }

    /// Global trigger interval as wall-clock duration
    pub fn global_trigger(&self) -> Duration {
        Duration::from_secs(self.global_trigger_secs)
    }

    /// Per-country trigger interval as wall-clock duration
    pub fn country_trigger(&self) -> Duration {
        Duration::from_secs(self.country_trigger_secs)
    }
}
