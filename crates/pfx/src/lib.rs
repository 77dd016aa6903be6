//! 🚚 pfx: moves Prometheus history into InfluxDB, one window at a time.
//!
//! 🧠 Knowledge graph:
//! - `app_config`: figment-layered config (TOML, `PFX_*` env, CLI overrides)
//! - `backends`: Prometheus source, InfluxDB sink, their traits
//! - `transforms`: query results → point batches
//! - `composers`: point batches → line protocol
//! - `supervisors`: the transfer engine (plan, workers, batch writer)
//! - `progress`: progress bar and the end-of-run report

pub mod app_config;
mod backends;
mod common;
mod composers;
pub mod progress;
mod supervisors;
mod transforms;

use anyhow::{Context, Result};

pub use app_config::{AppConfig, ConfigOverrides, TransferConfig, load_config};
pub use backends::{InfluxDbSinkConfig, PrometheusSourceConfig};
pub use progress::{MetricFailure, TransferReport};

use crate::backends::{SinkBackend, SourceBackend};
use crate::supervisors::Supervisor;
use crate::transforms::PointConverter;

/// 🚀 Run one full transfer.
///
/// 💀 `Err` means the run never really started (bad client config, InfluxDB
/// unreachable, discovery or retention lookup failed). Metrics that fail
/// mid-run show up in the report instead.
pub async fn run(app_config: AppConfig) -> Result<TransferReport> {
    let source = SourceBackend::from_config(&app_config.source_config)
        .context("💀 Could not set up the Prometheus source")?;
    let sink = SinkBackend::from_config(&app_config.sink_config)
        .await
        .context("💀 Could not set up the InfluxDB sink")?;
    let converter = PointConverter::new(
        app_config.sink_config.database.clone(),
        app_config.transfer.monitor_label.clone(),
    );

    Supervisor::new(source, sink, converter, app_config.transfer)
        .run()
        .await
}
