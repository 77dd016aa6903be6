//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 *[dramatic orchestral music swells]*
//! 🎬 "In a world where metrics wait in line..."
//! 🎬 "One supervisor decided how many could go at once."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor module: part middle manager, part bouncer with a clicker.
//!
//! 🧠 Knowledge graph:
//! - resolve the plan (start/end/step/concurrency) exactly once
//! - discover every metric name exactly once; failure here ends the run
//! - one task per metric, admitted through a semaphore with `concurrency` permits
//! - a metric that fails is logged and recorded, its siblings carry on
//! - dropping the run future drops the `JoinSet`, which aborts every task
//!
//! ⚠️ DO NOT MAKE THIS PUB EVER
//! 🔒 Like Fight Club, but for async tasks. First rule: you don't pub the workers.

mod plan;
mod workers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span};

use crate::app_config::TransferConfig;
use crate::backends::{SinkBackend, Source, SourceBackend};
use crate::progress::{MetricFailure, TransferProgress, TransferReport};
use crate::transforms::PointConverter;
use plan::resolve_plan;
use workers::{BatchWriter, MetricWorker, WorkerSettings};

/// 📦 The Supervisor: because even async tasks need someone hovering over them
/// asking "is it done yet?" every 5 milliseconds.
#[derive(Debug)]
pub(crate) struct Supervisor {
    source: Arc<SourceBackend>,
    sink: Arc<SinkBackend>,
    converter: Arc<PointConverter>,
    transfer: TransferConfig,
}

impl Supervisor {
    pub(crate) fn new(
        source: SourceBackend,
        sink: SinkBackend,
        converter: PointConverter,
        transfer: TransferConfig,
    ) -> Self {
        Self {
            source: Arc::new(source),
            sink: Arc::new(sink),
            converter: Arc::new(converter),
            transfer,
        }
    }

    /// 🧵 Move every metric. Returns `Ok` even when some metrics failed; the
    /// report says which ones and why.
    ///
    /// 💀 `Err` is reserved for the fatal stuff: plan resolution and discovery.
    pub(crate) async fn run(&self) -> Result<TransferReport> {
        let started = Instant::now();
        let plan = resolve_plan(&self.transfer, self.source.as_ref(), SystemTime::now()).await?;
        let metrics = self
            .source
            .metric_names()
            .await
            .context("💀 Could not discover metric names. No list, no migration.")?;
        info!(
            "🚀 transferring {} metric(s) from {} to {}, {} at a time",
            metrics.len(),
            humantime::format_rfc3339_seconds(plan.start),
            humantime::format_rfc3339_seconds(plan.end),
            plan.concurrency
        );

        let worker = MetricWorker::new(
            Arc::clone(&self.source),
            Arc::clone(&self.converter),
            BatchWriter::new(Arc::clone(&self.sink), self.transfer.retry),
            plan,
            WorkerSettings {
                flush_threshold: self.transfer.flush_threshold,
                max_query_failures: self.transfer.max_query_failures,
                query_timeout: self.transfer.query_timeout,
            },
        );
        let progress = TransferProgress::new(metrics.len() as u64, self.transfer.show_progress);
        let gate = Arc::new(Semaphore::new(plan.concurrency));
        let mut report = TransferReport::new(metrics.len());
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for metric in metrics {
            // -- 🚪 blocks right here until a slot frees up
            let permit = Arc::clone(&gate)
                .acquire_owned()
                .await
                .context("💀 The admission gate closed mid-run")?;
            let worker = worker.clone();
            let progress = progress.clone();
            let span = info_span!("metric", metric = %metric);
            let task_metric = metric.clone();
            let handle = tasks.spawn(
                async move {
                    let _permit = permit;
                    let outcome = worker.run(&task_metric).await;
                    progress.metric_finished(&task_metric, outcome.is_ok());
                    (task_metric, outcome)
                }
                .instrument(span),
            );
            names.insert(handle.id(), metric);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, (_, Ok(summary)))) => report.record_success(&summary),
                Ok((_, (metric, Err(err)))) => {
                    error!(metric = %metric, "💀 metric failed: {err:#}");
                    report.record_failure(MetricFailure {
                        metric,
                        error: format!("{err:#}"),
                    });
                }
                Err(join_error) => {
                    let metric = names
                        .remove(&join_error.id())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    error!(metric = %metric, "💀 metric task died: {join_error}");
                    report.record_failure(MetricFailure {
                        metric,
                        error: join_error.to_string(),
                    });
                }
            }
        }

        progress.finish();
        report.elapsed = started.elapsed();
        info!(
            "✅ {} of {} metric(s) transferred in {}",
            report.metrics_succeeded,
            report.metrics_total,
            humantime::format_duration(report.elapsed)
        );
        Ok(report)
    }
}
