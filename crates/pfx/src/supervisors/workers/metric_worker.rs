//! 🧵 The metric worker: walks one metric's history window by window.
//!
//! 🎬 *[a single metric stands at the edge of fifteen days of samples]*
//! *[it asks for all of it at once]*
//! *[Prometheus times out]*
//! *[it asks for half]*
//!
//! 🧠 Knowledge graph:
//! - the first window spans the whole range; every failed query halves it
//!   and retries the same cursor
//! - the window never grows back; after a success the cursor moves to the
//!   window end and the (possibly shrunken) width carries on
//! - the failure counter is per metric and never resets; at
//!   `max_query_failures` the metric is done for
//! - a zero-width window is never sent, it just costs a failure
//! - an answer that can't become points (data-shape error) ends the metric on
//!   the spot; a smaller window would only get the same answer
//! - converted batches pile up until there are more than `flush_threshold`,
//!   then get flushed; leftovers are flushed when the loop ends

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::backends::{Source, SourceBackend};
use crate::common::{DataShapeError, PointBatch, QueryResponse, TimeWindow};
use crate::progress::MetricSummary;
use crate::supervisors::plan::TransferPlan;
use crate::supervisors::workers::BatchWriter;
use crate::transforms::PointConverter;

/// 🎛️ The subset of the transfer config a worker cares about.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerSettings {
    pub flush_threshold: usize,
    pub max_query_failures: u32,
    pub query_timeout: Duration,
}

/// 🧵 Moves one metric at a time. Cheap to clone: everything heavy is behind an `Arc`.
#[derive(Debug, Clone)]
pub(crate) struct MetricWorker {
    source: Arc<SourceBackend>,
    converter: Arc<PointConverter>,
    writer: BatchWriter,
    plan: TransferPlan,
    settings: WorkerSettings,
}

impl MetricWorker {
    pub(crate) fn new(
        source: Arc<SourceBackend>,
        converter: Arc<PointConverter>,
        writer: BatchWriter,
        plan: TransferPlan,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            source,
            converter,
            writer,
            plan,
            settings,
        }
    }

    /// 🚀 Copy `[plan.start, plan.end)` of `metric` into the sink.
    ///
    /// 💀 Fails when the query failure ceiling is hit, the source answers with
    /// an unconvertible shape, or a flush runs out of retries. Whatever was flushed before that stays written.
    pub(crate) async fn run(&self, metric: &str) -> Result<MetricSummary> {
        let end = self.plan.end;
        let mut cursor = self.plan.start;
        let mut window = end.duration_since(cursor).unwrap_or_default();
        let mut failures: u32 = 0;
        let mut pending: Vec<PointBatch> = Vec::new();
        let mut summary = MetricSummary::default();

        while cursor < end {
            let attempt = TimeWindow {
                start: cursor,
                end: clipped_end(cursor, window, end),
                step: self.plan.step,
            };

            match self.query(metric, attempt, &mut summary).await {
                Ok(response) => {
                    for warning in &response.warnings {
                        warn!("⚠️ source warning for '{metric}': {warning}");
                    }
                    let batches = self.converter.convert(metric, &response.result);
                    debug!(
                        "📈 {} result turned into {} batch(es)",
                        response.result.kind(),
                        batches.len()
                    );
                    pending.extend(batches);
                    if pending.len() > self.settings.flush_threshold {
                        self.flush(metric, &mut pending, &mut summary).await?;
                    }
                    cursor = attempt.end;
                }
                Err(err) => {
                    failures += 1;
                    summary.query_failures += 1;
                    if DataShapeError::is_in(&err) {
                        return Err(err.context(format!(
                            "💀 Metric '{metric}' answered with data that can't be converted, not retrying"
                        )));
                    }
                    if failures >= self.settings.max_query_failures {
                        return Err(err.context(format!(
                            "💀 Giving up on metric '{metric}' after {failures} failed queries"
                        )));
                    }
                    window /= 2;
                    warn!(
                        "🔄 query {failures}/{} for '{metric}' failed, halving the window to {}: {err:#}",
                        self.settings.max_query_failures,
                        humantime::format_duration(window)
                    );
                }
            }
        }

        if !pending.is_empty() {
            self.flush(metric, &mut pending, &mut summary).await?;
        }
        Ok(summary)
    }

    async fn query(
        &self,
        metric: &str,
        window: TimeWindow,
        summary: &mut MetricSummary,
    ) -> Result<QueryResponse> {
        if window.width().is_zero() {
            return Err(anyhow!(
                "💀 The window for '{metric}' shrank to nothing, there is no smaller half to try"
            ));
        }
        summary.windows_queried += 1;
        tokio::time::timeout(
            self.settings.query_timeout,
            self.source.query_range(metric, window),
        )
        .await
        .map_err(|_| {
            anyhow!(
                "⏱️ Range query for '{metric}' blew through its {} deadline",
                humantime::format_duration(self.settings.query_timeout)
            )
        })?
        .with_context(|| format!("💀 Range query for '{metric}' failed"))
    }

    async fn flush(
        &self,
        metric: &str,
        pending: &mut Vec<PointBatch>,
        summary: &mut MetricSummary,
    ) -> Result<()> {
        let stats = self.writer.flush(metric, pending.as_slice()).await?;
        pending.clear();
        summary.flushes += 1;
        summary.batches_written += stats.batches;
        summary.points_written += stats.points;
        Ok(())
    }
}

/// ✂️ `cursor + window`, but never past `end` (and never overflowing on the way there).
fn clipped_end(cursor: SystemTime, window: Duration, end: SystemTime) -> SystemTime {
    match cursor.checked_add(window) {
        Some(candidate) if candidate < end => candidate,
        _ => end,
    }
}
