//! 🚰 The batch writer: hands batches to the sink and tries again when the sink flinches.
//!
//! No backoff, no jitter. A failed write is re-attempted immediately, up to
//! `retry` extra times, and the first batch that exhausts its attempts stops
//! the flush cold. Batches after it are not attempted.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::backends::{Sink, SinkBackend};
use crate::common::PointBatch;

/// 📊 What one flush got done.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlushStats {
    pub batches: u64,
    pub points: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct BatchWriter {
    sink: Arc<SinkBackend>,
    retry: usize,
}

impl BatchWriter {
    pub(crate) fn new(sink: Arc<SinkBackend>, retry: usize) -> Self {
        Self { sink, retry }
    }

    /// 📡 Write every batch in order, each with up to `retry + 1` attempts.
    pub(crate) async fn flush(&self, metric: &str, batches: &[PointBatch]) -> Result<FlushStats> {
        let mut stats = FlushStats::default();
        for (index, batch) in batches.iter().enumerate() {
            let written = self.write_with_retry(batch).await.with_context(|| {
                format!(
                    "💀 Writing batch {} of {} for metric '{metric}' failed for good",
                    index + 1,
                    batches.len()
                )
            })?;
            stats.batches += 1;
            stats.points += written as u64;
        }
        debug!(
            "🚀 flushed {} batch(es), {} point(s) for '{metric}'",
            stats.batches, stats.points
        );
        Ok(stats)
    }

    /// 🔄 Returns how many points the sink says it kept.
    async fn write_with_retry(&self, batch: &PointBatch) -> Result<usize> {
        let attempts = self.retry + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sink.write(batch).await {
                Ok(written) => return Ok(written),
                Err(err) if attempt < attempts => {
                    warn!("🔄 write attempt {attempt}/{attempts} failed, going again: {err:#}");
                }
                Err(err) => {
                    return Err(err.context(format!("gave up after {attempt} attempt(s)")));
                }
            }
        }
    }
}
