use anyhow::Result;
use async_trait::async_trait;

#[cfg(test)]
use crate::backends::in_mem;
use crate::backends::influxdb::{InfluxDbSink, InfluxDbSinkConfig};
use crate::common::PointBatch;

/// 🕳️ A write-only destination for point batches. Pure I/O, zero logic.
///
/// # Contract 📜
/// - `write` sends one batch, once. No retries here; the batch writer owns those.
/// - Shared by every in-flight metric task, so `&self` and `Send + Sync`.
/// - Writes are upserts: repeating or overlapping a batch must not fail.
#[async_trait]
pub(crate) trait Sink: std::fmt::Debug + Send + Sync {
    /// 📡 Write one batch into `batch.database` at `batch.precision`.
    /// Returns how many points actually landed, which can be fewer than
    /// `batch.points.len()` when some had nothing writable in them.
    async fn write(&self, batch: &PointBatch) -> Result<usize>;
}

/// 🎭 The many faces of a Sink. Mirrors `SourceBackend` on the other end.
#[derive(Debug)]
pub(crate) enum SinkBackend {
    InfluxDb(InfluxDbSink),
    #[cfg(test)]
    InMemory(in_mem::InMemorySink),
}

impl SinkBackend {
    /// 🔧 Resolve the backend from config. Pings the destination, so this is
    /// where an unreachable InfluxDB ends the run.
    pub(crate) async fn from_config(config: &InfluxDbSinkConfig) -> Result<Self> {
        Ok(Self::InfluxDb(InfluxDbSink::new(config.clone()).await?))
    }
}

#[async_trait]
impl Sink for SinkBackend {
    async fn write(&self, batch: &PointBatch) -> Result<usize> {
        match self {
            SinkBackend::InfluxDb(sink) => sink.write(batch).await,
            #[cfg(test)]
            SinkBackend::InMemory(sink) => sink.write(batch).await,
        }
    }
}
