use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

#[cfg(test)]
use crate::backends::in_mem;
use crate::backends::prometheus::{PrometheusSource, PrometheusSourceConfig};
use crate::common::{QueryResponse, TimeWindow};

/// 🚰 A read-only source of historical samples.
///
/// Implement this trait and you too can be the origin of someone else's data problems.
///
/// # Contract 📜
/// - `&self` everywhere: one source is shared by every in-flight metric task,
///   so implementations must be safe for concurrent use.
/// - `query_range` does not enforce a deadline itself. The caller wraps it in
///   `tokio::time::timeout`; dropping the future must cancel the request.
/// - Unknown result shapes are an `Err`, never a silently empty result.
#[async_trait]
pub(crate) trait Source: std::fmt::Debug + Send + Sync {
    /// 🔍 Every distinct metric name the source knows about.
    async fn metric_names(&self) -> Result<Vec<String>>;

    /// 📡 Query `metric` over `window`.
    async fn query_range(&self, metric: &str, window: TimeWindow) -> Result<QueryResponse>;

    /// 🚩 The source's runtime flags. Only consulted for the retention horizon.
    async fn runtime_flags(&self) -> Result<HashMap<String, String>>;
}

/// 🎭 The many faces of a Source.
///
/// Dispatches via `impl Source for SourceBackend`, so the supervisor never
/// needs to know (or care) whether it's talking to a real Prometheus or a
/// scripted stand-in from the test suite.
#[derive(Debug)]
pub(crate) enum SourceBackend {
    Prometheus(PrometheusSource),
    #[cfg(test)]
    InMemory(in_mem::InMemorySource),
}

impl SourceBackend {
    /// 🔧 Resolve the backend from config.
    pub(crate) fn from_config(config: &PrometheusSourceConfig) -> Result<Self> {
        Ok(Self::Prometheus(PrometheusSource::new(config.clone())?))
    }
}

#[async_trait]
impl Source for SourceBackend {
    async fn metric_names(&self) -> Result<Vec<String>> {
        match self {
            SourceBackend::Prometheus(p) => p.metric_names().await,
            #[cfg(test)]
            SourceBackend::InMemory(i) => i.metric_names().await,
        }
    }

    async fn query_range(&self, metric: &str, window: TimeWindow) -> Result<QueryResponse> {
        match self {
            SourceBackend::Prometheus(p) => p.query_range(metric, window).await,
            #[cfg(test)]
            SourceBackend::InMemory(i) => i.query_range(metric, window).await,
        }
    }

    async fn runtime_flags(&self) -> Result<HashMap<String, String>> {
        match self {
            SourceBackend::Prometheus(p) => p.runtime_flags().await,
            #[cfg(test)]
            SourceBackend::InMemory(i) => i.runtime_flags().await,
        }
    }
}
