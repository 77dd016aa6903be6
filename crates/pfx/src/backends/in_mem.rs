//! # Previously, on pfx...
//!
//! 🎬 The data was trapped. Stranded between two databases like a traveler
//! stuck in a connecting airport with no WiFi. Someone had to write a backend
//! so simple it lives entirely in RAM, gone the moment you blink.
//!
//! `in_mem` provides a scripted [`Source`] and a recording [`Sink`] for the
//! test suite. The source answers range queries with whatever the test's
//! responder closure says, and keeps a diary of every window it was asked
//! about. The sink hoards batches behind an `Arc<Mutex<...>>` so assertions
//! can peek inside, and can be told to fail on purpose.
//!
//! ⚠️ This is NOT for production. It is `cfg(test)` and it likes it that way.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;

use crate::backends::{Sink, Source};
use crate::common::{PointBatch, QueryResponse, QueryResult, TimeWindow};
use crate::composers::LineProtocolComposer;

/// 🎭 Decides what a range query returns. Gets the metric, the window, and
/// the zero-based call number for that source.
pub(crate) type Responder =
    Arc<dyn Fn(&str, &TimeWindow, usize) -> Result<QueryResult> + Send + Sync>;

/// 📦 A source that does exactly what the test tells it to.
#[derive(Clone)]
pub(crate) struct InMemorySource {
    metric_names: Vec<String>,
    flags: HashMap<String, String>,
    fail_discovery: bool,
    responder: Responder,
    latency: Duration,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    /// 📈 highest number of concurrent `query_range` calls ever observed
    pub(crate) peak_in_flight: Arc<AtomicUsize>,
    /// 📓 every `(metric, window)` ever queried, in call order
    pub(crate) queried: Arc<tokio::sync::Mutex<Vec<(String, TimeWindow)>>>,
}

impl std::fmt::Debug for InMemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 closures don't do Debug. they barely do Display.
        f.debug_struct("InMemorySource")
            .field("metric_names", &self.metric_names)
            .field("flags", &self.flags)
            .finish()
    }
}

impl InMemorySource {
    /// 🚀 A source that knows `metric_names` and answers every query with an
    /// empty matrix until told otherwise.
    pub(crate) fn new<I, S>(metric_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            metric_names: metric_names.into_iter().map(Into::into).collect(),
            flags: HashMap::new(),
            fail_discovery: false,
            responder: Arc::new(|_, _, _| Ok(QueryResult::Matrix(Vec::new()))),
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            queried: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str, &TimeWindow, usize) -> Result<QueryResult> + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    pub(crate) fn with_flag(mut self, key: &str, value: &str) -> Self {
        self.flags.insert(key.to_string(), value.to_string());
        self
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn failing_discovery(mut self) -> Self {
        self.fail_discovery = true;
        self
    }

    /// 📓 The windows queried for one metric, in order.
    pub(crate) async fn windows_for(&self, metric: &str) -> Vec<TimeWindow> {
        self.queried
            .lock()
            .await
            .iter()
            .filter(|(m, _)| m == metric)
            .map(|(_, w)| *w)
            .collect()
    }
}

#[async_trait]
impl Source for InMemorySource {
    async fn metric_names(&self) -> Result<Vec<String>> {
        if self.fail_discovery {
            bail!("💀 discovery is down, as scripted");
        }
        Ok(self.metric_names.clone())
    }

    async fn query_range(&self, metric: &str, window: TimeWindow) -> Result<QueryResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.queried.lock().await.push((metric.to_string(), window));

        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let answer = (self.responder)(metric, &window, call);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        answer.map(QueryResponse::new)
    }

    async fn runtime_flags(&self) -> Result<HashMap<String, String>> {
        Ok(self.flags.clone())
    }
}

/// 📦 A sink that never forgets. Unlike my dad, who forgot my soccer game in 1998.
///
/// Clone-able because tests need to peek inside after handing a copy off to
/// the pipeline. The `Arc`s mean everyone shares the same vault.
#[derive(Debug, Default, Clone)]
pub(crate) struct InMemorySink {
    /// 🔒 every batch that was written successfully, in write order
    pub(crate) written: Arc<tokio::sync::Mutex<Vec<PointBatch>>>,
    /// 🔢 every write call, successful or not
    pub(crate) attempts: Arc<AtomicUsize>,
    failures_remaining: Arc<AtomicUsize>,
    always_fail: bool,
}

impl InMemorySink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 💀 The first `n` write calls fail, then the sink behaves.
    pub(crate) fn failing_first(n: usize) -> Self {
        Self {
            failures_remaining: Arc::new(AtomicUsize::new(n)),
            ..Self::default()
        }
    }

    /// 💀 Every write call fails. Forever. Like my sourdough starter.
    pub(crate) fn always_failing() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }

    pub(crate) async fn batches(&self) -> Vec<PointBatch> {
        self.written.lock().await.clone()
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn write(&self, batch: &PointBatch) -> Result<usize> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(anyhow!("💀 the in-memory sink is having a day"));
        }
        let scripted_failure = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(anyhow!("💀 scripted write failure"));
        }
        // 🔒 The Mutex is load-bearing. Do not remove. I know it looks optional. It isn't.
        self.written.lock().await.push(batch.clone());
        // -- 🧮 count what InfluxDB would have kept, NaN and friends included out
        Ok(LineProtocolComposer.compose(batch).lines)
    }
}
