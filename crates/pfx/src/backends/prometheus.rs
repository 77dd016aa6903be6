//! # 📡 THE PROMETHEUS BACKEND
//!
//! *Previously, on pfx...*
//!
//! 🎬 COLD OPEN: INT. SERVER ROOM, 3:47 AM
//!
//! Prometheus has been scraping faithfully for fifteen days. It knows every
//! `node_cpu_seconds_total` by heart. It has never once been asked to hand
//! its memories over. Tonight, it will be asked. Repeatedly. In windows.
//!
//! 🚀 This module is the read side of the migration: it lists metric names,
//! runs range queries, and reads runtime flags off the HTTP API v1.
//!
//! 🧠 Knowledge graph:
//! - `GET /api/v1/label/__name__/values` → every metric name there is
//! - `GET /api/v1/query_range` → one of matrix / vector / scalar / string
//! - `GET /api/v1/status/flags` → where `storage.tsdb.retention*` lives
//! - Every response is wrapped in `{status, data, errorType, error, warnings}`
//! - Anything that is not one of the four known `resultType`s is a hard error.
//!   Silently dropping data is not a migration strategy.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::backends::Source;
use crate::common::{
    DataShapeError, InstantSeries, Labels, QueryResponse, QueryResult, RangeSeries, Sample, TimeWindow,
    system_time_to_millis,
};

/// 📡 Where Prometheus lives and how to knock on its door.
#[derive(Debug, Deserialize, Clone)]
pub struct PrometheusSourceConfig {
    /// 📡 Base URL, scheme and port included. `http://localhost:9090`, not `localhost`.
    pub url: String,
    /// 🔒 Basic auth, for the Prometheus behind a reverse proxy.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 If this is in plaintext in your config file, I've already filed a complaint.
    #[serde(default)]
    pub password: Option<String>,
    /// ⏱️ Upper bound for any single HTTP request. The per-window query
    /// deadline is enforced separately by the metric worker.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

// ⏱️ 60s: generous on purpose. The interesting deadline is the per-query one.
fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

/// 📦 The standard Prometheus API envelope. Every endpoint wears it.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: String,
    data: Option<T>,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

/// 🎭 `data` of a query response before we know which face it wears.
#[derive(Debug, Deserialize)]
struct RawQueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: serde_json::Value,
}

/// 🔢 `[<unix seconds as float>, "<value as string>"]`
type RawSample = (f64, String);

#[derive(Debug, Deserialize)]
struct RawRangeSeries {
    #[serde(default)]
    metric: Labels,
    #[serde(default)]
    values: Vec<RawSample>,
    #[serde(default)]
    histograms: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawInstantSeries {
    #[serde(default)]
    metric: Labels,
    #[serde(default)]
    value: Option<RawSample>,
    #[serde(default)]
    histogram: Option<serde_json::Value>,
}

/// 📡 The read side of the migration. Cheap to share: `reqwest::Client` is
/// already an `Arc` on the inside.
pub(crate) struct PrometheusSource {
    client: reqwest::Client,
    config: PrometheusSourceConfig,
}

// 🎭 manual Debug so the password never shows up in a log line
impl std::fmt::Debug for PrometheusSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusSource")
            .field("url", &self.config.url)
            .finish()
    }
}

impl PrometheusSource {
    /// 🚀 Build the HTTP client. No network traffic yet: discovery is the first
    /// call and it is fatal on failure anyway, so a ping would be redundant.
    pub(crate) fn new(config: PrometheusSourceConfig) -> Result<Self> {
        reqwest::Url::parse(&config.url).with_context(|| {
            format!(
                "💀 The Prometheus URL '{}' is not a URL. It needs a scheme, a host, and ideally a port.",
                config.url
            )
        })?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout)
            .build()
            .context("💀 The HTTP client for Prometheus refused to be born. Probably a TLS thing. It's always a TLS thing.")?;
        Ok(Self { client, config })
    }

    /// 🔧 `{base}{path}` with the trailing-slash hygiene you didn't know you needed.
    fn endpoint(&self, path: &str) -> Result<reqwest::Url> {
        let raw = format!("{}{}", self.config.url.trim_end_matches('/'), path);
        reqwest::Url::parse(&raw).with_context(|| format!("💀 Could not build endpoint URL '{raw}'"))
    }

    /// 📡 GET an API endpoint and unwrap the envelope.
    ///
    /// Returns the `data` payload and any warnings. A non-2xx status or a
    /// `status` other than `success` becomes an error carrying Prometheus' own
    /// `errorType` and `error`, which are usually more honest than we are.
    async fn get_api<T: DeserializeOwned>(
        &self,
        url: reqwest::Url,
        what: &str,
    ) -> Result<(T, Vec<String>)> {
        let mut request = self.client.get(url.clone());
        if let Some(ref username) = self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let response = request.send().await.with_context(|| {
            format!("💀 {what}: the request to {url} never made it. Is Prometheus actually up?")
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("💀 {what}: the response body from {url} evaporated mid-read"))?;

        match serde_json::from_str::<ApiEnvelope<T>>(&body) {
            Ok(envelope) if status.is_success() && envelope.status == "success" => {
                let data = envelope.data.ok_or_else(|| {
                    anyhow!("💀 {what}: Prometheus said 'success' and then sent no data. Bold.")
                })?;
                Ok((data, envelope.warnings))
            }
            Ok(envelope) => bail!(
                "💀 {what} failed with HTTP {status}: {} ({})",
                envelope.error.unwrap_or_else(|| "no error message".to_string()),
                envelope.error_type.unwrap_or_else(|| "unknown error type".to_string()),
            ),
            Err(err) if status.is_success() => Err(err).with_context(|| {
                format!("💀 {what}: HTTP {status} but the body did not look like a Prometheus API response")
            }),
            Err(_) => bail!("💀 {what} failed with HTTP {status}: {}", snippet(&body)),
        }
    }
}

#[async_trait]
impl Source for PrometheusSource {
    async fn metric_names(&self) -> Result<Vec<String>> {
        let url = self.endpoint("/api/v1/label/__name__/values")?;
        let (mut names, warnings): (Vec<String>, _) = self.get_api(url, "metric name discovery").await?;
        for warning in warnings {
            warn!("⚠️ metric name discovery: {warning}");
        }
        names.sort();
        names.dedup();
        debug!("🔍 discovered {} metric names", names.len());
        Ok(names)
    }

    async fn query_range(&self, metric: &str, window: TimeWindow) -> Result<QueryResponse> {
        let mut url = self.endpoint("/api/v1/query_range")?;
        url.query_pairs_mut()
            .append_pair("query", metric)
            .append_pair("start", &unix_seconds(window.start))
            .append_pair("end", &unix_seconds(window.end))
            .append_pair("step", &window.step.as_secs_f64().to_string());

        let (data, warnings): (RawQueryData, _) = self.get_api(url, "range query").await?;
        let result = decode_query_result(data)
            .with_context(|| format!("💀 Could not decode the range query result for '{metric}'"))?;
        Ok(QueryResponse { result, warnings })
    }

    async fn runtime_flags(&self) -> Result<HashMap<String, String>> {
        let url = self.endpoint("/api/v1/status/flags")?;
        let (flags, _warnings) = self.get_api(url, "runtime flags").await?;
        Ok(flags)
    }
}

/// 🎭 Pick the right face for `data.result` based on `resultType`.
fn decode_query_result(data: RawQueryData) -> Result<QueryResult> {
    match data.result_type.as_str() {
        "matrix" => {
            let raw: Vec<RawRangeSeries> =
                serde_json::from_value(data.result).context("💀 malformed matrix result")?;
            let mut series = Vec::with_capacity(raw.len());
            for s in raw {
                if s.histograms.is_some() {
                    bail!(DataShapeError::new(format!(
                        "series {:?} carries native histograms, which have no point representation here",
                        s.metric
                    )));
                }
                let samples = s
                    .values
                    .into_iter()
                    .map(parse_sample)
                    .collect::<Result<Vec<_>>>()?;
                series.push(RangeSeries {
                    labels: s.metric,
                    samples,
                });
            }
            Ok(QueryResult::Matrix(series))
        }
        "vector" => {
            let raw: Vec<RawInstantSeries> =
                serde_json::from_value(data.result).context("💀 malformed vector result")?;
            let mut series = Vec::with_capacity(raw.len());
            for s in raw {
                let sample = match (s.value, s.histogram) {
                    (Some(value), _) => parse_sample(value)?,
                    (None, Some(_)) => bail!(DataShapeError::new(format!(
                        "series {:?} carries a native histogram, which has no point representation here",
                        s.metric
                    ))),
                    (None, None) => bail!("💀 vector element {:?} has no value", s.metric),
                };
                series.push(InstantSeries {
                    labels: s.metric,
                    sample,
                });
            }
            Ok(QueryResult::Vector(series))
        }
        "scalar" => {
            let raw: RawSample =
                serde_json::from_value(data.result).context("💀 malformed scalar result")?;
            Ok(QueryResult::Scalar(parse_sample(raw)?))
        }
        "string" => {
            let (timestamp, value): RawSample =
                serde_json::from_value(data.result).context("💀 malformed string result")?;
            Ok(QueryResult::String {
                timestamp_ms: seconds_to_millis(timestamp),
                value,
            })
        }
        other => bail!(DataShapeError::new(format!(
            "unsupported resultType '{other}'. Refusing to guess; guessing is how data goes missing."
        ))),
    }
}

/// 🔢 `[1704067200.123, "0.5"]` → `Sample { 1704067200123, 0.5 }`.
/// `NaN`, `+Inf` and `-Inf` parse fine; what the sink does with them is the sink's problem.
fn parse_sample((timestamp, value): RawSample) -> Result<Sample> {
    let value = value
        .parse::<f64>()
        .with_context(|| format!("💀 sample value '{value}' is not a number"))?;
    Ok(Sample {
        timestamp_ms: seconds_to_millis(timestamp),
        value,
    })
}

fn seconds_to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

/// ⏱️ `SystemTime` → `"1704067200.000"`, millisecond resolution, which is
/// all Prometheus keeps anyway.
fn unix_seconds(time: std::time::SystemTime) -> String {
    let millis = system_time_to_millis(time);
    format!("{}.{:03}", millis.div_euclid(1000), millis.rem_euclid(1000))
}

/// ✂️ Error bodies can be whole HTML pages. Nobody needs all of that in a log line.
fn snippet(body: &str) -> String {
    const MAX: usize = 256;
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}
