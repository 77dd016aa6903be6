//! # 🚰 THE INFLUXDB BACKEND
//!
//! 🎬 COLD OPEN: INT. SERVER ROOM, 3:52 AM
//!
//! Five minutes into the migration. The InfluxDB `/write` endpoint has
//! answered `204 No Content` four thousand times in a row. It has no content
//! because it has no feelings. It simply accepts. We should all be so lucky.
//!
//! 🚀 This module is the write side: it pings once at construction (so a
//! wrong URL fails the run before a single query is issued), then POSTs line
//! protocol bodies to `/write?db=...&precision=...`.
//!
//! 🧠 Knowledge graph:
//! - Sinks are I/O only. Retries live in the batch writer; rendering lives in
//!   `composers::LineProtocolComposer`.
//! - Points are upserted on `(measurement, tags, timestamp)`, so writing an
//!   overlapping window twice is harmless.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::backends::Sink;
use crate::common::PointBatch;
use crate::composers::LineProtocolComposer;

/// 🚰 Where the points go.
#[derive(Debug, Deserialize, Clone)]
pub struct InfluxDbSinkConfig {
    /// 📡 Base URL of the InfluxDB 1.x HTTP API.
    pub url: String,
    /// 🔒 Username. The bouncer at the club. Except the club is a database.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Password. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    /// 📦 Target database. Every batch is stamped with it.
    #[serde(default = "default_database")]
    pub database: String,
    /// ⏱️ Per-request timeout for `/ping` and `/write`.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_database() -> String {
    "prometheus".to_string()
}

// ⏱️ 30s: writes of 6000 batches worth of lines can be meaty and we're not monsters.
fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

/// 📡 The sink side of the migration: pure I/O, zero buffering.
pub(crate) struct InfluxDbSink {
    client: reqwest::Client,
    config: InfluxDbSinkConfig,
    composer: LineProtocolComposer,
}

impl std::fmt::Debug for InfluxDbSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxDbSink")
            .field("url", &self.config.url)
            .field("database", &self.config.database)
            .finish()
    }
}

impl InfluxDbSink {
    /// 🚀 Build the client and ping the server.
    ///
    /// A failed ping is fatal: better to find out now than 50,000 points deep.
    pub(crate) async fn new(config: InfluxDbSinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout)
            .build()
            .context("💀 The HTTP client for InfluxDB refused to be born. The TLS stack wept.")?;
        let sink = Self {
            client,
            config,
            composer: LineProtocolComposer,
        };

        // -- 📡 "Hello? Is this thing on?" a developer, gesturing at a database.
        let ping_url = sink.endpoint("/ping")?;
        let response = sink
            .authorized(sink.client.get(ping_url.clone()))
            .send()
            .await
            .with_context(|| format!("💀 Could not reach InfluxDB at {ping_url}. We knocked. Nobody answered."))?;
        let status = response.status();
        if !status.is_success() {
            bail!("💀 InfluxDB ping at {ping_url} answered HTTP {status}. That is not a hello.");
        }
        debug!("✅ InfluxDB at {} is home", sink.config.url);
        Ok(sink)
    }

    fn endpoint(&self, path: &str) -> Result<reqwest::Url> {
        let raw = format!("{}{}", self.config.url.trim_end_matches('/'), path);
        reqwest::Url::parse(&raw).with_context(|| format!("💀 Could not build endpoint URL '{raw}'"))
    }

    /// 🔒 Basic auth when a username is configured, nothing otherwise.
    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.username {
            Some(ref username) => request.basic_auth(username, self.config.password.as_ref()),
            None => request,
        }
    }
}

#[async_trait]
impl Sink for InfluxDbSink {
    /// 📡 Render the batch and POST it to `/write`. One attempt. Retrying is
    /// the batch writer's job.
    async fn write(&self, batch: &PointBatch) -> Result<usize> {
        let payload = self.composer.compose(batch);
        if payload.skipped > 0 {
            warn!(
                "⚠️ skipped {} non-finite sample(s); line protocol has no spelling for NaN or Inf",
                payload.skipped
            );
        }
        if payload.sanitized > 0 {
            warn!(
                "⚠️ {} point(s) had a line break in a tag, written as a literal \\n instead",
                payload.sanitized
            );
        }
        if payload.is_empty() {
            debug!("🫙 nothing left to write after composing, skipping the round trip");
            return Ok(0);
        }

        let mut url = self.endpoint("/write")?;
        url.query_pairs_mut()
            .append_pair("db", &batch.database)
            .append_pair("precision", batch.precision.as_str());

        let response = self
            .authorized(self.client.post(url))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(payload.body)
            .send()
            .await
            .context("💀 The write request never made it to InfluxDB. Check connectivity, check timeouts, check your feelings.")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "💀 InfluxDB rejected a write of {} line(s) into '{}' with HTTP {}: {}",
                payload.lines,
                batch.database,
                status,
                body.trim()
            );
        }
        trace!("🚀 {} line(s) landed in '{}'", payload.lines, batch.database);
        Ok(payload.lines)
    }
}
