//! 📦 Common data structures: the building blocks of pfx
//!
//! ---
//!
//! 🎬 COLD OPEN: INT. DATA CENTER, 3:47 AM
//!
//! A Prometheus server has been holding fifteen days of history in its TSDB
//! like a dragon sitting on gold. Someone decided the gold belongs in InfluxDB
//! now. Nobody asked the dragon.
//!
//! This module defines the shapes that ferry samples from one side to the
//! other: what comes back from a range query ([`QueryResult`]), and what goes
//! out to the store ([`PointBatch`] full of [`Point`]s). They don't ask
//! questions. They carry the data. 🦆

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// 🏷️ A label set / tag set. `BTreeMap` so iteration order is sorted by key,
/// which is exactly what line protocol wants and what test assertions like.
pub(crate) type Labels = BTreeMap<String, String>;

/// ⏱️ One query window: `[start, end)` sampled every `step`.
///
/// Owned by exactly one metric synchronizer at a time. Never shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimeWindow {
    pub start: SystemTime,
    pub end: SystemTime,
    pub step: Duration,
}

impl TimeWindow {
    /// 📏 How wide the window is. A window whose end sits before its start is
    /// zero wide, because negative time is a physics problem, not ours.
    pub(crate) fn width(&self) -> Duration {
        self.end.duration_since(self.start).unwrap_or_default()
    }
}

/// 🔢 One `(timestamp, value)` pair. Prometheus hands out millisecond
/// timestamps, so milliseconds is what we keep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Sample {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// 📈 A labelled series with a whole range of samples (matrix element).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RangeSeries {
    pub labels: Labels,
    pub samples: Vec<Sample>,
}

/// 📍 A labelled series with exactly one sample (vector element).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InstantSeries {
    pub labels: Labels,
    pub sample: Sample,
}

/// 🎭 The four faces of a query result. Exactly one shows up per query and
/// you don't get to pick which until the response lands.
///
/// There is no catch-all variant on purpose: anything else is rejected at the
/// decoding boundary, so the converter can match exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum QueryResult {
    /// 📈 series-with-range
    Matrix(Vec<RangeSeries>),
    /// 📍 series-at-point
    Vector(Vec<InstantSeries>),
    /// 🔢 one untagged number
    Scalar(Sample),
    /// 🧵 one untagged string
    String { timestamp_ms: i64, value: String },
}

impl QueryResult {
    /// 🏷️ The Prometheus `resultType` spelling of this shape, for logs.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            QueryResult::Matrix(_) => "matrix",
            QueryResult::Vector(_) => "vector",
            QueryResult::Scalar(_) => "scalar",
            QueryResult::String { .. } => "string",
        }
    }
}

/// 📬 A successful range query: the result plus whatever warnings the source
/// felt like mentioning.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QueryResponse {
    pub result: QueryResult,
    pub warnings: Vec<String>,
}

impl QueryResponse {
    #[cfg(test)]
    pub(crate) fn new(result: QueryResult) -> Self {
        Self {
            result,
            warnings: Vec::new(),
        }
    }
}

/// 🧱 A query answered with something that can't become points: an unknown
/// `resultType`, or native histograms. Shrinking the window won't change the
/// answer, so the metric is aborted instead of retried.
#[derive(Debug, thiserror::Error)]
#[error("💀 data-shape error: {0}")]
pub(crate) struct DataShapeError(String);

impl DataShapeError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// 🔍 Is there a data-shape error anywhere in this error's chain?
    pub(crate) fn is_in(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| cause.is::<DataShapeError>())
    }
}

/// ⏲️ Timestamp precision declared on a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Precision {
    Nanosecond,
    Millisecond,
}

impl Precision {
    /// 📡 The `precision=` query parameter InfluxDB understands.
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Precision::Nanosecond => "n",
            Precision::Millisecond => "ms",
        }
    }

    /// 🔄 Scale a millisecond timestamp into this precision.
    /// Saturates instead of wrapping; year 2262 is somebody else's incident.
    pub(crate) fn scale_millis(&self, timestamp_ms: i64) -> i64 {
        match self {
            Precision::Nanosecond => timestamp_ms.saturating_mul(1_000_000),
            Precision::Millisecond => timestamp_ms,
        }
    }
}

/// 🧪 The one field every point carries.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FieldValue {
    Float(f64),
    Str(String),
}

/// 🎯 A single destination point.
///
/// `tags` are the point-level tags. When the batch carries its own tag set,
/// the point's tags win on key collision (same rule the InfluxDB client uses).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Point {
    pub measurement: String,
    pub tags: Labels,
    pub timestamp_ms: i64,
    pub field: FieldValue,
}

/// 📦 A `PointBatch`: because one point is never enough.
///
/// Grouped per originating series for matrix results, or one per result for
/// every other shape. Created by the converter, consumed by the batch writer,
/// then forgotten like last sprint's retro action items.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PointBatch {
    pub database: String,
    pub tags: Labels,
    pub precision: Precision,
    pub points: Vec<Point>,
}

impl PointBatch {
    pub(crate) fn new(database: impl Into<String>, precision: Precision) -> Self {
        Self {
            database: database.into(),
            tags: Labels::new(),
            precision,
            points: Vec::new(),
        }
    }

    /// 🏷️ The tags a point actually lands with: batch tags, overlaid by the
    /// point's own tags.
    pub(crate) fn effective_tags(&self, point: &Point) -> Labels {
        let mut tags = self.tags.clone();
        tags.extend(point.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        tags
    }
}

/// 🕰️ Milliseconds since the unix epoch, negative for the pre-1970 crowd.
pub(crate) fn system_time_to_millis(time: SystemTime) -> i64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}
