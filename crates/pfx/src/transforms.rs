//! 🔄 Transforms: the Rosetta Stone between PromQL answers and Influx points 🎭
//!
//! 🎬 COLD OPEN: INT. UNITED NATIONS, SIMULTANEOUS TRANSLATION BOOTH, 2:47 AM
//!
//! Prometheus speaks in matrices, vectors, scalars and the occasional string.
//! InfluxDB speaks in measurements, tags, fields and timestamps. The translator
//! in the middle has had four coffees and one job: every sample that goes in
//! comes out as a point, and every point wears the `monitor` badge.
//!
//! ```text
//!   resultType      batches                 tags                      precision
//!   matrix    ──▶  one per series      series labels (batch) +         ns
//!                                       monitor (per point)
//!   vector    ──▶  one total           labels ∪ monitor, monitor wins   ns
//!   scalar    ──▶  one, one point      monitor only                     ns
//!   string    ──▶  one, one point      monitor only                     ms
//! ```
//!
//! ## Knowledge Graph 🧠
//! - Pure. No I/O, no state, no clocks. Same input, same batches. Every time.
//! - Unknown result shapes never get here: the Prometheus decoder rejects them,
//!   so the match below is exhaustive and the compiler keeps us honest.
//! - Used by: `supervisors::workers::metric_worker` after each successful window.

use crate::common::{FieldValue, Labels, Point, PointBatch, Precision, QueryResult};

/// 🏷️ Key of the external label stamped on every migrated point.
pub(crate) const MONITOR_LABEL_KEY: &str = "monitor";

/// 🧪 The single field name every point is written with.
pub(crate) const VALUE_FIELD: &str = "value";

/// 🔄 Turns query results into destination batches for one database.
///
/// Holds the destination database name and the external label set. Cloning is
/// cheap enough and it is shared behind an `Arc` anyway.
#[derive(Debug, Clone)]
pub(crate) struct PointConverter {
    database: String,
    external_labels: Labels,
}

impl PointConverter {
    /// 🚀 A converter writing into `database`, stamping `monitor=<monitor_label>`.
    pub(crate) fn new(database: impl Into<String>, monitor_label: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            external_labels: Labels::from([(MONITOR_LABEL_KEY.to_string(), monitor_label.into())]),
        }
    }

    #[cfg(test)]
    pub(crate) fn external_labels(&self) -> &Labels {
        &self.external_labels
    }

    /// 🎯 Convert one query result for `metric` into batches.
    ///
    /// Empty results produce no batches at all; writing an empty batch is a
    /// round trip that accomplishes nothing but latency.
    pub(crate) fn convert(&self, metric: &str, result: &QueryResult) -> Vec<PointBatch> {
        match result {
            QueryResult::Matrix(series) => series
                .iter()
                .filter(|s| !s.samples.is_empty())
                .map(|s| {
                    let mut batch = PointBatch::new(self.database.clone(), Precision::Nanosecond);
                    // -- 🏷️ series labels ride on the batch, the monitor badge rides on each point
                    batch.tags = copy_labels(&s.labels);
                    batch.points = s
                        .samples
                        .iter()
                        .map(|sample| Point {
                            measurement: metric.to_string(),
                            tags: self.external_labels.clone(),
                            timestamp_ms: sample.timestamp_ms,
                            field: FieldValue::Float(sample.value),
                        })
                        .collect();
                    batch
                })
                .collect(),
            QueryResult::Vector(series) => {
                if series.is_empty() {
                    return Vec::new();
                }
                let mut batch = PointBatch::new(self.database.clone(), Precision::Nanosecond);
                batch.points = series
                    .iter()
                    .map(|s| {
                        let mut tags = copy_labels(&s.labels);
                        // -- 🥊 external labels win the key collision. every time. no appeals.
                        for (key, value) in &self.external_labels {
                            tags.insert(key.clone(), value.clone());
                        }
                        Point {
                            measurement: metric.to_string(),
                            tags,
                            timestamp_ms: s.sample.timestamp_ms,
                            field: FieldValue::Float(s.sample.value),
                        }
                    })
                    .collect();
                vec![batch]
            }
            QueryResult::Scalar(sample) => vec![self.single_point_batch(
                metric,
                Precision::Nanosecond,
                sample.timestamp_ms,
                FieldValue::Float(sample.value),
            )],
            QueryResult::String {
                timestamp_ms,
                value,
            } => vec![self.single_point_batch(
                metric,
                Precision::Millisecond,
                *timestamp_ms,
                FieldValue::Str(value.clone()),
            )],
        }
    }

    /// 📦 One batch, one point, monitor tag only. For the unlabelled shapes.
    fn single_point_batch(
        &self,
        metric: &str,
        precision: Precision,
        timestamp_ms: i64,
        field: FieldValue,
    ) -> PointBatch {
        let mut batch = PointBatch::new(self.database.clone(), precision);
        batch.points.push(Point {
            measurement: metric.to_string(),
            tags: self.external_labels.clone(),
            timestamp_ms,
            field,
        });
        batch
    }
}

/// 🏷️ Label set to tag map, one key at a time. Boring on purpose.
fn copy_labels(labels: &Labels) -> Labels {
    let mut tags = Labels::new();
    for (name, value) in labels {
        tags.insert(name.clone(), value.clone());
    }
    tags
}
