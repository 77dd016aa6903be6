//! 🎬 *[the batch is full. the composer awaits. the sink hungers.]*
//!
//! 🎼 The Composers module: turning a [`PointBatch`] into the exact bytes the
//! InfluxDB `/write` endpoint wants to read.
//!
//! ```text
//! measurement,tag1=val1,tag2=val2 value=0.5 1704067200000000000
//! ```
//!
//! 🧠 Knowledge graph:
//! - Input: one `PointBatch` (batch tags + points + precision)
//! - Output: newline-delimited line protocol, trailing `\n`, plus bookkeeping
//! - Escaping follows the line protocol rules: measurements escape `,` and
//!   space; tag keys, tag values and field keys also escape `=`; string fields
//!   escape `\` and `"`.
//! - Tags are sorted by key (the `BTreeMap` does that for free). Empty tag
//!   values are dropped because InfluxDB refuses them outright.
//! - NaN and ±Inf have no line protocol spelling. Those points are skipped and
//!   counted so the caller can complain about it.
//! - A line break inside a tag would end the line early and sink the whole
//!   batch. `\n` and `\r` are written as the two characters `\` `n` (or `r`)
//!   instead, and the points that needed it are counted too.
//!
//! 🦆 (the duck composes... symphonies? payloads? both? the duck has no comment.)

use std::fmt::Write as _;

use crate::common::{FieldValue, PointBatch};
use crate::transforms::VALUE_FIELD;

/// 📜 A rendered request body and what went into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ComposedPayload {
    pub body: String,
    pub lines: usize,
    pub skipped: usize,
    /// 🧼 points whose tags had a line break flattened out of them
    pub sanitized: usize,
}

impl ComposedPayload {
    pub(crate) fn is_empty(&self) -> bool {
        self.lines == 0
    }
}

/// 📡 Line protocol, the one and only dialect `/write` speaks.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LineProtocolComposer;

impl LineProtocolComposer {
    /// 🎼 Render every point of `batch`, one line each.
    pub(crate) fn compose(&self, batch: &PointBatch) -> ComposedPayload {
        // 🧮 vibes-based capacity estimate: ~96 bytes per line is usually close
        let mut body = String::with_capacity(batch.points.len() * 96);
        let mut lines = 0;
        let mut skipped = 0;
        let mut sanitized = 0;

        for point in &batch.points {
            let field = match &point.field {
                FieldValue::Float(v) if !v.is_finite() => {
                    skipped += 1;
                    continue;
                }
                FieldValue::Float(v) => format!("{v}"),
                FieldValue::Str(s) => format!("\"{}\"", escape_string_field(s)),
            };

            body.push_str(&escape_measurement(&point.measurement));
            let mut flattened = false;
            for (key, value) in batch.effective_tags(point) {
                if value.is_empty() {
                    continue;
                }
                flattened |= has_line_break(&key) || has_line_break(&value);
                body.push(',');
                body.push_str(&escape_tag(&key));
                body.push('=');
                body.push_str(&escape_tag(&value));
            }
            body.push(' ');
            body.push_str(&escape_tag(VALUE_FIELD));
            body.push('=');
            body.push_str(&field);
            // -- ⏱️ writing into a String cannot fail, the fmt::Result is a formality
            let _ = write!(body, " {}", batch.precision.scale_millis(point.timestamp_ms));
            body.push('\n');
            lines += 1;
            if flattened {
                sanitized += 1;
            }
        }

        ComposedPayload {
            body,
            lines,
            skipped,
            sanitized,
        }
    }
}

/// 🔧 Measurement names: commas and spaces get a backslash.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// 🔧 Tag keys, tag values and field keys: commas, equals signs and spaces.
/// Line breaks can't be escaped at all, so they turn into a visible `\n`/`\r`.
fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

fn has_line_break(s: &str) -> bool {
    s.contains(['\n', '\r'])
}

/// 🔧 String field values: backslashes first, then quotes. Order matters.
fn escape_string_field(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
