//! 📊 progress.rs: "Are we there yet?" (every migration, every time, forever)
//!
//! 🚀 Two things live here: the live progress bar over metrics, and the
//! report that gets read out loud at the end, in a table so comfy it has
//! lumbar support.
//!
//! ⚠️ Watching this progress bar will not make it go faster.
//! Neither will refreshing it. We've tried. Science says no.

use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use indicatif::{ProgressBar, ProgressStyle};

/// 🔢 Formats a number with commas for the 3 people in the audience who like readability.
/// "1000000 points" → "1,000,000 points", you're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    // -- 🧵 pre-allocate like we know what we're doing (we do, we read the book)
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ Formats a Duration into MM:SS or HH:MM:SS.
/// If it shows HH:MM:SS, you should probably call your mom. It's been a while.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📈 What one metric's transfer amounted to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MetricSummary {
    pub windows_queried: u64,
    pub query_failures: u64,
    pub flushes: u64,
    pub batches_written: u64,
    pub points_written: u64,
}

/// 💀 A metric that didn't make it, and its last words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricFailure {
    pub metric: String,
    pub error: String,
}

/// 📋 The end-of-run report. Totals across every metric, plus the casualty list.
#[derive(Debug, Default, Clone)]
pub struct TransferReport {
    pub metrics_total: usize,
    pub metrics_succeeded: usize,
    pub failures: Vec<MetricFailure>,
    pub windows_queried: u64,
    pub query_failures: u64,
    pub flushes: u64,
    pub batches_written: u64,
    pub points_written: u64,
    pub elapsed: Duration,
}

impl TransferReport {
    pub(crate) fn new(metrics_total: usize) -> Self {
        Self {
            metrics_total,
            ..Self::default()
        }
    }

    pub(crate) fn record_success(&mut self, summary: &MetricSummary) {
        self.metrics_succeeded += 1;
        self.windows_queried += summary.windows_queried;
        self.query_failures += summary.query_failures;
        self.flushes += summary.flushes;
        self.batches_written += summary.batches_written;
        self.points_written += summary.points_written;
    }

    pub(crate) fn record_failure(&mut self, failure: MetricFailure) {
        self.failures.push(failure);
    }

    /// 🚨 Did any metric fail for good?
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// 🍽️ The summary table: totals first, then one row per failed metric.
    pub fn summary_table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["transfer", "total"]);

        let rows = [
            (
                "metrics",
                format!(
                    "{} / {}",
                    format_number(self.metrics_succeeded as u64),
                    format_number(self.metrics_total as u64)
                ),
            ),
            ("windows queried", format_number(self.windows_queried)),
            ("query failures", format_number(self.query_failures)),
            ("flushes", format_number(self.flushes)),
            ("batches written", format_number(self.batches_written)),
            ("points written", format_number(self.points_written)),
            ("elapsed", format_duration(self.elapsed)),
        ];
        for (label, value) in rows {
            table.add_row(vec![
                Cell::new(label),
                Cell::new(value).set_alignment(CellAlignment::Right),
            ]);
        }
        for failure in &self.failures {
            table.add_row(vec![
                Cell::new(format!("💀 {}", failure.metric)),
                Cell::new(&failure.error),
            ]);
        }
        table
    }
}

/// 📊 The live progress bar: one tick per finished metric.
///
/// Clone-able so every metric task can tick the same bar. Hidden when the
/// config says so, in which case every call is a polite no-op.
#[derive(Clone)]
pub(crate) struct TransferProgress {
    bar: ProgressBar,
}

impl std::fmt::Debug for TransferProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("TransferProgress")
            .field("position", &self.bar.position())
            .field("length", &self.bar.length())
            .finish()
    }
}

impl TransferProgress {
    pub(crate) fn new(total_metrics: u64, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(total_metrics)
        } else {
            ProgressBar::hidden()
        };
        // -- 🎨 cyan because it's classy, blue because it's calm
        if let Ok(style) = ProgressStyle::with_template(
            "{msg}\n| [{bar:40.cyan/blue}] {pos}/{len} metrics, {elapsed_precise} elapsed",
        ) {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar }
    }

    pub(crate) fn metric_finished(&self, metric: &str, succeeded: bool) {
        self.bar.inc(1);
        let verdict = if succeeded { "✅" } else { "💀" };
        self.bar.set_message(format!("{verdict} {metric}"));
    }

    /// ✅ Mark the bar done. Ring the bell. We made it.
    pub(crate) fn finish(&self) {
        self.bar.finish();
    }

    #[cfg(test)]
    fn position(&self) -> u64 {
        self.bar.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_big_numbers_get_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn the_one_where_long_runs_grow_an_hours_column() {
        assert_eq!(format_duration(Duration::from_secs(75)), "01:15");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn the_one_where_the_report_adds_up_and_names_names() {
        let mut report = TransferReport::new(3);
        let summary = MetricSummary {
            windows_queried: 2,
            query_failures: 1,
            flushes: 1,
            batches_written: 4,
            points_written: 1_500,
        };
        report.record_success(&summary);
        report.record_success(&summary);
        report.record_failure(MetricFailure {
            metric: "broken_metric".into(),
            error: "gave up after 15 failed queries".into(),
        });

        assert_eq!(report.metrics_succeeded, 2);
        assert_eq!(report.points_written, 3_000);
        assert_eq!(report.query_failures, 2);
        assert_eq!(report.flushes, 2);
        assert!(report.has_failures());

        let rendered = report.summary_table().to_string();
        assert!(rendered.contains("2 / 3"), "{rendered}");
        assert!(rendered.contains("3,000"), "{rendered}");
        assert!(rendered.contains("broken_metric"), "{rendered}");
    }

    #[test]
    fn the_one_where_a_hidden_bar_still_counts() {
        let progress = TransferProgress::new(2, false);
        progress.metric_finished("up", true);
        progress.metric_finished("down", false);
        progress.finish();

        assert_eq!(progress.position(), 2);
    }
}
