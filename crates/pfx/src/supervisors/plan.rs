//! 🗺️ The transfer plan: every "unset" in the config turned into a concrete answer,
//! once, before the first metric moves.
//!
//! 🧠 Knowledge graph:
//! - `end` unset → now
//! - `step` unset or zero → one minute
//! - `start` unset → now minus the source's retention (read from its runtime flags)
//! - `concurrency` zero → one

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::app_config::TransferConfig;
use crate::backends::Source;

/// 📏 Query resolution when nobody picked one.
pub(crate) const DEFAULT_STEP: Duration = Duration::from_secs(60);

/// 🚩 Where Prometheus keeps its retention, newest spelling first.
const RETENTION_FLAGS: [&str; 2] = ["storage.tsdb.retention.time", "storage.tsdb.retention"];

/// 🗺️ The resolved, no-more-Options version of the transfer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TransferPlan {
    pub start: SystemTime,
    pub end: SystemTime,
    pub step: Duration,
    pub concurrency: usize,
}

/// 🔧 Fill in the blanks. Talks to the source only when `start` is unset.
///
/// 💀 Fatal when the flags can't be fetched, the retention can't be parsed,
/// or the resolved range is empty.
pub(crate) async fn resolve_plan(
    transfer: &TransferConfig,
    source: &dyn Source,
    now: SystemTime,
) -> Result<TransferPlan> {
    let end = transfer.end.unwrap_or(now);
    let step = match transfer.step {
        Some(step) if !step.is_zero() => step,
        _ => DEFAULT_STEP,
    };
    let start = match transfer.start {
        Some(start) => start,
        None => {
            let flags = source
                .runtime_flags()
                .await
                .context("💀 Could not read the source's runtime flags to work out where history begins")?;
            let retention = retention_from_flags(&flags, transfer.default_retention)?;
            info!(
                "🗓️ no start configured, going back {} to the retention horizon",
                humantime::format_duration(retention)
            );
            now.checked_sub(retention)
                .context("💀 The retention horizon reaches back before time itself")?
        }
    };
    if start >= end {
        bail!(
            "💀 Nothing to transfer: start ({}) is not before end ({})",
            humantime::format_rfc3339_seconds(start),
            humantime::format_rfc3339_seconds(end)
        );
    }

    let plan = TransferPlan {
        start,
        end,
        step,
        concurrency: transfer.concurrency.max(1),
    };
    debug!("🗺️ resolved transfer plan: {plan:?}");
    Ok(plan)
}

/// 🗓️ The retention the source reports, or `default` when it reports none.
///
/// The first flag that is present, non-empty and non-zero wins. Prometheus
/// reports `0s` when retention is left to its own default.
pub(crate) fn retention_from_flags(
    flags: &HashMap<String, String>,
    default: Duration,
) -> Result<Duration> {
    for flag in RETENTION_FLAGS {
        let Some(raw) = flags.get(flag).map(|value| value.trim()) else {
            continue;
        };
        if raw.is_empty() {
            continue;
        }
        let retention = parse_retention(raw)
            .with_context(|| format!("💀 Could not parse the source's retention flag {flag}={raw:?}"))?;
        if !retention.is_zero() {
            return Ok(retention);
        }
    }
    Ok(default)
}

/// 🔢 Parse a retention string. Whole days (`30d`) are read as `720h`; anything
/// else goes straight to humantime.
pub(crate) fn parse_retention(raw: &str) -> Result<Duration> {
    let normalized = match raw.strip_suffix('d') {
        Some(days) if !days.is_empty() && days.bytes().all(|b| b.is_ascii_digit()) => {
            let days: u64 = days
                .parse()
                .with_context(|| format!("💀 '{days}' is too many days for anyone"))?;
            format!("{}h", days.saturating_mul(24))
        }
        _ => raw.to_string(),
    };
    humantime::parse_duration(&normalized)
        .with_context(|| format!("💀 '{raw}' is not a duration we recognize"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::in_mem::InMemorySource;

    const DAY: Duration = Duration::from_secs(86_400);

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_704_067_200)
    }

    #[tokio::test]
    async fn the_one_where_thirty_days_means_thirty_days() {
        let source = InMemorySource::new(["up"]).with_flag("storage.tsdb.retention.time", "30d");

        let plan = resolve_plan(&TransferConfig::default(), &source, now())
            .await
            .expect("plan");

        assert_eq!(plan.start, now() - 30 * DAY);
        assert_eq!(plan.end, now());
        assert_eq!(plan.step, DEFAULT_STEP);
        assert_eq!(plan.concurrency, 1);
    }

    #[tokio::test]
    async fn the_one_where_zero_seconds_means_use_the_default() {
        let source = InMemorySource::new(["up"])
            .with_flag("storage.tsdb.retention.time", "0s")
            .with_flag("storage.tsdb.retention", "0s");

        let plan = resolve_plan(&TransferConfig::default(), &source, now())
            .await
            .expect("plan");

        assert_eq!(plan.start, now() - 15 * DAY);
    }

    #[tokio::test]
    async fn the_one_where_no_flag_at_all_means_use_the_default() {
        let source = InMemorySource::new(["up"]);
        let transfer = TransferConfig {
            default_retention: 2 * DAY,
            ..TransferConfig::default()
        };

        let plan = resolve_plan(&transfer, &source, now()).await.expect("plan");

        assert_eq!(plan.start, now() - 2 * DAY);
    }

    #[tokio::test]
    async fn the_one_where_the_legacy_flag_still_gets_a_say() {
        let source = InMemorySource::new(["up"])
            .with_flag("storage.tsdb.retention.time", "0s")
            .with_flag("storage.tsdb.retention", "6h");

        let plan = resolve_plan(&TransferConfig::default(), &source, now())
            .await
            .expect("plan");

        assert_eq!(plan.start, now() - Duration::from_secs(6 * 3600));
    }

    #[tokio::test]
    async fn the_one_where_gibberish_retention_stops_the_run() {
        let source =
            InMemorySource::new(["up"]).with_flag("storage.tsdb.retention.time", "forever-ish");

        let result = resolve_plan(&TransferConfig::default(), &source, now()).await;

        let message = format!("{:#}", result.expect_err("gibberish must not parse"));
        assert!(message.contains("forever-ish"), "{message}");
    }

    #[tokio::test]
    async fn the_one_where_explicit_settings_skip_the_flags_entirely() {
        // -- 🚩 the flag would blow up if anyone read it. nobody should.
        let source = InMemorySource::new(["up"]).with_flag("storage.tsdb.retention.time", "???");
        let transfer = TransferConfig {
            start: Some(now() - DAY),
            end: Some(now()),
            step: Some(Duration::ZERO),
            concurrency: 0,
            ..TransferConfig::default()
        };

        let plan = resolve_plan(&transfer, &source, now() + DAY).await.expect("plan");

        assert_eq!(plan.start, now() - DAY);
        assert_eq!(plan.end, now());
        assert_eq!(plan.step, DEFAULT_STEP);
        assert_eq!(plan.concurrency, 1);
    }

    #[tokio::test]
    async fn the_one_where_start_after_end_is_refused() {
        let source = InMemorySource::new(["up"]);
        let transfer = TransferConfig {
            start: Some(now()),
            end: Some(now() - DAY),
            ..TransferConfig::default()
        };

        assert!(resolve_plan(&transfer, &source, now()).await.is_err());
    }

    #[test]
    fn the_one_where_retention_strings_are_read_like_prometheus_writes_them() {
        assert_eq!(parse_retention("30d").expect("30d"), 30 * DAY);
        assert_eq!(parse_retention("12h").expect("12h"), Duration::from_secs(12 * 3600));
        assert_eq!(parse_retention("2w").expect("2w"), 14 * DAY);
        assert!(parse_retention("d").is_err());
        assert!(parse_retention("").is_err());
    }
}
