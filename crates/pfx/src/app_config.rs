//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! Three layers, later ones win:
//! 1. the TOML file, if there is one
//! 2. `PFX_*` environment variables, nested with `__` (`PFX_SINK_CONFIG__URL`)
//! 3. whatever the command line said, via [`ConfigOverrides`]

use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::Deserialize;
use serde_json::{Map, Value};
// 🚀 tracing::info, because println! in production is a cry for help.
use tracing::info;

use crate::backends::{InfluxDbSinkConfig, PrometheusSourceConfig};

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 Where the history lives today.
    pub source_config: PrometheusSourceConfig,
    /// 🚰 Where the history is moving to. No forwarding address for the old one.
    pub sink_config: InfluxDbSinkConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// 🎛️ Knobs for the transfer engine itself.
///
/// Everything here has a default. Unset `start`, `end` and `step` are resolved
/// once at run start (retention horizon, now, one minute).
#[derive(Debug, Deserialize, Clone)]
pub struct TransferConfig {
    /// 🏷️ Value of the `monitor` tag stamped onto every point.
    #[serde(default = "default_monitor_label")]
    pub monitor_label: String,
    /// ⏪ First instant to copy (`"2024-01-01T00:00:00Z"`).
    #[serde(default, with = "humantime_serde")]
    pub start: Option<SystemTime>,
    /// ⏩ Copy up to, not including, this instant.
    #[serde(default, with = "humantime_serde")]
    pub end: Option<SystemTime>,
    /// 📏 Query resolution (`"1m"`). Zero counts as unset.
    #[serde(default, with = "humantime_serde")]
    pub step: Option<Duration>,
    /// 🧵 How many metrics may be in flight at once. Zero counts as one.
    #[serde(default = "default_concurrency", alias = "c")]
    pub concurrency: usize,
    /// 🔄 Extra attempts per batch write after the first one fails.
    #[serde(default = "default_retry")]
    pub retry: usize,
    /// 🗓️ Retention assumed when the source doesn't report one.
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub default_retention: Duration,
    /// 📦 Flush once more than this many batches pile up for one metric.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    /// 💀 Query failures a single metric may rack up before we give up on it.
    #[serde(default = "default_max_query_failures")]
    pub max_query_failures: u32,
    /// ⏱️ Deadline for one range query.
    #[serde(default = "default_query_timeout", with = "humantime_serde")]
    pub query_timeout: Duration,
    /// 📊 Draw the progress bar. Turn it off for CI logs and other places without a soul.
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            monitor_label: default_monitor_label(),
            start: None,
            end: None,
            step: None,
            concurrency: default_concurrency(),
            retry: default_retry(),
            default_retention: default_retention(),
            flush_threshold: default_flush_threshold(),
            max_query_failures: default_max_query_failures(),
            query_timeout: default_query_timeout(),
            show_progress: default_show_progress(),
        }
    }
}

fn default_monitor_label() -> String {
    "codelab-monitor".to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_retry() -> usize {
    5
}

// 🗓️ Prometheus' own default retention.
fn default_retention() -> Duration {
    Duration::from_secs(15 * 24 * 60 * 60)
}

fn default_flush_threshold() -> usize {
    6000
}

fn default_max_query_failures() -> u32 {
    15
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_show_progress() -> bool {
    true
}

/// 🎯 Command-line overrides, keyed by dotted config path.
///
/// `ConfigOverrides::new().set("sink_config.url", "http://influx:8086")` lands
/// exactly where `[sink_config] url = ...` would in the TOML file, just louder.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    values: Map<String, Value>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔧 Set one dotted key. Later calls for the same key win.
    pub fn set(mut self, dotted_key: &str, value: impl Into<Value>) -> Self {
        insert_dotted(&mut self.values, dotted_key, value.into());
        self
    }

    /// 🔧 Same as [`ConfigOverrides::set`], but `None` means "the flag wasn't passed".
    pub fn set_opt<V: Into<Value>>(self, dotted_key: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.set(dotted_key, value),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn insert_dotted(map: &mut Map<String, Value>, dotted_key: &str, value: Value) {
    match dotted_key.split_once('.') {
        None => {
            map.insert(dotted_key.to_string(), value);
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(inner) = child {
                insert_dotted(inner, rest, value);
            }
        }
    }
}

/// 🚀 Load the config: from a file, from env vars, from the command line, or
/// from the sheer power of hoping.
///
/// 📐 `config_file_name = None` means env vars and overrides only. No file, no
/// assumptions. Deciding whether a default file exists is the caller's job.
///
/// 💀 Returns an error if the merged config doesn't deserialize, including
/// timestamps and durations humantime can't read.
pub fn load_config(
    config_file_name: Option<&Path>,
    overrides: ConfigOverrides,
) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = match config_file_name {
        Some(file_name) => Figment::new().merge(Toml::file(file_name)),
        None => Figment::new(),
    };
    let config = config
        .merge(Env::prefixed("PFX_").split("__"))
        .merge(Serialized::globals(Value::Object(overrides.values)));

    // 💬 A context message that actually TELLS you what went wrong.
    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}', environment variables (PFX_*) \
             and command line flags. The file exists in our hearts, maybe also on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (PFX_*) and \
                 command line flags. No file was provided, so this one's on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        // 🧪 Figment wants TOML from disk, like it's method acting.
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 The filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        file
    }

    const MINIMAL: &str = r#"
        [source_config]
        url = "http://prometheus:9090"

        [sink_config]
        url = "http://influxdb:8086"
    "#;

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let file = write_test_config(MINIMAL);

        let app_config = load_config(Some(file.path()), ConfigOverrides::new())
            .expect("💀 A minimal config should parse.");

        let transfer = &app_config.transfer;
        assert_eq!(transfer.monitor_label, "codelab-monitor");
        assert_eq!(transfer.concurrency, 1);
        assert_eq!(transfer.retry, 5);
        assert_eq!(transfer.flush_threshold, 6000);
        assert_eq!(transfer.max_query_failures, 15);
        assert_eq!(transfer.query_timeout, Duration::from_secs(10));
        assert_eq!(transfer.default_retention, Duration::from_secs(15 * 86_400));
        assert!(transfer.start.is_none() && transfer.end.is_none() && transfer.step.is_none());
        assert_eq!(app_config.sink_config.database, "prometheus");
    }

    #[test]
    fn the_one_where_humantime_reads_the_calendar() {
        let file = write_test_config(&format!(
            r#"{MINIMAL}
            [transfer]
            start = "2024-01-01T00:00:00Z"
            end = "2024-01-01T01:00:00Z"
            step = "30s"
            c = 4
            default_retention = "30d"
            "#
        ));

        let app_config = load_config(Some(file.path()), ConfigOverrides::new())
            .expect("💀 Timestamps and durations should parse.");

        let transfer = app_config.transfer;
        assert_eq!(
            transfer.start,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_704_067_200))
        );
        assert_eq!(
            transfer.end,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_704_070_800))
        );
        assert_eq!(transfer.step, Some(Duration::from_secs(30)));
        assert_eq!(transfer.concurrency, 4);
        assert_eq!(transfer.default_retention, Duration::from_secs(30 * 86_400));
    }

    #[test]
    fn the_one_where_the_command_line_has_the_last_word() {
        let file = write_test_config(&format!(
            r#"{MINIMAL}
            [transfer]
            concurrency = 2
            monitor_label = "from-the-file"
            "#
        ));
        let overrides = ConfigOverrides::new()
            .set("transfer.concurrency", 8)
            .set("sink_config.database", "history")
            .set_opt("transfer.monitor_label", None::<String>)
            .set_opt("transfer.step", Some("5m"));

        let app_config =
            load_config(Some(file.path()), overrides).expect("💀 Overrides should merge.");

        assert_eq!(app_config.transfer.concurrency, 8);
        assert_eq!(app_config.transfer.monitor_label, "from-the-file");
        assert_eq!(app_config.transfer.step, Some(Duration::from_secs(300)));
        assert_eq!(app_config.sink_config.database, "history");
        assert_eq!(app_config.sink_config.url, "http://influxdb:8086");
    }

    #[test]
    fn the_one_where_a_bad_timestamp_is_a_config_error() {
        let file = write_test_config(&format!(
            r#"{MINIMAL}
            [transfer]
            start = "the day after yesterday"
            "#
        ));

        let result = load_config(Some(file.path()), ConfigOverrides::new());

        assert!(result.is_err(), "💀 nonsense timestamps must not parse");
    }

    #[test]
    fn the_one_where_overrides_nest_and_replace() {
        let overrides = ConfigOverrides::new()
            .set("a", 1)
            .set("a.b", "nested now")
            .set("a.c", true);

        assert!(!overrides.is_empty());
        assert_eq!(
            Value::Object(overrides.values),
            serde_json::json!({ "a": { "b": "nested now", "c": true } })
        );
    }
}
