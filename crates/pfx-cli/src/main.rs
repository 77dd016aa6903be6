//! 🚀 pfx-cli: the front door, the bouncer, the maitre d' of pfx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that parses flags, sets up
//! logging, loads config, and then lets the real code do the heavy lifting.
//! Like a manager. 🦆
//!
//! Exit codes: 0 all good, 1 the run never got going, 2 some metrics failed,
//! 130 somebody pressed Ctrl-C.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// 🔧 Flags. Every one of them is optional and overrides the config file and env.
#[derive(Debug, Parser)]
#[command(
    name = "pfx",
    version,
    about = "Copies Prometheus history into InfluxDB, every sample tagged with its monitor"
)]
struct Cli {
    /// Config file. Defaults to `pfx.toml` in the working directory, if it exists.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log at info instead of warn. RUST_LOG beats both.
    #[arg(long, short = 'v')]
    verbose: bool,
    /// Prometheus base URL
    #[arg(long)]
    prometheus_url: Option<String>,
    /// InfluxDB base URL
    #[arg(long)]
    influxdb_url: Option<String>,
    /// InfluxDB username
    #[arg(long)]
    username: Option<String>,
    /// InfluxDB password
    #[arg(long, env = "INFLUXDB_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// InfluxDB database to write into
    #[arg(long, alias = "influxdb.database")]
    influxdb_database: Option<String>,
    /// Value of the `monitor` tag stamped on every point
    #[arg(long)]
    monitor_label: Option<String>,
    /// First instant to copy, RFC 3339 (`2024-01-01T00:00:00Z`)
    #[arg(long)]
    start: Option<String>,
    /// Copy up to this instant, RFC 3339
    #[arg(long)]
    end: Option<String>,
    /// Query resolution (`1m`, `30s`)
    #[arg(long)]
    step: Option<String>,
    /// Metrics in flight at once
    #[arg(long, short = 'c')]
    concurrency: Option<u64>,
    /// Extra attempts per batch write
    #[arg(long)]
    retry: Option<u64>,
}

impl Cli {
    fn overrides(&self) -> pfx::ConfigOverrides {
        pfx::ConfigOverrides::new()
            .set_opt("source_config.url", self.prometheus_url.clone())
            .set_opt("sink_config.url", self.influxdb_url.clone())
            .set_opt("sink_config.username", self.username.clone())
            .set_opt("sink_config.password", self.password.clone())
            .set_opt("sink_config.database", self.influxdb_database.clone())
            .set_opt("transfer.monitor_label", self.monitor_label.clone())
            .set_opt("transfer.start", self.start.clone())
            .set_opt("transfer.end", self.end.clone())
            .set_opt("transfer.step", self.step.clone())
            .set_opt("transfer.concurrency", self.concurrency)
            .set_opt("transfer.retry", self.retry)
    }

    /// 🔒 An explicit `--config` must exist. The default `pfx.toml` is allowed to be missing.
    fn config_file(&self) -> Result<Option<PathBuf>> {
        match &self.config {
            Some(path) => {
                let exists = path.try_exists().with_context(|| {
                    format!("💀 Couldn't check whether '{}' exists", path.display())
                })?;
                if !exists {
                    anyhow::bail!(
                        "💀 Configuration file '{}' does not exist. If it's a relative path, \
                         check your working directory, or use an absolute path to be absolutely certain.",
                        path.display()
                    );
                }
                Ok(Some(path.clone()))
            }
            None => {
                let default = PathBuf::from("pfx.toml");
                Ok(default.try_exists().unwrap_or(false).then_some(default))
            }
        }
    }
}

/// 🚀 main(): where it all begins. The "I pressed F5 and held my breath" moment.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // 📡 Set up tracing, because println! debugging is a lifestyle choice
    // we're trying to move past, like flip phones and cargo shorts
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let app_config = match cli
        .config_file()
        .and_then(|file| pfx::load_config(file.as_deref(), cli.overrides()))
    {
        Ok(app_config) => app_config,
        Err(err) => {
            report_fatal(&err);
            return ExitCode::from(1);
        }
    };

    // 🚀 SEND IT. No take-backs. Unless you press Ctrl-C, then it's a take-back.
    let result = tokio::select! {
        result = pfx::run(app_config) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("🛑 interrupted, dropping every in-flight metric");
            return ExitCode::from(130);
        }
    };

    match result {
        Ok(report) => {
            println!("{}", report.summary_table());
            if report.has_failures() {
                error!(
                    "💀 {} of {} metric(s) failed",
                    report.failures.len(),
                    report.metrics_total
                );
                ExitCode::from(2)
            } else {
                // ✅ Pop the champagne. 🍾
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            report_fatal(&err);
            ExitCode::from(1)
        }
    }
}

/// 🧅 Peel the onion of sadness, one tear-jerking layer at a time.
fn report_fatal(err: &anyhow::Error) {
    error!("💀 error: {}", err);
    let mut the_vibes_are_giving_connection_issues = false;
    for cause in err.chain().skip(1) {
        error!("⚠️  cause: {}", cause);
        // -- 🕵️ sniff the cause like a truffle pig hunting for connection problems
        let cause_str = cause.to_string();
        if cause_str.contains("error sending request")
            || cause_str.contains("connection refused")
            || cause_str.contains("Connection refused")
            || cause_str.contains("tcp connect error")
            || cause_str.contains("dns error")
        {
            the_vibes_are_giving_connection_issues = true;
        }
    }

    if the_vibes_are_giving_connection_issues {
        error!(
            "🔧 hint: looks like Prometheus or InfluxDB isn't reachable. \
            Double-check the URLs and that both services are actually running. \
            If you're using Docker, `docker ps` will tell you who showed up. ☕"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_clap_agrees_with_itself() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn the_one_where_the_old_dotted_flag_still_works() {
        let cli = Cli::try_parse_from([
            "pfx",
            "--influxdb.database",
            "history",
            "-c",
            "4",
            "--step",
            "30s",
        ])
        .expect("flags should parse");

        assert_eq!(cli.influxdb_database.as_deref(), Some("history"));
        assert_eq!(cli.concurrency, Some(4));
        assert!(!cli.overrides().is_empty());
    }
}
