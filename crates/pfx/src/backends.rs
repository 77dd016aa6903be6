//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 The source pours the history, the sink slurps it up. In between, we
//! convert (kidding, in between is the whole rest of the crate).
//!
//! 🎭 Pattern: trait → concrete impls → backend enum → `from_config` resolver.
//! - `Source`: [`prometheus::PrometheusSource`]
//! - `Sink`: [`influxdb::InfluxDbSink`]
//! - `in_mem`: scripted stand-ins for both, compiled for tests only
//!
//! 🦆 The duck is here because every file must have one. This is law.

mod sink;
mod source;

pub(crate) mod influxdb;
pub(crate) mod prometheus;

#[cfg(test)]
pub(crate) mod in_mem;

pub(crate) use sink::{Sink, SinkBackend};
pub(crate) use source::{Source, SourceBackend};

pub use influxdb::InfluxDbSinkConfig;
pub use prometheus::PrometheusSourceConfig;
