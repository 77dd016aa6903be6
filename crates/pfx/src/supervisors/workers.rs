//! 🧵 Workers: the ones who actually do the work while the Supervisor takes
//! all the credit in the sprint retro.
//!
//! - [`MetricWorker`]: one metric's history, window by window
//! - [`BatchWriter`]: gets the converted batches into the sink, retrying as it goes
//!
//! ⚠️ "If you're reading this, the code review went poorly."

mod batch_writer;
mod metric_worker;

pub(crate) use batch_writer::BatchWriter;
pub(crate) use metric_worker::{MetricWorker, WorkerSettings};
