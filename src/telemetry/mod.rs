//! Telemetry for the pack engine.
//!
//! Structured logging setup, per-task tracing spans and metric counters.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    record_download_bytes, record_download_retry, record_pack_evicted, record_scheduler_tick,
    record_task_created, record_task_finished, record_task_merged, record_throughput,
};
pub use spans::{SpanExt, TaskSpan};
