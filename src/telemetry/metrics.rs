//! Metric recording through the `metrics` facade.
//!
//! Without an installed recorder every call is a no-op, so the library can
//! record unconditionally.

use metrics::{counter, gauge, histogram};

pub fn record_task_created(kind: &'static str) {
    counter!("respack_tasks_created_total", "kind" => kind).increment(1);
}

pub fn record_task_merged(kind: &'static str) {
    counter!("respack_tasks_merged_total", "kind" => kind).increment(1);
}

/// `status` is one of `ok`, `failed`, `faulted`, `cancelled`.
pub fn record_task_finished(kind: &'static str, status: &'static str) {
    counter!("respack_tasks_finished_total", "kind" => kind, "status" => status).increment(1);
}

pub fn record_scheduler_tick(steps: usize, in_flight: usize) {
    histogram!("respack_scheduler_steps_per_tick").record(steps as f64);
    gauge!("respack_scheduler_in_flight").set(in_flight as f64);
}

pub fn record_download_bytes(group: &str, bytes: u64) {
    counter!("respack_download_bytes_total", "group" => group.to_string()).increment(bytes);
}

pub fn record_download_retry(reason: &'static str) {
    counter!("respack_download_retries_total", "reason" => reason).increment(1);
}

pub fn record_pack_evicted() {
    counter!("respack_packs_evicted_total").increment(1);
}

pub fn record_throughput(bytes_per_second: f64) {
    gauge!("respack_download_bytes_per_second").set(bytes_per_second);
}
