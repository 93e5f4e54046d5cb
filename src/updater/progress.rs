//! Download progress and throughput sampling.
//!
//! Byte deltas are summed into a one-second window. When a window closes the
//! rate over it becomes the current sample, so throughput is stable between
//! samples instead of jittering per chunk.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::telemetry;

pub const SAMPLE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ThroughputSampler {
    window: Duration,
    window_start: Option<Instant>,
    window_bytes: u64,
    rate: f64,
}

impl Default for ThroughputSampler {
    fn default() -> Self {
        Self::new(SAMPLE_WINDOW)
    }
}

impl ThroughputSampler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            window_bytes: 0,
            rate: 0.0,
        }
    }

    pub fn record(&mut self, bytes: u64, now: Instant) {
        self.roll(now);
        self.window_start.get_or_insert(now);
        self.window_bytes += bytes;
    }

    /// Close the window if it has run its length.
    pub fn roll(&mut self, now: Instant) {
        let Some(start) = self.window_start else {
            return;
        };
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= self.window {
            self.rate = self.window_bytes as f64 / elapsed.as_secs_f64();
            self.window_bytes = 0;
            self.window_start = Some(now);
        }
    }

    /// Bytes per second over the last closed window.
    pub fn bytes_per_second(&self) -> f64 {
        self.rate
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PackTransfer {
    group: String,
    downloaded: u64,
    total: u64,
}

#[derive(Debug, Default)]
struct GroupTransfer {
    downloaded: u64,
    sampler: ThroughputSampler,
}

/// Per-pack and per-group transfer counters.
#[derive(Debug, Default)]
pub struct TransferStats {
    packs: HashMap<String, PackTransfer>,
    groups: HashMap<String, GroupTransfer>,
    overall: ThroughputSampler,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transfer; `already` is what a partial file holds.
    pub fn begin(&mut self, relative_path: &str, group: &str, total: u64, already: u64) {
        self.packs.insert(
            relative_path.to_string(),
            PackTransfer {
                group: group.to_string(),
                downloaded: already,
                total,
            },
        );
        self.groups.entry(group.to_string()).or_default();
    }

    pub fn record(&mut self, relative_path: &str, bytes: u64, now: Instant) {
        let Some(pack) = self.packs.get_mut(relative_path) else {
            return;
        };
        pack.downloaded += bytes;
        let group = self.groups.entry(pack.group.clone()).or_default();
        group.downloaded += bytes;
        group.sampler.record(bytes, now);
        self.overall.record(bytes, now);
        telemetry::record_download_bytes(&pack.group, bytes);
    }

    /// Discarded partial data: the pack restarts from zero.
    pub fn reset(&mut self, relative_path: &str) {
        if let Some(pack) = self.packs.get_mut(relative_path) {
            pack.downloaded = 0;
        }
    }

    pub fn pack_progress(&self, relative_path: &str) -> Option<(u64, u64)> {
        self.packs
            .get(relative_path)
            .map(|p| (p.downloaded, p.total))
    }

    pub fn group_downloaded(&self, group: &str) -> u64 {
        self.groups.get(group).map_or(0, |g| g.downloaded)
    }

    pub fn group_rate(&self, group: &str) -> f64 {
        self.groups
            .get(group)
            .map_or(0.0, |g| g.sampler.bytes_per_second())
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.overall.bytes_per_second()
    }

    /// Close expired sample windows. Called once per tick.
    pub fn roll(&mut self, now: Instant) {
        for group in self.groups.values_mut() {
            group.sampler.roll(now);
        }
        self.overall.roll(now);
        telemetry::record_throughput(self.overall.bytes_per_second());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_is_published_when_window_closes() {
        let t0 = Instant::now();
        let mut sampler = ThroughputSampler::default();
        sampler.record(500, t0);
        sampler.record(500, t0 + Duration::from_millis(400));
        assert_eq!(sampler.bytes_per_second(), 0.0);

        sampler.roll(t0 + Duration::from_secs(1));
        assert!((sampler.bytes_per_second() - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn pack_progress_tracks_resume_offset() {
        let t0 = Instant::now();
        let mut stats = TransferStats::new();
        stats.begin("a.pack", "base", 100, 40);
        stats.record("a.pack", 10, t0);
        assert_eq!(stats.pack_progress("a.pack"), Some((50, 100)));
        assert_eq!(stats.group_downloaded("base"), 10);
        stats.reset("a.pack");
        assert_eq!(stats.pack_progress("a.pack"), Some((0, 100)));
    }
}
