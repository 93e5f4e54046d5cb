//! Evict an unloadable pack after a grace period.
//!
//! The delay lets a quick release/re-acquire cycle keep the pack mapped.
//! The timer restarts whenever the pack becomes unloadable again, so the
//! grace period always counts from the latest release. Eligibility is
//! re-checked when the timer fires: a pack that picked up a new user or a
//! running load in the meantime is left alone.

use std::time::{Duration, Instant};

use tracing::debug;

use super::{Cx, PackLoadTask};
use crate::scheduler::{Step, Task, TaskKey, TaskKind, TaskOutput};
use crate::telemetry;

pub struct DelayedUnloadTask {
    key: TaskKey,
    delay: Duration,
    /// Deadline and the eviction epoch it was armed for.
    armed: Option<(Instant, u64)>,
}

impl DelayedUnloadTask {
    pub fn new(relative_path: impl Into<String>, delay: Duration) -> Self {
        Self {
            key: TaskKey::new(TaskKind::DelayedUnload, relative_path),
            delay,
            armed: None,
        }
    }

    pub fn key_for(relative_path: &str) -> TaskKey {
        TaskKey::new(TaskKind::DelayedUnload, relative_path)
    }
}

impl Task<super::Services> for DelayedUnloadTask {
    fn key(&self) -> &TaskKey {
        &self.key
    }

    fn poll(&mut self, cx: &mut Cx<'_>) -> Step {
        let registry = &cx.env.registry;
        let epoch = registry
            .pack_id(&self.key.name)
            .and_then(|id| registry.pack(id))
            .map_or(0, |p| p.eviction_epoch());
        let due = match self.armed {
            Some((due, armed_for)) if armed_for == epoch => due,
            previous => {
                if previous.is_some() {
                    debug!(pack = %self.key.name, "released again; grace period restarted");
                }
                let due = cx.now + self.delay;
                self.armed = Some((due, epoch));
                due
            }
        };
        if cx.now < due {
            return Step::Waiting;
        }

        if cx.is_in_flight(&PackLoadTask::key_for(&self.key.name)) {
            debug!(pack = %self.key.name, "pack is loading again; eviction skipped");
            return Step::Done(Ok(TaskOutput::Unit));
        }
        let registry = &mut cx.env.registry;
        // Looked up by path: the pack may have been evicted and re-created
        // since this task was queued.
        let Some(pack) = registry
            .pack_id(&self.key.name)
            .filter(|id| registry.is_pack_unloadable(*id))
        else {
            debug!(pack = %self.key.name, "pack back in use; eviction skipped");
            return Step::Done(Ok(TaskOutput::Unit));
        };

        if let Some(evicted) = registry.evict_pack(pack) {
            let raw = evicted.is_raw();
            if let Some(handle) = evicted.loaded {
                cx.env.loader.unload_pack(&evicted.path, handle);
            }
            telemetry::record_pack_evicted();
            debug!(pack = %evicted.path, raw, "pack evicted");
        }
        Step::Done(Ok(TaskOutput::Unit))
    }
}
