//! Version checks and incremental group updates.
//!
//! A check fetches the read-only, read-write and remote manifests as three
//! `Request` tasks and reconciles them once all three have finished. Only a
//! failed remote fetch aborts the check. The result rebuilds the registry
//! catalog and feeds the per-group updaters.

mod check;
mod group;
mod progress;
mod storage;

pub use check::{CheckInfo, CheckReport, GroupInfo, PackState, Reconciliation};
pub use group::{GroupProgress, GroupState, UpdateCallback, UpdateReport};
pub use progress::{ThroughputSampler, TransferStats, SAMPLE_WINDOW};
pub use storage::Storage;

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use self::group::GroupUpdater;
use crate::error::RespackError;
use crate::manifest::Manifest;
use crate::registry::{Catalog, StorageLocation};
use crate::scheduler::{Pending, Priority, TaskOutcome, TaskOutput};
use crate::tasks::{EngineScheduler, RequestSource, RequestTask, Services};
use crate::telemetry;

pub type CheckCallback = Box<dyn FnOnce(Result<CheckReport, RespackError>)>;

const READ_ONLY_REQUEST: &str = "manifest:read-only";
const READ_WRITE_REQUEST: &str = "manifest:read-write";
const REMOTE_REQUEST: &str = "manifest:remote";

struct CheckRun {
    read_only: Pending,
    read_write: Pending,
    remote: Pending,
    outcomes: [Option<TaskOutcome>; 3],
    callbacks: Vec<(Option<String>, CheckCallback)>,
}

impl CheckRun {
    fn collect(&mut self) -> bool {
        for (slot, pending) in self
            .outcomes
            .iter_mut()
            .zip([&self.read_only, &self.read_write, &self.remote])
        {
            if slot.is_none() {
                *slot = pending.take();
            }
        }
        self.outcomes.iter().all(Option::is_some)
    }
}

/// Drives version checks and group updates from the engine tick.
#[derive(Default)]
pub struct Updater {
    check: Option<CheckRun>,
    last: Option<Reconciliation>,
    groups: BTreeMap<String, GroupUpdater>,
}

impl Updater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_check(&self) -> Option<&Reconciliation> {
        self.last.as_ref()
    }

    pub fn is_checking(&self) -> bool {
        self.check.is_some()
    }

    /// Start a check, or join the one in progress.
    pub fn check_version(
        &mut self,
        scheduler: &mut EngineScheduler,
        services: &Services,
        group: Option<String>,
        callback: CheckCallback,
    ) {
        if let Some(run) = &mut self.check {
            debug!(?group, "version check already running; callback merged");
            run.callbacks.push((group, callback));
            return;
        }

        let stall = services.config.download.stall_timeout;
        let request = |name: &str, source: RequestSource| {
            Box::new(RequestTask::new(name, source, stall))
        };
        let local = |location| {
            RequestSource::File(services.storage.manifest_path(location).unwrap_or_default())
        };

        info!(url = %services.layout.manifest_url(), "version check started");
        let read_only = scheduler.submit_pending(
            request(READ_ONLY_REQUEST, local(StorageLocation::ReadOnly)),
            Priority::High,
        );
        let read_write = scheduler.submit_pending(
            request(READ_WRITE_REQUEST, local(StorageLocation::ReadWrite)),
            Priority::High,
        );
        let remote = scheduler.submit_pending(
            request(REMOTE_REQUEST, RequestSource::Url(services.layout.manifest_url())),
            Priority::High,
        );
        self.check = Some(CheckRun {
            read_only,
            read_write,
            remote,
            outcomes: [None, None, None],
            callbacks: vec![(group, callback)],
        });
    }

    /// Start or join an update of `group`.
    pub fn update_group(&mut self, services: &Services, group: &str, callback: UpdateCallback) {
        let Some(check) = &self.last else {
            callback(Err(RespackError::NotChecked));
            return;
        };
        if !check.has_group(group) {
            callback(Err(RespackError::UnknownGroup(group.to_string())));
            return;
        }
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| GroupUpdater::new(group))
            .start(check, services, callback);
    }

    pub fn pause_group(&mut self, group: &str) -> Result<(), RespackError> {
        self.known_group(group)?;
        if let Some(updater) = self.groups.get_mut(group) {
            updater.pause();
        }
        Ok(())
    }

    pub fn resume_group(&mut self, group: &str) -> Result<(), RespackError> {
        self.known_group(group)?;
        if let Some(updater) = self.groups.get_mut(group) {
            updater.resume();
        }
        Ok(())
    }

    pub fn group_state(&self, group: &str) -> GroupState {
        self.groups.get(group).map_or(GroupState::Free, |g| g.state())
    }

    pub fn group_info(&self, group: &str) -> Result<GroupInfo, RespackError> {
        let check = self.last.as_ref().ok_or(RespackError::NotChecked)?;
        check
            .group_info(group)
            .ok_or_else(|| RespackError::UnknownGroup(group.to_string()))
    }

    /// Progress of the current or last run of `group`. Before any run the
    /// counts come from the last check.
    pub fn group_progress(&self, services: &Services, group: &str) -> Result<GroupProgress, RespackError> {
        self.known_group(group)?;
        if let Some(updater) = self.groups.get(group) {
            return Ok(updater.progress(services));
        }
        let info = self.group_info(group)?;
        Ok(GroupProgress {
            state: GroupState::Free,
            updated_count: 0,
            total_count: info.update_count(),
            updated_length: 0,
            total_length: info.update_length(),
            downloaded_bytes: services.transfers.group_downloaded(group),
            bytes_per_second: services.transfers.group_rate(group),
        })
    }

    fn known_group(&self, group: &str) -> Result<(), RespackError> {
        match &self.last {
            None => Err(RespackError::NotChecked),
            Some(check) if check.has_group(group) => Ok(()),
            Some(_) => Err(RespackError::UnknownGroup(group.to_string())),
        }
    }

    /// Advance the running check and every active group.
    pub fn poll(&mut self, scheduler: &mut EngineScheduler, services: &mut Services, now: Instant) {
        let finished = self.check.as_mut().is_some_and(CheckRun::collect);
        if finished {
            if let Some(run) = self.check.take() {
                self.finish_check(run, services);
            }
        }

        for updater in self.groups.values_mut() {
            updater.drive(scheduler, services);
        }

        services.transfers.roll(now);
        telemetry::record_throughput(services.transfers.bytes_per_second());
    }

    fn finish_check(&mut self, run: CheckRun, services: &mut Services) {
        let [read_only, read_write, remote] = run.outcomes;
        let result = reconcile(
            read_only.unwrap_or(Err(RespackError::Cancelled)),
            read_write.unwrap_or(Err(RespackError::Cancelled)),
            remote.unwrap_or(Err(RespackError::Cancelled)),
            services,
        );

        let reconciliation = match result {
            Ok(rec) => rec,
            Err(e) => {
                warn!(error = %e, "version check aborted");
                for (_, callback) in run.callbacks {
                    callback(Err(e.clone()));
                }
                return;
            }
        };

        let summary = reconciliation.report(None);
        info!(
            version = reconciliation.manifest_version,
            updates = summary.total_count,
            bytes = summary.total_length,
            "version check finished"
        );
        for (group, callback) in run.callbacks {
            let outcome = match &group {
                Some(g) if !reconciliation.has_group(g) => Err(RespackError::UnknownGroup(g.clone())),
                _ => Ok(reconciliation.report(group.as_deref())),
            };
            callback(outcome);
        }
        self.last = Some(reconciliation);
    }
}

fn parse(outcome: TaskOutcome, origin: StorageLocation) -> Result<Manifest, RespackError> {
    let manifest_error = |message: String| RespackError::ManifestLoad { origin, message };
    let body = match outcome? {
        TaskOutput::Body(body) => body,
        other => return Err(manifest_error(format!("unexpected request output {other:?}"))),
    };
    let mut manifest = Manifest::from_slice(&body).map_err(|e| manifest_error(e.to_string()))?;
    manifest.normalize();
    manifest.validate().map_err(|e| manifest_error(e.to_string()))?;
    Ok(manifest)
}

/// Fold the three fetch outcomes into the registry and the cache manifest.
fn reconcile(
    read_only: TaskOutcome,
    read_write: TaskOutcome,
    remote: TaskOutcome,
    services: &mut Services,
) -> Result<Reconciliation, RespackError> {
    let remote = parse(remote, StorageLocation::Remote).map_err(|e| match e {
        e @ RespackError::ManifestLoad { .. } => e,
        other => RespackError::ManifestLoad {
            origin: StorageLocation::Remote,
            message: other.to_string(),
        },
    })?;

    let tolerate = |outcome, origin| match parse(outcome, origin) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!(%origin, error = %e, "local manifest unavailable; continuing without it");
            None
        }
    };
    let read_only = tolerate(read_only, StorageLocation::ReadOnly);
    let read_write = tolerate(read_write, StorageLocation::ReadWrite);

    let storage = &mut services.storage;
    // Unflushed downloads are newer than anything on disk.
    if !storage.is_dirty() {
        storage.set_rw_manifest(read_write.unwrap_or_else(|| Manifest::new("", 0, "")));
    }
    for missing in storage.prune_missing() {
        debug!(pack = %missing, "cached pack file missing; dropping entry");
    }

    let reconciliation = Reconciliation::new(read_only.as_ref(), Some(storage.rw_manifest()), &remote);
    for stale in reconciliation.disused() {
        debug!(pack = %stale.relative_path, "pack no longer listed remotely");
        storage.forget_pack(&stale.relative_path);
    }
    storage.stamp_rw_manifest(&remote);
    if let Err(e) = storage.flush() {
        warn!(error = %e, "failed to rewrite read-write manifest after check");
    }

    let catalog = Catalog::from_locations(&remote, |pack| {
        reconciliation
            .state_of(&pack.relative_path)
            .and_then(|state| state.location())
            .unwrap_or(StorageLocation::Remote)
    });
    services.registry.set_catalog(catalog);
    services.remote_version = Some(remote.manifest_version);
    Ok(reconciliation)
}
