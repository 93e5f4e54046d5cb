//! Per-group download driver.
//!
//! A running group feeds at most `max_concurrent` downloads into the
//! scheduler at a time. Pausing only stops the feeding; transfers already
//! handed to the scheduler finish or fail on their own.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::check::Reconciliation;
use crate::error::RespackError;
use crate::manifest::PackManifestInfo;
use crate::registry::StorageLocation;
use crate::scheduler::Pending;
use crate::tasks::{DownloadTask, EngineScheduler, Services};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupState {
    #[default]
    Free,
    Running,
    Paused,
}

impl std::fmt::Display for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Free => "free",
            Self::Running => "running",
            Self::Paused => "paused",
        })
    }
}

/// Delivered when a group update completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub group: String,
    pub updated_count: usize,
    pub updated_length: u64,
    /// Packs fetched by this run, as opposed to found already current.
    pub downloaded_count: usize,
}

/// Snapshot for progress displays.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupProgress {
    pub state: GroupState,
    pub updated_count: usize,
    pub total_count: usize,
    pub updated_length: u64,
    pub total_length: u64,
    pub downloaded_bytes: u64,
    pub bytes_per_second: f64,
}

pub type UpdateCallback = Box<dyn FnOnce(Result<UpdateReport, RespackError>)>;

pub(crate) struct GroupUpdater {
    name: String,
    state: GroupState,
    queue: VecDeque<Arc<PackManifestInfo>>,
    active: Vec<(Arc<PackManifestInfo>, Pending)>,
    total_count: usize,
    total_length: u64,
    updated_count: usize,
    updated_length: u64,
    downloaded_count: usize,
    first_error: Option<RespackError>,
    callbacks: Vec<UpdateCallback>,
}

impl GroupUpdater {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: GroupState::Free,
            queue: VecDeque::new(),
            active: Vec::new(),
            total_count: 0,
            total_length: 0,
            updated_count: 0,
            updated_length: 0,
            downloaded_count: 0,
            first_error: None,
            callbacks: Vec::new(),
        }
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    /// Start a run, or merge `callback` into the one in progress.
    pub fn start(&mut self, check: &Reconciliation, services: &Services, callback: UpdateCallback) {
        self.callbacks.push(callback);
        if self.state != GroupState::Free {
            debug!(group = %self.name, "update already in progress; callback merged");
            return;
        }

        self.queue.clear();
        self.first_error = None;
        self.downloaded_count = 0;
        self.total_count = 0;
        self.total_length = 0;
        self.updated_count = 0;
        self.updated_length = 0;
        for pack in check.need_update(&self.name) {
            self.total_count += 1;
            self.total_length += pack.length;
            if is_remote(services, &pack.relative_path) {
                self.queue.push_back(Arc::clone(pack));
            } else {
                // Fetched on demand since the check.
                self.updated_count += 1;
                self.updated_length += pack.length;
            }
        }
        self.state = GroupState::Running;
        info!(
            group = %self.name,
            packs = self.queue.len(),
            bytes = self.queue.iter().map(|p| p.length).sum::<u64>(),
            "group update started"
        );
    }

    pub fn pause(&mut self) {
        if self.state == GroupState::Running {
            self.state = GroupState::Paused;
            info!(group = %self.name, queued = self.queue.len(), "group update paused");
        }
    }

    pub fn resume(&mut self) {
        if self.state == GroupState::Paused {
            self.state = GroupState::Running;
            info!(group = %self.name, queued = self.queue.len(), "group update resumed");
        }
    }

    /// Collect finished downloads, feed new ones and complete the run when
    /// nothing is left.
    pub fn drive(&mut self, scheduler: &mut EngineScheduler, services: &mut Services) {
        if self.state == GroupState::Free {
            return;
        }

        let mut still_active = Vec::with_capacity(self.active.len());
        for (pack, pending) in self.active.drain(..) {
            match pending.take() {
                None => still_active.push((pack, pending)),
                Some(Ok(_)) => {
                    self.updated_count += 1;
                    self.updated_length += pack.length;
                    self.downloaded_count += 1;
                }
                Some(Err(e)) => {
                    warn!(group = %self.name, pack = %pack.relative_path, error = %e, "pack update failed");
                    self.first_error.get_or_insert(e);
                }
            }
        }
        self.active = still_active;

        if self.state == GroupState::Running {
            let limit = services.config.download.max_concurrent.max(1);
            while self.active.len() < limit {
                let Some(pack) = self.queue.pop_front() else {
                    break;
                };
                if !is_remote(services, &pack.relative_path) {
                    self.updated_count += 1;
                    self.updated_length += pack.length;
                    continue;
                }
                let Some(url) = services.pack_url(&pack.relative_path) else {
                    self.first_error.get_or_insert(RespackError::NotChecked);
                    continue;
                };
                let task = DownloadTask::new(Arc::clone(&pack), url, &services.config.download);
                let pending = scheduler.submit_pending(Box::new(task), services.config.download.priority);
                self.active.push((pack, pending));
            }
        }

        if self.state == GroupState::Running && self.queue.is_empty() && self.active.is_empty() {
            self.complete(services);
        }
    }

    fn complete(&mut self, services: &mut Services) {
        self.state = GroupState::Free;
        if let Err(e) = services.storage.flush() {
            warn!(group = %self.name, error = %e, "failed to flush read-write manifest");
            self.first_error.get_or_insert(e);
        }

        let outcome = match self.first_error.take() {
            Some(e) => Err(e),
            None => Ok(UpdateReport {
                group: self.name.clone(),
                updated_count: self.updated_count,
                updated_length: self.updated_length,
                downloaded_count: self.downloaded_count,
            }),
        };
        match &outcome {
            Ok(report) => info!(
                group = %self.name,
                updated = report.updated_count,
                downloaded = report.downloaded_count,
                "group update finished"
            ),
            Err(e) => warn!(group = %self.name, error = %e, "group update finished with errors"),
        }
        for callback in self.callbacks.drain(..) {
            callback(outcome.clone());
        }
    }

    pub fn progress(&self, services: &Services) -> GroupProgress {
        GroupProgress {
            state: self.state,
            updated_count: self.updated_count,
            total_count: self.total_count,
            updated_length: self.updated_length,
            total_length: self.total_length,
            downloaded_bytes: services.transfers.group_downloaded(&self.name),
            bytes_per_second: services.transfers.group_rate(&self.name),
        }
    }
}

fn is_remote(services: &Services, relative_path: &str) -> bool {
    services
        .registry
        .catalog()
        .pack(relative_path)
        .is_some_and(|entry| entry.location == StorageLocation::Remote)
}
