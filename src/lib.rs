//! Respack Core
//!
//! Lifecycle engine for content shipped as resource packs.
//!
//! # Components
//!
//! - **Registry**: ref-counted resources and packs; decides what may be evicted
//! - **Scheduler**: five-priority cooperative task runner with dedup/merge,
//!   partial cancellation and priority promotion
//! - **Updater**: three-way manifest reconciliation and per-group resumable,
//!   verified downloads
//!
//! # Threading
//!
//! An [`Engine`] is single-threaded. The host calls [`Engine::tick`] on a
//! fixed interval; every registry mutation and every completion callback
//! happens inside a tick or a public call. Network I/O runs on a tokio
//! runtime owned by the host and reaches the engine through channels.

pub mod cli;
pub mod config;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod net;
pub mod registry;
pub mod scheduler;
pub mod tasks;
pub mod telemetry;
pub mod updater;

pub use error::RespackError;
pub use tasks::Services;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use config::EngineConfig;
use loader::{Asset, ContentLoader};
use manifest::{Manifest, ManifestError};
use net::{RemoteLayout, Transport};
use registry::{Catalog, Registry, ResourceId, StorageLocation};
use scheduler::{Notify, Priority, Ticket, TickReport, TaskOutcome, TaskOutput};
use tasks::{DelayedUnloadTask, EngineScheduler, ResourceLoadTask};
use updater::{CheckReport, GroupInfo, GroupProgress, Storage, TransferStats, UpdateReport, Updater};

/// One reference on a loaded resource. Give it back with
/// [`Engine::release_handle`].
pub struct ResourceHandle {
    name: String,
    id: ResourceId,
    asset: Asset,
}

impl ResourceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn asset(&self) -> &Asset {
        &self.asset
    }

    /// The loaded instance as a concrete type.
    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        self.asset.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

pub type LoadResult = Result<ResourceHandle, RespackError>;

/// Channel end of [`Engine::load_resource_async`].
pub struct LoadHandle {
    name: String,
    ticket: Ticket,
    rx: oneshot::Receiver<LoadResult>,
}

impl LoadHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// `None` while the load is still running. A cancelled request yields
    /// `Err(Cancelled)`.
    pub fn try_take(&mut self) -> Option<LoadResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(RespackError::Cancelled)),
        }
    }
}

fn into_handle(name: String, outcome: TaskOutcome) -> LoadResult {
    match outcome? {
        TaskOutput::Resource { id, asset } => Ok(ResourceHandle { name, id, asset }),
        other => Err(RespackError::LoadFailed {
            name,
            message: format!("unexpected task output {other:?}"),
        }),
    }
}

/// The engine context: registry, scheduler and updater for one content root.
pub struct Engine {
    scheduler: EngineScheduler,
    services: Services,
    updater: Updater,
    /// References delivered to a [`LoadHandle`] that was already dropped.
    orphans: Rc<RefCell<Vec<ResourceId>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        loader: Box<dyn ContentLoader>,
        transport: Box<dyn Transport>,
    ) -> Self {
        let config = config.clamped();
        let layout = RemoteLayout::new(
            config.remote.url_prefix.clone(),
            config.remote.platform.clone(),
            config.remote.game_version.clone(),
        );
        let storage = Storage::new(&config.storage, config.download.manifest_flush_bytes);
        info!(
            read_only = %config.storage.read_only_dir.display(),
            read_write = %config.storage.read_write_dir.display(),
            remote = %layout.manifest_url(),
            "engine created"
        );
        Self {
            scheduler: EngineScheduler::new(config.scheduler.steps_per_tick),
            services: Services {
                registry: Registry::default(),
                loader,
                transport,
                storage,
                transfers: TransferStats::new(),
                config,
                layout,
                remote_version: None,
            },
            updater: Updater::new(),
            orphans: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Build the catalog from the local manifests. A cached pack shadows the
    /// shipped pack with the same path. Missing manifests are tolerated.
    pub fn open_local(&mut self) -> Result<usize, RespackError> {
        let storage = &mut self.services.storage;
        let read_only = match storage.manifest_path(StorageLocation::ReadOnly) {
            Some(path) => load_local(&path, StorageLocation::ReadOnly)?,
            None => None,
        };
        match storage.load_rw_manifest() {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("no read-write manifest yet"),
            Err(e) => {
                return Err(RespackError::ManifestLoad {
                    origin: StorageLocation::ReadWrite,
                    message: e.to_string(),
                })
            }
        }
        for missing in storage.prune_missing() {
            warn!(pack = %missing, "cached pack listed but missing on disk");
        }

        let cached = storage.rw_manifest();
        let mut merged = read_only.unwrap_or_else(|| Manifest::new("", 0, ""));
        for pack in &cached.packs {
            merged.upsert_pack(pack.clone());
        }
        let catalog = Catalog::from_locations(&merged, |pack| {
            if cached.find_pack(&pack.relative_path).is_some() {
                StorageLocation::ReadWrite
            } else {
                StorageLocation::ReadOnly
            }
        });
        let packs = catalog.pack_count();
        info!(packs, resources = catalog.resource_count(), "local catalog opened");
        self.services.registry.set_catalog(catalog);
        Ok(packs)
    }

    // ---- loading ------------------------------------------------------------

    /// Request `name`; `callback` fires exactly once from a later tick. On
    /// success the caller owns one reference.
    pub fn load_resource_with<F>(&mut self, name: &str, priority: Priority, callback: F) -> Ticket
    where
        F: FnOnce(LoadResult) + 'static,
    {
        let owned = name.to_string();
        let notify = Notify::External(Box::new(move |outcome| callback(into_handle(owned, outcome))));
        self.scheduler
            .submit(Box::new(ResourceLoadTask::new(name)), priority, notify)
    }

    /// Request `name` and poll the returned handle.
    pub fn load_resource_async(&mut self, name: &str, priority: Priority) -> LoadHandle {
        let (tx, rx) = oneshot::channel();
        let orphans = Rc::clone(&self.orphans);
        let ticket = self.load_resource_with(name, priority, move |result| {
            if let Err(Ok(handle)) = tx.send(result) {
                orphans.borrow_mut().push(handle.id);
            }
        });
        LoadHandle {
            name: name.to_string(),
            ticket,
            rx,
        }
    }

    /// Withdraw one request. Other requests for the same resource still
    /// complete.
    pub fn cancel(&mut self, ticket: Ticket) -> bool {
        self.scheduler.cancel(ticket)
    }

    pub fn release_handle(&mut self, handle: ResourceHandle) -> Result<u32, RespackError> {
        let result = self.services.registry.release(handle.id);
        self.settle();
        result
    }

    /// Drop one reference by name. A name that is not loaded is a no-op.
    pub fn unload(&mut self, name: &str) -> bool {
        let released = self.services.registry.unload(name);
        self.settle();
        released
    }

    // ---- updates ------------------------------------------------------------

    pub fn check_version<F>(&mut self, group: Option<&str>, callback: F)
    where
        F: FnOnce(Result<CheckReport, RespackError>) + 'static,
    {
        self.updater.check_version(
            &mut self.scheduler,
            &self.services,
            group.map(str::to_string),
            Box::new(callback),
        );
    }

    pub fn update_group<F>(&mut self, group: &str, callback: F)
    where
        F: FnOnce(Result<UpdateReport, RespackError>) + 'static,
    {
        self.updater
            .update_group(&self.services, group, Box::new(callback));
    }

    pub fn pause_group(&mut self, group: &str) -> Result<(), RespackError> {
        self.updater.pause_group(group)
    }

    pub fn resume_group(&mut self, group: &str) -> Result<(), RespackError> {
        self.updater.resume_group(group)
    }

    pub fn group_progress(&self, group: &str) -> Result<GroupProgress, RespackError> {
        self.updater.group_progress(&self.services, group)
    }

    pub fn group_info(&self, group: &str) -> Result<GroupInfo, RespackError> {
        self.updater.group_info(group)
    }

    /// `(downloaded, total)` bytes of a pack transfer.
    pub fn pack_progress(&self, relative_path: &str) -> Option<(u64, u64)> {
        self.services.transfers.pack_progress(relative_path)
    }

    /// Overall download throughput over the last one-second window.
    pub fn bytes_per_second(&self) -> f64 {
        self.services.transfers.bytes_per_second()
    }

    // ---- driving ------------------------------------------------------------

    pub fn tick(&mut self) -> TickReport {
        self.tick_at(Instant::now())
    }

    /// Run one tick with an explicit clock.
    pub fn tick_at(&mut self, now: Instant) -> TickReport {
        let report = self.scheduler.tick(&mut self.services, now);
        self.updater
            .poll(&mut self.scheduler, &mut self.services, now);
        self.settle();
        report
    }

    /// Nothing queued and no check running.
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_empty() && !self.updater.is_checking()
    }

    /// Return released instances to the loader and schedule eviction of
    /// packs nothing holds any more.
    fn settle(&mut self) {
        let orphans: Vec<ResourceId> = self.orphans.borrow_mut().drain(..).collect();
        for id in orphans {
            let _ = self.services.registry.release(id);
        }

        for (name, asset) in self.services.registry.take_unloaded() {
            self.services.loader.unload_resource(&name, asset);
        }
        let delay = self.services.config.unload_delay;
        for id in self.services.registry.take_eviction_candidates() {
            let Some(path) = self
                .services
                .registry
                .pack(id)
                .map(|p| p.info().relative_path.clone())
            else {
                continue;
            };
            self.scheduler.submit(
                Box::new(DelayedUnloadTask::new(path, delay)),
                Priority::Low,
                Notify::Detached,
            );
        }
    }

    // ---- introspection --------------------------------------------------------

    pub fn registry(&self) -> &Registry {
        &self.services.registry
    }

    pub fn scheduler(&self) -> &EngineScheduler {
        &self.scheduler
    }

    pub fn storage(&self) -> &Storage {
        &self.services.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    pub fn last_check(&self) -> Option<&updater::Reconciliation> {
        self.updater.last_check()
    }
}

fn load_local(path: &std::path::Path, origin: StorageLocation) -> Result<Option<Manifest>, RespackError> {
    let invalid = |e: ManifestError| RespackError::ManifestLoad {
        origin,
        message: e.to_string(),
    };
    match Manifest::from_file(path) {
        Ok(mut manifest) => {
            manifest.normalize();
            manifest.validate().map_err(invalid)?;
            Ok(Some(manifest))
        }
        Err(e) if e.is_not_found() => {
            warn!(path = %path.display(), %origin, "manifest missing; continuing without it");
            Ok(None)
        }
        Err(e) => Err(invalid(e)),
    }
}
