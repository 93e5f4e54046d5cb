//! Concrete tasks run by the engine's scheduler.
//!
//! Every task is polled with a [`Services`] environment: the registry, the
//! content loader, the transport, the on-disk storage and transfer counters.

mod delayed_unload;
mod download;
mod pack_load;
mod request;
mod resource_load;

pub use delayed_unload::DelayedUnloadTask;
pub use download::DownloadTask;
pub use pack_load::PackLoadTask;
pub use request::{RequestSource, RequestTask};
pub use resource_load::ResourceLoadTask;

use crate::config::EngineConfig;
use crate::loader::ContentLoader;
use crate::net::{RemoteLayout, Transport};
use crate::registry::Registry;
use crate::scheduler::{Scheduler, Task, TaskContext};
use crate::updater::{Storage, TransferStats};

/// Engine state reachable from inside a task.
pub struct Services {
    pub registry: Registry,
    pub loader: Box<dyn ContentLoader>,
    pub transport: Box<dyn Transport>,
    pub storage: Storage,
    pub transfers: TransferStats,
    pub config: EngineConfig,
    pub layout: RemoteLayout,
    /// Manifest version of the last remote manifest, used in pack URLs.
    pub remote_version: Option<u32>,
}

impl Services {
    pub fn pack_url(&self, relative_path: &str) -> Option<String> {
        self.remote_version
            .map(|version| self.layout.pack_url(version, relative_path))
    }
}

pub type EngineTask = Box<dyn Task<Services>>;
pub type EngineScheduler = Scheduler<Services>;
pub type Cx<'a> = TaskContext<'a, Services>;
