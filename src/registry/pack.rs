//! Runtime state of a pack.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{PackId, ResourceId};
use crate::loader::Asset;
use crate::manifest::PackManifestInfo;

/// Where the current copy of a pack lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageLocation {
    /// Shipped with the application, immutable.
    ReadOnly,
    /// Downloaded into the local cache.
    ReadWrite,
    /// Only available from the remote root.
    Remote,
}

impl std::fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ReadOnly => "read-only",
            Self::ReadWrite => "read-write",
            Self::Remote => "remote",
        };
        f.write_str(s)
    }
}

pub struct PackRuntimeInfo {
    pub(super) info: Arc<PackManifestInfo>,
    pub(super) location: StorageLocation,
    pub(super) loaded: Option<Asset>,
    pub(super) ready: bool,
    /// Every runtime info created for a resource of this pack.
    pub(super) members: BTreeSet<ResourceId>,
    /// Members with a ref count above zero.
    pub(super) in_use: BTreeSet<ResourceId>,
    /// Packs this pack depends on.
    pub(super) upstream: BTreeSet<PackId>,
    /// Packs depending on this pack.
    pub(super) downstream: BTreeSet<PackId>,
    /// Times this pack was handed out as an eviction candidate.
    pub(super) eviction_epoch: u64,
}

impl PackRuntimeInfo {
    pub(super) fn new(info: Arc<PackManifestInfo>, location: StorageLocation) -> Self {
        Self {
            info,
            location,
            loaded: None,
            ready: false,
            members: BTreeSet::new(),
            in_use: BTreeSet::new(),
            upstream: BTreeSet::new(),
            downstream: BTreeSet::new(),
            eviction_epoch: 0,
        }
    }

    pub fn info(&self) -> &Arc<PackManifestInfo> {
        &self.info
    }

    pub fn location(&self) -> StorageLocation {
        self.location
    }

    /// Loaded container handle; always `None` for raw packs.
    pub fn loaded(&self) -> Option<&Asset> {
        self.loaded.as_ref()
    }

    /// True once the pack load finished (raw packs have no handle but are ready).
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn in_use(&self) -> &BTreeSet<ResourceId> {
        &self.in_use
    }

    pub fn upstream(&self) -> &BTreeSet<PackId> {
        &self.upstream
    }

    pub fn downstream(&self) -> &BTreeSet<PackId> {
        &self.downstream
    }

    /// Bumped each time the pack becomes unloadable again; a pending
    /// eviction restarts its grace period when this moves.
    pub fn eviction_epoch(&self) -> u64 {
        self.eviction_epoch
    }

    pub fn is_unloadable(&self) -> bool {
        self.in_use.is_empty() && self.downstream.is_empty()
    }
}

/// A pack removed from the registry. The caller unloads `loaded`.
pub struct EvictedPack {
    pub path: String,
    pub info: Arc<PackManifestInfo>,
    pub loaded: Option<Asset>,
}

impl EvictedPack {
    pub fn is_raw(&self) -> bool {
        self.info.is_raw
    }
}
