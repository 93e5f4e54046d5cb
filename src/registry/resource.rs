//! Runtime state of a resource.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{PackId, ResourceId};
use crate::loader::Asset;
use crate::manifest::ResourceManifestInfo;

pub struct ResourceRuntimeInfo {
    pub(super) info: Arc<ResourceManifestInfo>,
    pub(super) pack: PackId,
    pub(super) asset: Option<Asset>,
    pub(super) ref_count: u32,
    /// Dependencies this resource currently holds a reference on.
    pub(super) upstream: BTreeSet<ResourceId>,
    /// Live resources holding a reference on this one.
    pub(super) downstream: BTreeSet<ResourceId>,
}

impl ResourceRuntimeInfo {
    pub(super) fn new(info: Arc<ResourceManifestInfo>, pack: PackId) -> Self {
        Self {
            info,
            pack,
            asset: None,
            ref_count: 0,
            upstream: BTreeSet::new(),
            downstream: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &Arc<ResourceManifestInfo> {
        &self.info
    }

    pub fn pack(&self) -> PackId {
        self.pack
    }

    pub fn asset(&self) -> Option<&Asset> {
        self.asset.as_ref()
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn upstream(&self) -> &BTreeSet<ResourceId> {
        &self.upstream
    }

    pub fn downstream(&self) -> &BTreeSet<ResourceId> {
        &self.downstream
    }
}
