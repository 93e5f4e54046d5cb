//! Ref counting and eviction bookkeeping.
//!
//! The registry never loads or unloads anything itself. It records state and
//! queues two kinds of follow-up work for the engine: instances to hand back
//! to the content loader, and packs that just became eviction candidates.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::arena::Arena;
use super::catalog::Catalog;
use super::pack::{EvictedPack, PackRuntimeInfo, StorageLocation};
use super::resource::ResourceRuntimeInfo;
use super::{PackId, ResourceId};
use crate::error::RespackError;
use crate::loader::Asset;

/// Single source of truth for what is loaded and what may be evicted.
#[derive(Default)]
pub struct Registry {
    catalog: Catalog,
    resources: Arena<ResourceRuntimeInfo>,
    packs: Arena<PackRuntimeInfo>,
    resource_ids: HashMap<String, ResourceId>,
    pack_ids: HashMap<String, PackId>,
    candidates: Vec<PackId>,
    unloaded: Vec<(String, Asset)>,
}

impl Registry {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            ..Self::default()
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Swap in a new catalog. Live runtime infos keep their manifest snapshot.
    pub fn set_catalog(&mut self, catalog: Catalog) {
        for pack in self.packs.values_mut() {
            if let Some(entry) = catalog.pack(&pack.info.relative_path) {
                pack.location = entry.location;
            }
        }
        self.catalog = catalog;
    }

    /// Record a new location for a pack in the catalog and its live info.
    pub fn set_location(&mut self, relative_path: &str, location: StorageLocation) {
        self.catalog.set_location(relative_path, location);
        if let Some(pack) = self
            .pack_ids
            .get(relative_path)
            .and_then(|id| self.packs.get_mut(id.0))
        {
            pack.location = location;
        }
    }

    // ---- lookup / lazy creation -------------------------------------------

    pub fn get_or_create_pack(&mut self, relative_path: &str) -> Result<PackId, RespackError> {
        if let Some(id) = self.pack_ids.get(relative_path) {
            return Ok(*id);
        }
        let entry = self
            .catalog
            .pack(relative_path)
            .ok_or_else(|| RespackError::UnknownPack(relative_path.to_string()))?;
        let info = PackRuntimeInfo::new(entry.info.clone(), entry.location);
        let id = PackId(self.packs.insert(info));
        self.pack_ids.insert(relative_path.to_string(), id);
        debug!(pack = %relative_path, "pack runtime info created");
        Ok(id)
    }

    pub fn get_or_create_resource(&mut self, name: &str) -> Result<ResourceId, RespackError> {
        if let Some(id) = self.resource_ids.get(name) {
            return Ok(*id);
        }
        let entry = self
            .catalog
            .resource(name)
            .ok_or_else(|| RespackError::UnknownResource(name.to_string()))?;
        let (info, pack_path) = (entry.info.clone(), entry.pack.clone());
        let pack = self.get_or_create_pack(&pack_path)?;
        let id = ResourceId(self.resources.insert(ResourceRuntimeInfo::new(info, pack)));
        if let Some(p) = self.packs.get_mut(pack.0) {
            p.members.insert(id);
        }
        self.resource_ids.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn resource_id(&self, name: &str) -> Option<ResourceId> {
        self.resource_ids.get(name).copied()
    }

    pub fn pack_id(&self, relative_path: &str) -> Option<PackId> {
        self.pack_ids.get(relative_path).copied()
    }

    pub fn resource(&self, id: ResourceId) -> Option<&ResourceRuntimeInfo> {
        self.resources.get(id.0)
    }

    pub fn pack(&self, id: PackId) -> Option<&PackRuntimeInfo> {
        self.packs.get(id.0)
    }

    // ---- ref counting -----------------------------------------------------

    /// Create the resource if needed and take one reference on it.
    pub fn acquire(&mut self, name: &str) -> Result<ResourceId, RespackError> {
        let id = self.get_or_create_resource(name)?;
        self.add_ref(id)?;
        Ok(id)
    }

    /// Increment the ref count. The 0→1 edge marks the resource in use in its
    /// pack and takes one reference on each dependency.
    pub fn add_ref(&mut self, id: ResourceId) -> Result<u32, RespackError> {
        let res = self
            .resources
            .get_mut(id.0)
            .ok_or_else(|| RespackError::UnknownResource(id.to_string()))?;
        res.ref_count += 1;
        let count = res.ref_count;
        if count == 1 {
            self.activate(id);
        }
        Ok(count)
    }

    fn activate(&mut self, id: ResourceId) {
        let Some(res) = self.resources.get(id.0) else {
            return;
        };
        let pack = res.pack;
        let deps = res.info.dependencies.clone();
        if let Some(p) = self.packs.get_mut(pack.0) {
            p.in_use.insert(id);
        }
        for dep in deps {
            let dep_id = match self.get_or_create_resource(&dep) {
                Ok(dep_id) => dep_id,
                Err(e) => {
                    warn!(resource = %dep, error = %e, "skipping unresolvable dependency");
                    continue;
                }
            };
            if let Some(res) = self.resources.get_mut(id.0) {
                res.upstream.insert(dep_id);
            }
            if let Some(dep_res) = self.resources.get_mut(dep_id.0) {
                dep_res.downstream.insert(id);
            }
            // Just created or already live; the id is valid.
            let _ = self.add_ref(dep_id);
        }
    }

    /// Decrement the ref count. Releasing at zero (or through a stale id) is a
    /// double release: logged, state unchanged.
    pub fn release(&mut self, id: ResourceId) -> Result<u32, RespackError> {
        let Some(res) = self.resources.get_mut(id.0) else {
            warn!(resource = %id, "release of a resource that is no longer registered");
            return Err(RespackError::DoubleRelease(id.to_string()));
        };
        if res.ref_count == 0 {
            let name = res.info.name.clone();
            warn!(resource = %name, "release with ref count already at zero");
            return Err(RespackError::DoubleRelease(name));
        }
        res.ref_count -= 1;
        let count = res.ref_count;
        if count == 0 {
            self.deactivate(id);
        }
        Ok(count)
    }

    fn deactivate(&mut self, id: ResourceId) {
        let Some(res) = self.resources.remove(id.0) else {
            return;
        };
        let name = res.info.name.clone();
        self.resource_ids.remove(&name);
        debug!(resource = %name, "resource released");
        if let Some(asset) = res.asset {
            self.unloaded.push((name, asset));
        }
        if let Some(pack) = self.packs.get_mut(res.pack.0) {
            pack.in_use.remove(&id);
            pack.members.remove(&id);
            if pack.is_unloadable() {
                self.candidates.push(res.pack);
            }
        }
        for up in res.upstream {
            if let Some(up_res) = self.resources.get_mut(up.0) {
                up_res.downstream.remove(&id);
            }
            let _ = self.release(up);
        }
    }

    /// Drop one reference by name. Unknown or never-loaded names are a no-op.
    pub fn unload(&mut self, name: &str) -> bool {
        match self.resource_ids.get(name).copied() {
            Some(id) if self.ref_count_of(id) > 0 => self.release(id).is_ok(),
            _ => false,
        }
    }

    fn ref_count_of(&self, id: ResourceId) -> u32 {
        self.resources.get(id.0).map_or(0, |r| r.ref_count)
    }

    pub fn ref_count(&self, name: &str) -> u32 {
        self.resource_ids
            .get(name)
            .map_or(0, |id| self.ref_count_of(*id))
    }

    pub fn set_asset(&mut self, id: ResourceId, asset: Asset) {
        if let Some(res) = self.resources.get_mut(id.0) {
            res.asset = Some(asset);
        }
    }

    pub fn asset(&self, id: ResourceId) -> Option<Asset> {
        self.resources.get(id.0).and_then(|r| r.asset.clone())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.resource_ids
            .get(name)
            .and_then(|id| self.resources.get(id.0))
            .is_some_and(|r| r.asset.is_some())
    }

    // ---- packs ------------------------------------------------------------

    /// Mark a pack load finished. Raw packs pass `None`.
    pub fn set_pack_loaded(&mut self, id: PackId, handle: Option<Asset>) {
        if let Some(pack) = self.packs.get_mut(id.0) {
            pack.loaded = handle;
            pack.ready = true;
        }
    }

    pub fn add_pack_dependency(&mut self, downstream: PackId, upstream: PackId) {
        if downstream == upstream || !self.packs.contains(upstream.0) {
            return;
        }
        if let Some(down) = self.packs.get_mut(downstream.0) {
            down.upstream.insert(upstream);
        } else {
            return;
        }
        if let Some(up) = self.packs.get_mut(upstream.0) {
            up.downstream.insert(downstream);
        }
    }

    pub fn remove_pack_dependency(&mut self, downstream: PackId, upstream: PackId) {
        if let Some(down) = self.packs.get_mut(downstream.0) {
            down.upstream.remove(&upstream);
        }
        if let Some(up) = self.packs.get_mut(upstream.0) {
            if up.downstream.remove(&downstream) && up.is_unloadable() {
                self.candidates.push(upstream);
            }
        }
    }

    pub fn is_pack_unloadable(&self, id: PackId) -> bool {
        self.packs.get(id.0).is_some_and(|p| p.is_unloadable())
    }

    /// Queue `id` for eviction if nothing holds it.
    pub fn request_eviction(&mut self, id: PackId) {
        if self.is_pack_unloadable(id) {
            self.candidates.push(id);
        }
    }

    /// Remove an unloadable pack, unlink it from its upstream packs and queue
    /// any upstream pack left without holders.
    pub fn evict_pack(&mut self, id: PackId) -> Option<EvictedPack> {
        if !self.is_pack_unloadable(id) {
            return None;
        }
        let pack = self.packs.remove(id.0)?;
        let path = pack.info.relative_path.clone();
        self.pack_ids.remove(&path);

        // Members here all sit at zero references.
        for member in &pack.members {
            if let Some(res) = self.resources.remove(member.0) {
                self.resource_ids.remove(&res.info.name);
            }
        }
        for up in &pack.upstream {
            if let Some(up_pack) = self.packs.get_mut(up.0) {
                up_pack.downstream.remove(&id);
                if up_pack.is_unloadable() {
                    self.candidates.push(*up);
                }
            }
        }
        debug!(pack = %path, "pack evicted");
        Some(EvictedPack {
            path,
            info: pack.info,
            loaded: pack.loaded,
        })
    }

    /// Packs that became unloadable since the last call, deduplicated.
    pub fn take_eviction_candidates(&mut self) -> Vec<PackId> {
        let mut out = std::mem::take(&mut self.candidates);
        out.sort();
        out.dedup();
        out.retain(|id| self.is_pack_unloadable(*id));
        for id in &out {
            if let Some(pack) = self.packs.get_mut(id.0) {
                pack.eviction_epoch += 1;
            }
        }
        out
    }

    /// Instances of resources that reached zero references.
    pub fn take_unloaded(&mut self) -> Vec<(String, Asset)> {
        std::mem::take(&mut self.unloaded)
    }

    pub fn pack_in_use(&self, relative_path: &str) -> Vec<String> {
        self.pack_ids
            .get(relative_path)
            .and_then(|id| self.packs.get(id.0))
            .map(|p| {
                p.in_use
                    .iter()
                    .filter_map(|r| self.resources.get(r.0))
                    .map(|r| r.info.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn pack_downstream(&self, relative_path: &str) -> Vec<String> {
        self.pack_ids
            .get(relative_path)
            .and_then(|id| self.packs.get(id.0))
            .map(|p| {
                p.downstream
                    .iter()
                    .filter_map(|d| self.packs.get(d.0))
                    .map(|d| d.info.relative_path.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn loaded_pack_count(&self) -> usize {
        self.packs.iter().filter(|(_, p)| p.ready).count()
    }

    pub fn pack_count(&self) -> usize {
        self.packs.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}
