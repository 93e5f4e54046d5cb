//! Name → manifest entry lookup for the active content version.

use std::collections::HashMap;
use std::sync::Arc;

use super::StorageLocation;
use crate::manifest::{Manifest, PackManifestInfo, ResourceManifestInfo};

#[derive(Debug, Clone)]
pub struct PackEntry {
    pub info: Arc<PackManifestInfo>,
    pub location: StorageLocation,
    /// Relative paths of packs this pack depends on.
    pub upstream: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResourceEntry {
    pub info: Arc<ResourceManifestInfo>,
    pub pack: String,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    packs: HashMap<String, PackEntry>,
    resources: HashMap<String, ResourceEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pack of `manifest` at the same location.
    pub fn from_manifest(manifest: &Manifest, location: StorageLocation) -> Self {
        Self::from_locations(manifest, |_| location)
    }

    /// Build from `manifest`, asking `locate` where each pack lives.
    pub fn from_locations<F>(manifest: &Manifest, mut locate: F) -> Self
    where
        F: FnMut(&PackManifestInfo) -> StorageLocation,
    {
        let mut upstream = manifest.pack_dependencies();
        let mut catalog = Self::new();
        for pack in &manifest.packs {
            let info = Arc::new(pack.clone());
            for resource in &pack.resources {
                catalog.resources.insert(
                    resource.name.clone(),
                    ResourceEntry {
                        info: Arc::new(resource.clone()),
                        pack: pack.relative_path.clone(),
                    },
                );
            }
            let deps = upstream
                .remove(&pack.relative_path)
                .map(|set| set.into_iter().collect())
                .unwrap_or_default();
            catalog.packs.insert(
                pack.relative_path.clone(),
                PackEntry {
                    location: locate(pack),
                    info,
                    upstream: deps,
                },
            );
        }
        catalog
    }

    pub fn pack(&self, relative_path: &str) -> Option<&PackEntry> {
        self.packs.get(relative_path)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceEntry> {
        self.resources.get(name)
    }

    /// Owning pack entry of a resource.
    pub fn pack_of(&self, resource: &str) -> Option<&PackEntry> {
        self.resource(resource).and_then(|r| self.pack(&r.pack))
    }

    pub fn set_location(&mut self, relative_path: &str, location: StorageLocation) -> bool {
        match self.packs.get_mut(relative_path) {
            Some(entry) => {
                entry.location = location;
                true
            }
            None => false,
        }
    }

    pub fn packs(&self) -> impl Iterator<Item = &PackEntry> {
        self.packs.values()
    }

    pub fn pack_count(&self) -> usize {
        self.packs.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }
}
