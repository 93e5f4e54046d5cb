//! Manifest model for resource packs.
//!
//! A manifest describes every pack of one content version: where it lives,
//! which group it belongs to, its size and content hash, and the resources it
//! carries together with their dependencies.

pub mod digest;
mod validate;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name of a manifest inside a storage root.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("packs not sorted: {current} follows {previous}")]
    Unsorted { previous: String, current: String },

    #[error("duplicate pack path: {0}")]
    DuplicatePack(String),

    #[error("raw pack {0} must contain exactly one resource")]
    RawPackShape(String),

    #[error("resource {0} declared more than once")]
    DuplicateResource(String),

    #[error("resource {resource} depends on unknown resource {dependency}")]
    UnknownDependency { resource: String, dependency: String },

    #[error("dependency cycle through {0}")]
    DependencyCycle(String),
}

impl ManifestError {
    /// True when the manifest file simply does not exist (e.g. first run).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Read { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// A single loadable item inside a pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceManifestInfo {
    pub name: String,
    pub length: u64,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// One pack entry. Identity is `(relative_path, length, hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackManifestInfo {
    pub relative_path: String,
    #[serde(default)]
    pub directory: String,
    #[serde(rename = "bundleName")]
    pub pack_name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub is_raw: bool,
    #[serde(default)]
    pub is_scene: bool,
    pub length: u64,
    pub hash: String,
    #[serde(default)]
    pub resources: Vec<ResourceManifestInfo>,
}

impl PackManifestInfo {
    /// Same path, length and hash: the cached copy is current.
    pub fn same_identity(&self, other: &PackManifestInfo) -> bool {
        self.relative_path == other.relative_path
            && self.length == other.length
            && digest::hash_eq(&self.hash, &other.hash)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceManifestInfo> {
        self.resources.iter().find(|r| r.name == name)
    }
}

impl PartialEq for PackManifestInfo {
    fn eq(&self, other: &Self) -> bool {
        self.same_identity(other)
    }
}

impl Eq for PackManifestInfo {}

/// Versioned description of every pack. Packs stay sorted by relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub game_version: String,
    pub manifest_version: u32,
    pub platform: String,
    #[serde(default)]
    pub packs: Vec<PackManifestInfo>,
}

impl Manifest {
    pub fn new(game_version: impl Into<String>, manifest_version: u32, platform: impl Into<String>) -> Self {
        Self {
            game_version: game_version.into(),
            manifest_version,
            platform: platform.into(),
            packs: Vec::new(),
        }
    }

    /// Load a manifest from a JSON file. Does not validate.
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse a manifest from a JSON string. Does not validate.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the manifest next to `path` and rename it into place.
    pub fn write_atomic(&self, path: &Path) -> Result<(), ManifestError> {
        let json = self.to_json()?;
        let write_err = |source| ManifestError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)?;
        Ok(())
    }

    /// Check ordering, uniqueness, raw-pack shape and dependency sanity.
    pub fn validate(&self) -> Result<(), ManifestError> {
        validate::validate(self)
    }

    /// Sort packs by relative path; for duplicate paths the last entry wins.
    pub fn normalize(&mut self) {
        let mut by_path: BTreeMap<String, PackManifestInfo> = BTreeMap::new();
        for pack in self.packs.drain(..) {
            by_path.insert(pack.relative_path.clone(), pack);
        }
        self.packs = by_path.into_values().collect();
    }

    pub fn find_pack(&self, relative_path: &str) -> Option<&PackManifestInfo> {
        self.packs
            .binary_search_by(|p| p.relative_path.as_str().cmp(relative_path))
            .ok()
            .map(|i| &self.packs[i])
    }

    /// Insert or replace a pack, keeping the list sorted.
    pub fn upsert_pack(&mut self, pack: PackManifestInfo) {
        match self
            .packs
            .binary_search_by(|p| p.relative_path.as_str().cmp(&pack.relative_path))
        {
            Ok(i) => self.packs[i] = pack,
            Err(i) => self.packs.insert(i, pack),
        }
    }

    pub fn remove_pack(&mut self, relative_path: &str) -> Option<PackManifestInfo> {
        self.packs
            .binary_search_by(|p| p.relative_path.as_str().cmp(relative_path))
            .ok()
            .map(|i| self.packs.remove(i))
    }

    pub fn packs_in_group<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a PackManifestInfo> {
        self.packs.iter().filter(move |p| p.group == group)
    }

    pub fn groups(&self) -> BTreeSet<&str> {
        self.packs.iter().map(|p| p.group.as_str()).collect()
    }

    pub fn total_length(&self) -> u64 {
        self.packs.iter().map(|p| p.length).sum()
    }

    /// Pack-level dependency edges: pack → packs holding its resources' dependencies.
    pub fn pack_dependencies(&self) -> BTreeMap<String, BTreeSet<String>> {
        let owner: BTreeMap<&str, &str> = self
            .packs
            .iter()
            .flat_map(|p| p.resources.iter().map(move |r| (r.name.as_str(), p.relative_path.as_str())))
            .collect();

        let mut edges = BTreeMap::new();
        for pack in &self.packs {
            let upstream: BTreeSet<String> = pack
                .resources
                .iter()
                .flat_map(|r| r.dependencies.iter())
                .filter_map(|dep| owner.get(dep.as_str()))
                .filter(|path| **path != pack.relative_path)
                .map(|path| path.to_string())
                .collect();
            edges.insert(pack.relative_path.clone(), upstream);
        }
        edges
    }
}
