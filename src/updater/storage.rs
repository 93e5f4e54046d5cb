//! On-disk layout of the read-only and read-write roots.
//!
//! Both roots hold `manifest.json` plus pack files at their relative paths.
//! Downloads land in `<rw>/<relativePath>.part` and are renamed into place.
//! The read-write manifest is kept in memory and rewritten at most once per
//! `flush_threshold` downloaded bytes, or when a group update completes.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::error::RespackError;
use crate::manifest::{Manifest, ManifestError, PackManifestInfo, MANIFEST_FILE_NAME};
use crate::registry::StorageLocation;

const PARTIAL_SUFFIX: &str = ".part";

pub struct Storage {
    read_only: PathBuf,
    read_write: PathBuf,
    rw_manifest: Manifest,
    flush_threshold: u64,
    unflushed_bytes: u64,
    dirty: bool,
}

impl Storage {
    pub fn new(config: &StorageConfig, flush_threshold: u64) -> Self {
        Self {
            read_only: config.read_only_dir.clone(),
            read_write: config.read_write_dir.clone(),
            rw_manifest: Manifest::new("", 0, ""),
            flush_threshold,
            unflushed_bytes: 0,
            dirty: false,
        }
    }

    pub fn read_only_root(&self) -> &Path {
        &self.read_only
    }

    pub fn read_write_root(&self) -> &Path {
        &self.read_write
    }

    /// Manifest file of a local root. `Remote` has none.
    pub fn manifest_path(&self, location: StorageLocation) -> Option<PathBuf> {
        match location {
            StorageLocation::ReadOnly => Some(self.read_only.join(MANIFEST_FILE_NAME)),
            StorageLocation::ReadWrite => Some(self.read_write.join(MANIFEST_FILE_NAME)),
            StorageLocation::Remote => None,
        }
    }

    /// Local file of a pack. `Remote` packs have none until downloaded.
    pub fn pack_path(&self, location: StorageLocation, relative_path: &str) -> Option<PathBuf> {
        match location {
            StorageLocation::ReadOnly => Some(self.read_only.join(relative_path)),
            StorageLocation::ReadWrite => Some(self.read_write.join(relative_path)),
            StorageLocation::Remote => None,
        }
    }

    pub fn cached_path(&self, relative_path: &str) -> PathBuf {
        self.read_write.join(relative_path)
    }

    pub fn partial_path(&self, relative_path: &str) -> PathBuf {
        self.read_write
            .join(format!("{relative_path}{PARTIAL_SUFFIX}"))
    }

    pub fn rw_manifest(&self) -> &Manifest {
        &self.rw_manifest
    }

    pub fn set_rw_manifest(&mut self, manifest: Manifest) {
        self.rw_manifest = manifest;
    }

    /// Load the read-write manifest from disk, if present.
    pub fn load_rw_manifest(&mut self) -> Result<(), ManifestError> {
        let path = self.read_write.join(MANIFEST_FILE_NAME);
        let mut manifest = Manifest::from_file(&path)?;
        manifest.normalize();
        self.rw_manifest = manifest;
        Ok(())
    }

    /// Adopt the remote header so the cache manifest names the version it
    /// belongs to.
    pub fn stamp_rw_manifest(&mut self, remote: &Manifest) {
        if self.rw_manifest.game_version != remote.game_version
            || self.rw_manifest.manifest_version != remote.manifest_version
            || self.rw_manifest.platform != remote.platform
        {
            self.rw_manifest.game_version = remote.game_version.clone();
            self.rw_manifest.manifest_version = remote.manifest_version;
            self.rw_manifest.platform = remote.platform.clone();
            self.dirty = true;
        }
    }

    /// Record a verified download. Flushes once enough bytes accumulated.
    pub fn record_download(&mut self, pack: PackManifestInfo, bytes: u64) -> Result<bool, RespackError> {
        self.rw_manifest.upsert_pack(pack);
        self.unflushed_bytes += bytes;
        self.dirty = true;
        if self.unflushed_bytes >= self.flush_threshold {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Drop a pack from the cache: manifest entry, file and partial file.
    pub fn forget_pack(&mut self, relative_path: &str) {
        if self.rw_manifest.remove_pack(relative_path).is_some() {
            self.dirty = true;
        }
        for path in [self.cached_path(relative_path), self.partial_path(relative_path)] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed stale cache file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove cache file"),
            }
        }
    }

    /// Drop manifest entries whose file has gone missing.
    pub fn prune_missing(&mut self) -> Vec<String> {
        let missing: Vec<String> = self
            .rw_manifest
            .packs
            .iter()
            .filter(|p| !self.read_write.join(&p.relative_path).is_file())
            .map(|p| p.relative_path.clone())
            .collect();
        for path in &missing {
            self.rw_manifest.remove_pack(path);
            self.dirty = true;
        }
        missing
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Rewrite the read-write manifest if it changed.
    pub fn flush(&mut self) -> Result<(), RespackError> {
        if !self.dirty {
            return Ok(());
        }
        let path = self.read_write.join(MANIFEST_FILE_NAME);
        self.rw_manifest
            .write_atomic(&path)
            .map_err(|e| RespackError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        debug!(
            packs = self.rw_manifest.packs.len(),
            bytes_since_last = self.unflushed_bytes,
            "read-write manifest flushed"
        );
        self.unflushed_bytes = 0;
        self.dirty = false;
        Ok(())
    }
}
