//! Memory-mapped pack loading.
//!
//! A bundled pack file is the concatenation of its resources in manifest
//! order; each resource becomes a zero-copy view into the mapping. A raw pack
//! maps its file as the single resource.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use tracing::debug;

use super::{Asset, ContentLoader, LoadError, PendingLoad, Ready};
use crate::manifest::{PackManifestInfo, ResourceManifestInfo};

/// A pack file mapped read-only.
pub struct MappedPack {
    path: PathBuf,
    mmap: Mmap,
}

impl MappedPack {
    pub fn open(path: &Path, expected_len: u64) -> Result<Self, LoadError> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoadError::NotFound(path.to_path_buf())
            } else {
                LoadError::from(e)
            }
        })?;
        // SAFETY: pack files are replaced by rename, never modified in place.
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() as u64 != expected_len {
            return Err(LoadError::LengthMismatch {
                path: path.to_path_buf(),
                expected: expected_len,
                actual: mmap.len() as u64,
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

/// One resource inside a mapped pack.
pub struct ResourceView {
    pack: Arc<MappedPack>,
    offset: usize,
    len: usize,
}

impl ResourceView {
    pub fn as_bytes(&self) -> &[u8] {
        &self.pack.as_bytes()[self.offset..self.offset + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Default loader backed by `memmap2`.
#[derive(Debug, Default)]
pub struct MappedLoader {
    open_packs: usize,
}

impl MappedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pack handles handed out and not yet unloaded.
    pub fn open_packs(&self) -> usize {
        self.open_packs
    }

    fn view(
        pack: Arc<MappedPack>,
        info: &PackManifestInfo,
        resource: &ResourceManifestInfo,
    ) -> Result<ResourceView, LoadError> {
        let mut offset = 0u64;
        for r in &info.resources {
            if r.name == resource.name {
                let end = offset + r.length;
                if end > pack.len() as u64 {
                    return Err(LoadError::LengthMismatch {
                        path: pack.path().to_path_buf(),
                        expected: end,
                        actual: pack.len() as u64,
                    });
                }
                return Ok(ResourceView {
                    pack,
                    offset: offset as usize,
                    len: r.length as usize,
                });
            }
            offset += r.length;
        }
        Err(LoadError::MissingResource {
            pack: info.relative_path.clone(),
            resource: resource.name.clone(),
        })
    }
}

impl ContentLoader for MappedLoader {
    fn load_pack(&mut self, path: &Path, info: &PackManifestInfo) -> Box<dyn PendingLoad> {
        let result = MappedPack::open(path, info.length).map(|pack| {
            self.open_packs += 1;
            debug!(pack = %info.relative_path, bytes = pack.len(), "pack mapped");
            Arc::new(pack) as Asset
        });
        Ready::new(result)
    }

    fn load_resource(
        &mut self,
        pack: &Asset,
        info: &PackManifestInfo,
        resource: &ResourceManifestInfo,
    ) -> Box<dyn PendingLoad> {
        let result = pack
            .clone()
            .downcast::<MappedPack>()
            .map_err(|_| LoadError::ForeignHandle)
            .and_then(|mapped| Self::view(mapped, info, resource))
            .map(|view| Arc::new(view) as Asset);
        Ready::new(result)
    }

    fn load_raw(&mut self, path: &Path, info: &PackManifestInfo) -> Box<dyn PendingLoad> {
        let result = MappedPack::open(path, info.length).map(|pack| {
            let len = pack.len();
            Arc::new(ResourceView {
                pack: Arc::new(pack),
                offset: 0,
                len,
            }) as Asset
        });
        Ready::new(result)
    }

    fn unload_pack(&mut self, relative_path: &str, handle: Asset) {
        self.open_packs = self.open_packs.saturating_sub(1);
        debug!(pack = %relative_path, "pack unmapped");
        drop(handle);
    }

    fn unload_resource(&mut self, _name: &str, instance: Asset) {
        drop(instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Poll;

    fn info(len: u64) -> PackManifestInfo {
        PackManifestInfo {
            relative_path: "p.pack".into(),
            directory: String::new(),
            pack_name: "p".into(),
            group: "base".into(),
            is_raw: false,
            is_scene: false,
            length: len,
            hash: String::new(),
            resources: vec![
                ResourceManifestInfo {
                    name: "first".into(),
                    length: 3,
                    dependencies: vec![],
                },
                ResourceManifestInfo {
                    name: "second".into(),
                    length: 2,
                    dependencies: vec![],
                },
            ],
        }
    }

    fn ready(mut pending: Box<dyn PendingLoad>) -> Result<Asset, LoadError> {
        match pending.poll() {
            Poll::Ready(r) => r,
            Poll::Pending => panic!("mapped loads complete synchronously"),
        }
    }

    #[test]
    fn resources_are_views_in_manifest_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.pack");
        std::fs::write(&path, b"abcde").unwrap();
        let info = info(5);

        let mut loader = MappedLoader::new();
        let pack = ready(loader.load_pack(&path, &info)).unwrap();
        let second = ready(loader.load_resource(&pack, &info, &info.resources[1])).unwrap();
        let view = second.downcast::<ResourceView>().unwrap();
        assert_eq!(view.as_bytes(), b"de");
        assert_eq!(loader.open_packs(), 1);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.pack");
        std::fs::write(&path, b"abc").unwrap();
        let err = ready(MappedLoader::new().load_pack(&path, &info(5))).err().unwrap();
        assert!(matches!(err, LoadError::LengthMismatch { actual: 3, .. }));
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ready(MappedLoader::new().load_pack(&dir.path().join("nope"), &info(5)))
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::NotFound(_)));
    }
}
