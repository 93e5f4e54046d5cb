//! Dependency and lifecycle registry.
//!
//! Owns every resource and pack runtime info in generational arenas. Edges
//! between infos are plain ids, so the dependency graph may be cyclic by
//! identity without any ownership cycle.

mod arena;
mod catalog;
mod lifecycle;
mod pack;
mod resource;

pub use arena::{Arena, Index};
pub use catalog::{Catalog, PackEntry, ResourceEntry};
pub use lifecycle::Registry;
pub use pack::{EvictedPack, PackRuntimeInfo, StorageLocation};
pub use resource::ResourceRuntimeInfo;

/// Handle to a live resource runtime info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) Index);

/// Handle to a live pack runtime info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackId(pub(crate) Index);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

impl std::fmt::Display for PackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pack#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    fn catalog() -> Catalog {
        let json = r#"{
            "gameVersion": "1.0.0",
            "manifestVersion": 1,
            "platform": "linux",
            "packs": [
                {"relativePath": "a.pack", "bundleName": "a", "group": "base",
                 "length": 10, "hash": "aa",
                 "resources": [{"name": "r1", "length": 5, "dependencies": ["r2"]}]},
                {"relativePath": "b.pack", "bundleName": "b", "group": "base",
                 "length": 10, "hash": "bb",
                 "resources": [{"name": "r2", "length": 5}]}
            ]
        }"#;
        let manifest = Manifest::from_json(json).unwrap();
        Catalog::from_manifest(&manifest, StorageLocation::ReadOnly)
    }

    #[test]
    fn dependency_refs_follow_zero_edges() {
        let mut reg = Registry::new(catalog());
        let r1 = reg.acquire("r1").unwrap();
        assert_eq!(reg.ref_count("r1"), 1);
        assert_eq!(reg.ref_count("r2"), 1);

        reg.add_ref(r1).unwrap();
        assert_eq!(reg.ref_count("r2"), 1);

        reg.release(r1).unwrap();
        reg.release(r1).unwrap();
        assert_eq!(reg.ref_count("r1"), 0);
        assert_eq!(reg.ref_count("r2"), 0);
        assert_eq!(reg.resource_count(), 0);
    }

    #[test]
    fn release_at_zero_is_double_release() {
        let mut reg = Registry::new(catalog());
        let r2 = reg.get_or_create_resource("r2").unwrap();
        let err = reg.release(r2).unwrap_err();
        assert!(matches!(err, crate::RespackError::DoubleRelease(_)));
        assert_eq!(reg.ref_count("r2"), 0);
        assert!(reg.resource(r2).is_some());
    }

    #[test]
    fn emptied_pack_becomes_candidate() {
        let mut reg = Registry::new(catalog());
        let r2 = reg.acquire("r2").unwrap();
        let pack = reg.pack_id("b.pack").unwrap();
        assert!(!reg.is_pack_unloadable(pack));
        reg.release(r2).unwrap();
        assert_eq!(reg.take_eviction_candidates(), vec![pack]);
        assert!(reg.take_eviction_candidates().is_empty());
    }

    #[test]
    fn eviction_propagates_to_upstream_pack() {
        let mut reg = Registry::new(catalog());
        let a = reg.get_or_create_pack("a.pack").unwrap();
        let b = reg.get_or_create_pack("b.pack").unwrap();
        reg.add_pack_dependency(a, b);
        assert!(!reg.is_pack_unloadable(b));

        let evicted = reg.evict_pack(a).unwrap();
        assert_eq!(evicted.path, "a.pack");
        assert_eq!(reg.take_eviction_candidates(), vec![b]);
        assert!(reg.pack(a).is_none());
    }

    #[test]
    fn unload_unknown_name_is_noop() {
        let mut reg = Registry::new(catalog());
        assert!(!reg.unload("missing"));
        assert!(!reg.unload("r1"));
        assert_eq!(reg.resource_count(), 0);
    }
}
