//! Structural validation of manifests.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::{Manifest, ManifestError};

pub(super) fn validate(manifest: &Manifest) -> Result<(), ManifestError> {
    check_order(manifest)?;
    check_resources(manifest)?;

    let resource_edges: BTreeMap<String, BTreeSet<String>> = manifest
        .packs
        .iter()
        .flat_map(|p| p.resources.iter())
        .map(|r| (r.name.clone(), r.dependencies.iter().cloned().collect()))
        .collect();
    if let Some(node) = find_cycle(&resource_edges) {
        return Err(ManifestError::DependencyCycle(node));
    }
    if let Some(node) = find_cycle(&manifest.pack_dependencies()) {
        return Err(ManifestError::DependencyCycle(node));
    }
    Ok(())
}

fn check_order(manifest: &Manifest) -> Result<(), ManifestError> {
    for pair in manifest.packs.windows(2) {
        let (previous, current) = (&pair[0].relative_path, &pair[1].relative_path);
        if previous == current {
            return Err(ManifestError::DuplicatePack(current.clone()));
        }
        if previous > current {
            return Err(ManifestError::Unsorted {
                previous: previous.clone(),
                current: current.clone(),
            });
        }
    }
    Ok(())
}

fn check_resources(manifest: &Manifest) -> Result<(), ManifestError> {
    let mut declared = HashSet::new();
    for pack in &manifest.packs {
        if pack.is_raw && pack.resources.len() != 1 {
            return Err(ManifestError::RawPackShape(pack.relative_path.clone()));
        }
        for resource in &pack.resources {
            if !declared.insert(resource.name.as_str()) {
                return Err(ManifestError::DuplicateResource(resource.name.clone()));
            }
        }
    }

    for resource in manifest.packs.iter().flat_map(|p| p.resources.iter()) {
        if let Some(missing) = resource
            .dependencies
            .iter()
            .find(|d| !declared.contains(d.as_str()))
        {
            return Err(ManifestError::UnknownDependency {
                resource: resource.name.clone(),
                dependency: missing.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search; returns a node on a cycle if one exists.
fn find_cycle(edges: &BTreeMap<String, BTreeSet<String>>) -> Option<String> {
    fn visit<'a>(
        node: &'a str,
        edges: &'a BTreeMap<String, BTreeSet<String>>,
        marks: &mut BTreeMap<&'a str, Mark>,
    ) -> Option<String> {
        match marks.get(node) {
            Some(Mark::Visiting) => return Some(node.to_string()),
            Some(Mark::Done) => return None,
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        if let Some(next) = edges.get(node) {
            for child in next {
                if let Some(hit) = visit(child, edges, marks) {
                    return Some(hit);
                }
            }
        }
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    edges.keys().find_map(|node| visit(node, edges, &mut marks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{PackManifestInfo, ResourceManifestInfo};

    fn pack(path: &str, resources: &[(&str, &[&str])]) -> PackManifestInfo {
        PackManifestInfo {
            relative_path: path.into(),
            directory: String::new(),
            pack_name: path.into(),
            group: "base".into(),
            is_raw: false,
            is_scene: false,
            length: 1,
            hash: "00".into(),
            resources: resources
                .iter()
                .map(|(name, deps)| ResourceManifestInfo {
                    name: name.to_string(),
                    length: 1,
                    dependencies: deps.iter().map(|d| d.to_string()).collect(),
                })
                .collect(),
        }
    }

    fn manifest(packs: Vec<PackManifestInfo>) -> Manifest {
        let mut m = Manifest::new("1.0", 1, "linux");
        m.packs = packs;
        m
    }

    #[test]
    fn accepts_acyclic_cross_pack_dependencies() {
        let m = manifest(vec![pack("a", &[("r1", &["r2"])]), pack("b", &[("r2", &[])])]);
        assert!(validate(&m).is_ok());
    }

    #[test]
    fn rejects_unsorted() {
        let m = manifest(vec![pack("b", &[]), pack("a", &[])]);
        assert!(matches!(validate(&m), Err(ManifestError::Unsorted { .. })));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let m = manifest(vec![pack("a", &[("r1", &["ghost"])])]);
        assert!(matches!(validate(&m), Err(ManifestError::UnknownDependency { .. })));
    }

    #[test]
    fn rejects_pack_level_cycle() {
        let m = manifest(vec![
            pack("a", &[("r1", &["r2"]), ("r3", &[])]),
            pack("b", &[("r2", &[]), ("r4", &["r3"])]),
        ]);
        assert!(matches!(validate(&m), Err(ManifestError::DependencyCycle(_))));
    }

    #[test]
    fn rejects_raw_pack_with_two_resources() {
        let mut p = pack("raw.bin", &[("x", &[]), ("y", &[])]);
        p.is_raw = true;
        assert!(matches!(
            validate(&manifest(vec![p])),
            Err(ManifestError::RawPackShape(_))
        ));
    }
}
