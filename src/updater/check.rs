//! Three-way manifest reconciliation.
//!
//! Each pack's state follows from comparing its remote entry against the
//! read-only and read-write entries by identity `(path, length, hash)`.
//! All three lists are sorted by path, so one merge-join pass derives every
//! state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::manifest::{Manifest, PackManifestInfo};
use crate::registry::StorageLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackState {
    /// No longer listed remotely; any cached copy is stale.
    Disuse,
    /// The shipped copy is current.
    InReadOnly,
    /// The cached copy is current.
    InReadWrite,
    /// Must be downloaded.
    NeedUpdate,
}

impl PackState {
    /// Where the catalog finds the pack after the check. `None` for
    /// packs that leave the catalog.
    pub fn location(self) -> Option<StorageLocation> {
        match self {
            Self::Disuse => None,
            Self::InReadOnly => Some(StorageLocation::ReadOnly),
            Self::InReadWrite => Some(StorageLocation::ReadWrite),
            Self::NeedUpdate => Some(StorageLocation::Remote),
        }
    }

    pub fn is_local(self) -> bool {
        matches!(self, Self::InReadOnly | Self::InReadWrite)
    }
}

/// Reconciliation record for one pack path.
#[derive(Debug, Clone)]
pub struct CheckInfo {
    pub relative_path: String,
    pub read_only: Option<Arc<PackManifestInfo>>,
    pub read_write: Option<Arc<PackManifestInfo>>,
    pub remote: Option<Arc<PackManifestInfo>>,
    pub state: PackState,
}

impl CheckInfo {
    fn derive(
        read_only: Option<&PackManifestInfo>,
        read_write: Option<&PackManifestInfo>,
        remote: Option<&PackManifestInfo>,
    ) -> Self {
        let state = match remote {
            None => PackState::Disuse,
            Some(r) if read_only.is_some_and(|p| p.same_identity(r)) => PackState::InReadOnly,
            Some(r) if read_write.is_some_and(|p| p.same_identity(r)) => PackState::InReadWrite,
            Some(_) => PackState::NeedUpdate,
        };
        let relative_path = [remote, read_write, read_only]
            .into_iter()
            .flatten()
            .map(|p| p.relative_path.clone())
            .next()
            .unwrap_or_default();
        Self {
            relative_path,
            read_only: read_only.map(|p| Arc::new(p.clone())),
            read_write: read_write.map(|p| Arc::new(p.clone())),
            remote: remote.map(|p| Arc::new(p.clone())),
            state,
        }
    }

    pub fn group(&self) -> Option<&str> {
        self.remote.as_deref().map(|p| p.group.as_str())
    }

    pub fn length(&self) -> u64 {
        self.remote.as_deref().map_or(0, |p| p.length)
    }
}

/// Per-group aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    pub local_count: usize,
    pub local_length: u64,
    pub remote_count: usize,
    pub remote_length: u64,
}

impl GroupInfo {
    pub fn update_count(&self) -> usize {
        self.remote_count - self.local_count
    }

    pub fn update_length(&self) -> u64 {
        self.remote_length - self.local_length
    }
}

/// What a version check found, filtered to the requested group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// Packs needing download.
    pub total_count: usize,
    /// Bytes needing download.
    pub total_length: u64,
    pub groups: BTreeMap<String, GroupInfo>,
}

/// The outcome of one completed check.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub manifest_version: u32,
    infos: Vec<CheckInfo>,
}

impl Reconciliation {
    /// Merge-join the three sorted pack lists.
    pub fn new(read_only: Option<&Manifest>, read_write: Option<&Manifest>, remote: &Manifest) -> Self {
        let empty: &[PackManifestInfo] = &[];
        let ro = read_only.map_or(empty, |m| m.packs.as_slice());
        let rw = read_write.map_or(empty, |m| m.packs.as_slice());
        let remote_packs = remote.packs.as_slice();

        let (mut i, mut j, mut k) = (0, 0, 0);
        let mut infos = Vec::with_capacity(remote_packs.len());
        loop {
            let heads = [ro.get(i), rw.get(j), remote_packs.get(k)];
            let Some(min) = heads
                .iter()
                .flatten()
                .map(|p| p.relative_path.as_str())
                .min()
            else {
                break;
            };
            let (a, b, c) = (
                at_path(heads[0], min),
                at_path(heads[1], min),
                at_path(heads[2], min),
            );
            infos.push(CheckInfo::derive(a, b, c));
            i += usize::from(a.is_some());
            j += usize::from(b.is_some());
            k += usize::from(c.is_some());
        }

        Self {
            manifest_version: remote.manifest_version,
            infos,
        }
    }

    pub fn infos(&self) -> &[CheckInfo] {
        &self.infos
    }

    pub fn info(&self, relative_path: &str) -> Option<&CheckInfo> {
        self.infos
            .binary_search_by(|c| c.relative_path.as_str().cmp(relative_path))
            .ok()
            .map(|i| &self.infos[i])
    }

    pub fn state_of(&self, relative_path: &str) -> Option<PackState> {
        self.info(relative_path).map(|c| c.state)
    }

    pub fn disused(&self) -> impl Iterator<Item = &CheckInfo> {
        self.infos.iter().filter(|c| c.state == PackState::Disuse)
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.infos.iter().any(|c| c.group() == Some(group))
    }

    /// Packs of `group` that need downloading, in path order.
    pub fn need_update<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a Arc<PackManifestInfo>> {
        self.infos
            .iter()
            .filter(move |c| c.state == PackState::NeedUpdate && c.group() == Some(group))
            .filter_map(|c| c.remote.as_ref())
    }

    pub fn group_info(&self, group: &str) -> Option<GroupInfo> {
        self.report(Some(group)).groups.remove(group)
    }

    /// Aggregate counts, optionally for a single group.
    pub fn report(&self, group: Option<&str>) -> CheckReport {
        let mut report = CheckReport::default();
        for info in &self.infos {
            let Some(pack_group) = info.group() else {
                continue;
            };
            if group.is_some_and(|g| g != pack_group) {
                continue;
            }
            let length = info.length();
            let entry = report.groups.entry(pack_group.to_string()).or_default();
            entry.remote_count += 1;
            entry.remote_length += length;
            if info.state.is_local() {
                entry.local_count += 1;
                entry.local_length += length;
            } else {
                report.total_count += 1;
                report.total_length += length;
            }
        }
        report
    }
}

/// `head` if it sits at `path` in the merge-join.
fn at_path<'a>(head: Option<&'a PackManifestInfo>, path: &str) -> Option<&'a PackManifestInfo> {
    head.filter(|p| p.relative_path == path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(path: &str, group: &str, length: u64, hash: &str) -> PackManifestInfo {
        PackManifestInfo {
            relative_path: path.to_string(),
            directory: String::new(),
            pack_name: path.to_string(),
            group: group.to_string(),
            is_raw: false,
            is_scene: false,
            length,
            hash: hash.to_string(),
            resources: Vec::new(),
        }
    }

    fn manifest(packs: Vec<PackManifestInfo>) -> Manifest {
        let mut m = Manifest::new("1.0", 1, "test");
        m.packs = packs;
        m.normalize();
        m
    }

    #[test]
    fn test_states_follow_identity() {
        let ro = manifest(vec![pack("a", "base", 10, "aa"), pack("b", "base", 20, "bb")]);
        let rw = manifest(vec![
            pack("b", "base", 20, "b2"),
            pack("c", "extra", 30, "cc"),
            pack("gone", "extra", 5, "ee"),
        ]);
        let remote = manifest(vec![
            pack("a", "base", 10, "AA"),
            pack("b", "base", 20, "b2"),
            pack("c", "extra", 30, "c2"),
        ]);

        let rec = Reconciliation::new(Some(&ro), Some(&rw), &remote);
        assert_eq!(rec.state_of("a"), Some(PackState::InReadOnly));
        assert_eq!(rec.state_of("b"), Some(PackState::InReadWrite));
        assert_eq!(rec.state_of("c"), Some(PackState::NeedUpdate));
        assert_eq!(rec.state_of("gone"), Some(PackState::Disuse));
        assert_eq!(rec.disused().count(), 1);
    }

    #[test]
    fn test_report_filters_by_group() {
        let remote = manifest(vec![
            pack("a", "base", 10, "aa"),
            pack("b", "base", 20, "bb"),
            pack("c", "extra", 30, "cc"),
        ]);
        let ro = manifest(vec![pack("a", "base", 10, "aa")]);
        let rec = Reconciliation::new(Some(&ro), None, &remote);

        let all = rec.report(None);
        assert_eq!(all.total_count, 2);
        assert_eq!(all.total_length, 50);
        assert_eq!(all.groups.len(), 2);

        let base = rec.report(Some("base"));
        assert_eq!(base.total_count, 1);
        assert_eq!(base.total_length, 20);
        let info = base.groups["base"];
        assert_eq!((info.local_count, info.remote_count), (1, 2));
        assert_eq!(info.update_length(), 20);
        assert_eq!(rec.need_update("extra").count(), 1);
    }

    #[test]
    fn test_missing_local_manifests_mean_everything_updates() {
        let remote = manifest(vec![pack("a", "base", 10, "aa")]);
        let rec = Reconciliation::new(None, None, &remote);
        assert_eq!(rec.report(None).total_count, 1);
        assert!(rec.has_group("base"));
        assert!(!rec.has_group("other"));
    }
}
