// Copyright 2024-2026 Respack Contributors
// SPDX-License-Identifier: Apache-2.0

//! Manifest CLI subcommands: validate, hash.

use std::path::Path;

use crate::manifest::{digest, Manifest};

/// Parse and validate a manifest file. Returns 0 if valid, 1 otherwise.
pub fn run_validate(path: &Path) -> i32 {
    let manifest = match Manifest::from_file(path) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return 1;
        }
    };
    if let Err(e) = manifest.validate() {
        eprintln!("INVALID: {e}");
        return 1;
    }

    let resources: usize = manifest.packs.iter().map(|p| p.resources.len()).sum();
    println!(
        "{} v{} ({}): {} packs, {} resources, {} bytes",
        manifest.game_version,
        manifest.manifest_version,
        manifest.platform,
        manifest.packs.len(),
        resources,
        manifest.total_length()
    );
    for group in manifest.groups() {
        let (count, bytes) = manifest
            .packs_in_group(group)
            .fold((0usize, 0u64), |(c, b), p| (c + 1, b + p.length));
        println!("  group {:<16} {count:>6} packs {bytes:>14} bytes", display_group(group));
    }
    0
}

/// Print the hash and length a manifest entry for `path` must carry.
pub fn run_hash(path: &Path) -> i32 {
    let length = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            eprintln!("ERROR: {}: {e}", path.display());
            return 1;
        }
    };
    match digest::sha256_file(path) {
        Ok(hash) => {
            println!("{hash}  {length}  {}", path.display());
            0
        }
        Err(e) => {
            eprintln!("ERROR: {}: {e}", path.display());
            1
        }
    }
}

fn display_group(group: &str) -> &str {
    if group.is_empty() {
        "(default)"
    } else {
        group
    }
}
