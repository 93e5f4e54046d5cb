// Copyright 2024-2026 Respack Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI module for `respack-cli` commands.
//!
//! ## Usage
//!
//! ```bash
//! respack-cli check [GROUP]             # Compare local packs with the remote manifest
//! respack-cli update GROUP              # Download every outdated pack of GROUP
//! respack-cli manifest validate FILE    # Structural checks on a manifest
//! respack-cli manifest hash FILE        # Hash and length for a manifest entry
//! respack-cli config show|defaults|validate
//! ```

pub mod config_cmd;
pub mod manifest_cmd;
pub mod update_cmd;

pub use update_cmd::{run_check, run_update, TICK_INTERVAL};
