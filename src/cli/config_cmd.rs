// Copyright 2024-2026 Respack Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands only read the config layers; they never open the
//! content roots or touch the network.

use crate::config::{self, EffectiveConfig, EngineConfig};

/// Print effective config as key-value pairs (or JSON) to stdout.
pub fn run_show(json: bool) {
    let cfg = config::load().effective_config();
    if json {
        match serde_json::to_string_pretty(&cfg) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Failed to serialize config: {e}"),
        }
    } else {
        print_config(&cfg);
    }
}

/// Print built-in defaults, ignoring the config file and environment.
pub fn run_defaults() {
    print_config(&EngineConfig::default().effective_config());
}

/// Validate configuration for obvious misconfigurations.
///
/// Returns 0 if valid, 1 if any warnings are found, 2 if the config file
/// cannot be used at all.
pub fn run_validate() -> i32 {
    let config = match config::try_load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return 2;
        }
    };

    let warnings = collect_warnings(&config);
    for warning in &warnings {
        eprintln!("WARNING: {warning}");
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn collect_warnings(config: &EngineConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.remote.url_prefix.trim().is_empty() {
        warnings.push("RESPACK_URL_PREFIX is empty; version checks cannot reach a remote".into());
    }
    if !config.storage.read_only_dir.is_dir() {
        warnings.push(format!(
            "RESPACK_READ_ONLY_DIR {} does not exist",
            config.storage.read_only_dir.display()
        ));
    }
    if config.storage.read_only_dir == config.storage.read_write_dir {
        warnings.push("read-only and read-write roots are the same directory".into());
    }
    warnings
}

fn print_config(cfg: &EffectiveConfig) {
    for (key, value) in cfg.entries() {
        println!("{key}={value}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "RESPACK_CONFIG",
        "RESPACK_READ_ONLY_DIR",
        "RESPACK_READ_WRITE_DIR",
        "RESPACK_URL_PREFIX",
        "RESPACK_DOWNLOAD_ATTEMPTS",
    ];

    fn clear_env() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_validate_passes_with_usable_roots() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("RESPACK_READ_ONLY_DIR", dir.path().join("."));
        std::env::set_var("RESPACK_READ_WRITE_DIR", dir.path().join("cache"));
        std::env::set_var("RESPACK_URL_PREFIX", "https://cdn.example.com");
        assert_eq!(run_validate(), 0);
        clear_env();
    }

    #[test]
    fn test_validate_warns_without_remote() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("RESPACK_READ_ONLY_DIR", dir.path());
        assert_eq!(run_validate(), 1);
        clear_env();
    }

    #[test]
    fn test_validate_rejects_broken_file() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("respack.toml");
        std::fs::write(&path, "steps_per_tick = \"many\"").unwrap();
        std::env::set_var("RESPACK_CONFIG", &path);
        assert_eq!(run_validate(), 2);
        clear_env();
    }

    #[test]
    fn test_env_overrides_are_clamped() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("RESPACK_DOWNLOAD_ATTEMPTS", "0");
        let cfg = config::load().effective_config();
        assert_eq!(cfg.download_attempts, 1);
        clear_env();
    }

    #[test]
    fn test_print_config_smoke() {
        print_config(&EngineConfig::default().effective_config());
    }
}
