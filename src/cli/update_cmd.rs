// Copyright 2024-2026 Respack Contributors
// SPDX-License-Identifier: Apache-2.0

//! Check and update subcommands.
//!
//! Both build an [`Engine`] over the configured roots with the HTTP
//! transport, then drive its tick loop from the calling task until the
//! request completes.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::loader::MappedLoader;
use crate::net::HttpTransport;
use crate::updater::{CheckReport, GroupProgress};
use crate::{Engine, RespackError};

/// Engine tick interval while a command runs.
pub const TICK_INTERVAL: Duration = Duration::from_millis(16);

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

type Slot<T> = Rc<RefCell<Option<Result<T, RespackError>>>>;

fn open_engine() -> Result<(Engine, CancellationToken), String> {
    let config = config::load();
    let transport = HttpTransport::new(Handle::current()).map_err(|e| e.to_string())?;
    let shutdown = transport.shutdown_token();
    let mut engine = Engine::new(config, Box::new(MappedLoader::new()), Box::new(transport));
    engine.open_local().map_err(|e| e.to_string())?;
    Ok((engine, shutdown))
}

/// Tick until `slot` is filled, reporting progress once per second.
async fn drive<T>(
    engine: &mut Engine,
    slot: &Slot<T>,
    mut on_progress: impl FnMut(&Engine),
) -> Result<T, RespackError> {
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut last_progress = Instant::now();
    loop {
        ticker.tick().await;
        engine.tick();
        if let Some(result) = slot.borrow_mut().take() {
            return result;
        }
        if last_progress.elapsed() >= PROGRESS_INTERVAL {
            on_progress(engine);
            last_progress = Instant::now();
        }
    }
}

async fn check(engine: &mut Engine, group: Option<&str>) -> Result<CheckReport, RespackError> {
    let slot: Slot<CheckReport> = Rc::default();
    let sink = Rc::clone(&slot);
    engine.check_version(group, move |result| *sink.borrow_mut() = Some(result));
    drive(engine, &slot, |_| {}).await
}

fn exit_code(error: &RespackError) -> i32 {
    match error {
        RespackError::Network { .. } => 3,
        e if e.is_fatal_for_check() => 3,
        _ => 1,
    }
}

fn print_report(report: &CheckReport) {
    println!(
        "{} packs need updating ({} bytes)",
        report.total_count, report.total_length
    );
    for (name, info) in &report.groups {
        let name = if name.is_empty() { "(default)" } else { name.as_str() };
        println!(
            "  {name:<16} local {:>5}/{:<5} update {:>5} packs {:>14} bytes",
            info.local_count,
            info.remote_count,
            info.update_count(),
            info.update_length()
        );
    }
}

fn print_progress(group: &str, progress: &GroupProgress) {
    println!(
        "{group}: {} {}/{} packs, {}/{} bytes, {:.1} KiB/s",
        progress.state,
        progress.updated_count,
        progress.total_count,
        progress.downloaded_bytes,
        progress.total_length,
        progress.bytes_per_second / 1024.0
    );
}

/// Run a version check. Returns the process exit code.
pub async fn run_check(group: Option<&str>) -> i32 {
    let (mut engine, shutdown) = match open_engine() {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return 2;
        }
    };
    let code = match check(&mut engine, group).await {
        Ok(report) => {
            print_report(&report);
            0
        }
        Err(e) => {
            eprintln!("Version check failed: {e}");
            exit_code(&e)
        }
    };
    shutdown.cancel();
    code
}

/// Check, then download every outdated pack of `group`.
pub async fn run_update(group: &str) -> i32 {
    let (mut engine, shutdown) = match open_engine() {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return 2;
        }
    };

    let code = match update(&mut engine, group).await {
        Ok(updated) => {
            println!("{group}: {updated} packs up to date");
            0
        }
        Err(e) => {
            eprintln!("Update of {group} failed: {e}");
            exit_code(&e)
        }
    };
    shutdown.cancel();
    code
}

async fn update(engine: &mut Engine, group: &str) -> Result<usize, RespackError> {
    let report = check(engine, Some(group)).await?;
    print_report(&report);

    let slot: Slot<crate::updater::UpdateReport> = Rc::default();
    let sink = Rc::clone(&slot);
    engine.update_group(group, move |result| *sink.borrow_mut() = Some(result));
    let result = drive(engine, &slot, |engine| {
        if let Ok(progress) = engine.group_progress(group) {
            print_progress(group, &progress);
        }
    })
    .await?;
    Ok(result.updated_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StorageLocation;

    #[test]
    fn test_remote_manifest_failures_map_to_connection_error() {
        let err = RespackError::ManifestLoad {
            origin: StorageLocation::Remote,
            message: "HTTP 404".into(),
        };
        assert_eq!(exit_code(&err), 3);
        assert_eq!(exit_code(&RespackError::NotChecked), 1);
    }
}
