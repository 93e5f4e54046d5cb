//! Resumable, verified pack download.
//!
//! Bytes stream into `<rw>/<relativePath>.part`. An existing partial file is
//! resumed with a ranged request. On `Finished` the file is checked against
//! the manifest length and hash and renamed into place. A failed attempt
//! discards the partial file; cancellation keeps it for a later resume.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use super::{Cx, Services};
use crate::config::DownloadConfig;
use crate::error::RespackError;
use crate::manifest::{digest, PackManifestInfo};
use crate::net::{FetchEvent, FetchRequest, FetchStream};
use crate::registry::StorageLocation;
use crate::scheduler::{Step, Task, TaskKey, TaskKind, TaskOutput};
use crate::telemetry;

/// Events drained per poll, so one fast transfer cannot hog a tick.
const EVENTS_PER_POLL: usize = 64;

struct Transfer {
    stream: FetchStream,
    file: File,
    written: u64,
    last_progress: Instant,
}

enum Phase {
    Idle,
    Streaming(Transfer),
}

pub struct DownloadTask {
    key: TaskKey,
    info: Arc<PackManifestInfo>,
    url: String,
    max_attempts: u32,
    stall_timeout: Duration,
    attempts: u32,
    downloaded: u64,
    phase: Phase,
}

impl DownloadTask {
    pub fn new(info: Arc<PackManifestInfo>, url: String, config: &DownloadConfig) -> Self {
        Self {
            key: TaskKey::new(TaskKind::Download, info.relative_path.clone()),
            info,
            url,
            max_attempts: config.max_attempts.max(1),
            stall_timeout: config.stall_timeout,
            attempts: 0,
            downloaded: 0,
            phase: Phase::Idle,
        }
    }

    pub fn key_for(relative_path: &str) -> TaskKey {
        TaskKey::new(TaskKind::Download, relative_path)
    }

    fn path(&self) -> &str {
        &self.info.relative_path
    }

    fn io_error(&self, path: &std::path::Path, err: &std::io::Error) -> RespackError {
        RespackError::io(path, err)
    }

    fn begin_attempt(&mut self, cx: &mut Cx<'_>) -> Result<Step, RespackError> {
        let partial = cx.env.storage.partial_path(self.path());
        if let Some(parent) = partial.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(parent, &e))?;
        }

        let mut offset = std::fs::metadata(&partial).map(|m| m.len()).unwrap_or(0);
        if offset > self.info.length {
            warn!(pack = %self.path(), offset, "partial file longer than the pack; restarting");
            offset = 0;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&partial)
            .map_err(|e| self.io_error(&partial, &e))?;
        if offset == 0 {
            file.set_len(0).map_err(|e| self.io_error(&partial, &e))?;
        }

        self.attempts += 1;
        if self.attempts == 1 {
            cx.env
                .transfers
                .begin(self.path(), &self.info.group, self.info.length, offset);
        }

        if offset == self.info.length {
            // Everything is already on disk; only verification is left.
            return self.complete(cx, file, offset);
        }

        debug!(pack = %self.path(), attempt = self.attempts, offset, "download attempt started");
        let stream = cx
            .env
            .transport
            .fetch(FetchRequest::resume(self.url.clone(), offset));
        self.phase = Phase::Streaming(Transfer {
            stream,
            file,
            written: offset,
            last_progress: cx.now,
        });
        Ok(Step::Running)
    }

    fn pump(&mut self, cx: &mut Cx<'_>) -> Result<Step, RespackError> {
        let Phase::Streaming(transfer) = &mut self.phase else {
            return Ok(Step::Running);
        };
        let partial = cx.env.storage.partial_path(&self.info.relative_path);
        let mut progressed = false;

        for _ in 0..EVENTS_PER_POLL {
            match transfer.stream.try_recv() {
                Ok(FetchEvent::Accepted { resumed, .. }) => {
                    if !resumed && transfer.written > 0 {
                        debug!(pack = %self.info.relative_path, "server ignored range; restarting file");
                        transfer
                            .file
                            .set_len(0)
                            .map_err(|e| RespackError::io(&partial, &e))?;
                        transfer.written = 0;
                        cx.env.transfers.reset(&self.info.relative_path);
                    }
                }
                Ok(FetchEvent::Data(bytes)) => {
                    transfer
                        .file
                        .write_all(&bytes)
                        .map_err(|e| RespackError::io(&partial, &e))?;
                    let len = bytes.len() as u64;
                    transfer.written += len;
                    transfer.last_progress = cx.now;
                    self.downloaded += len;
                    progressed = true;
                    cx.env
                        .transfers
                        .record(&self.info.relative_path, len, cx.now);
                    if transfer.written > self.info.length {
                        return Err(RespackError::Integrity {
                            path: self.info.relative_path.clone(),
                            reason: format!(
                                "received {} bytes, manifest says {}",
                                transfer.written, self.info.length
                            ),
                        });
                    }
                }
                Ok(FetchEvent::Finished) => {
                    let Phase::Streaming(transfer) = std::mem::replace(&mut self.phase, Phase::Idle)
                    else {
                        return Ok(Step::Running);
                    };
                    return self.complete(cx, transfer.file, transfer.written);
                }
                Ok(FetchEvent::Failed(message)) => {
                    return Err(RespackError::Network {
                        url: self.url.clone(),
                        message,
                    });
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(RespackError::Network {
                        url: self.url.clone(),
                        message: "transfer closed without finishing".into(),
                    });
                }
            }
        }

        if progressed {
            return Ok(Step::Running);
        }
        if cx.now.saturating_duration_since(transfer.last_progress) >= self.stall_timeout {
            return Err(RespackError::Network {
                url: self.url.clone(),
                message: format!("no data for {}s", self.stall_timeout.as_secs()),
            });
        }
        Ok(Step::Waiting)
    }

    /// Verify the partial file and move it into the cache.
    fn complete(&mut self, cx: &mut Cx<'_>, mut file: File, written: u64) -> Result<Step, RespackError> {
        let partial = cx.env.storage.partial_path(self.path());
        file.flush().map_err(|e| self.io_error(&partial, &e))?;
        drop(file);
        self.phase = Phase::Idle;

        if written != self.info.length {
            return Err(RespackError::Integrity {
                path: self.path().to_string(),
                reason: format!("length {written}, manifest says {}", self.info.length),
            });
        }
        let actual = digest::sha256_file(&partial).map_err(|e| self.io_error(&partial, &e))?;
        if !digest::hash_eq(&actual, &self.info.hash) {
            return Err(RespackError::Integrity {
                path: self.path().to_string(),
                reason: format!("hash {actual}, manifest says {}", self.info.hash),
            });
        }

        let target: PathBuf = cx.env.storage.cached_path(self.path());
        std::fs::rename(&partial, &target).map_err(|e| self.io_error(&target, &e))?;

        let Services {
            registry, storage, ..
        } = &mut *cx.env;
        registry.set_location(self.path(), StorageLocation::ReadWrite);
        if let Err(e) = storage.record_download((*self.info).clone(), self.downloaded) {
            warn!(error = %e, "failed to flush read-write manifest");
        }
        info!(pack = %self.path(), bytes = written, attempts = self.attempts, "pack downloaded");
        Ok(Step::Done(Ok(TaskOutput::Downloaded {
            relative_path: self.path().to_string(),
            bytes: written,
            attempts: self.attempts,
        })))
    }

    /// Discard partial data and either retry or give up.
    fn attempt_failed(&mut self, cx: &mut Cx<'_>, error: RespackError) -> Step {
        self.phase = Phase::Idle;
        let partial = cx.env.storage.partial_path(self.path());
        if let Err(e) = std::fs::remove_file(&partial) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %partial.display(), error = %e, "failed to discard partial download");
            }
        }
        cx.env.transfers.reset(self.path());

        if self.attempts >= self.max_attempts || !error.is_transient() {
            warn!(pack = %self.path(), attempts = self.attempts, error = %error, "download failed");
            return Step::Done(Err(error));
        }
        let reason = match error {
            RespackError::Integrity { .. } => "integrity",
            _ => "network",
        };
        telemetry::record_download_retry(reason);
        warn!(pack = %self.path(), attempt = self.attempts, error = %error, "download attempt failed; retrying");
        Step::Running
    }
}

impl Task<Services> for DownloadTask {
    fn key(&self) -> &TaskKey {
        &self.key
    }

    fn poll(&mut self, cx: &mut Cx<'_>) -> Step {
        let result = match self.phase {
            Phase::Idle => self.begin_attempt(cx),
            Phase::Streaming(_) => self.pump(cx),
        };
        match result {
            Ok(step) => step,
            Err(e) => self.attempt_failed(cx, e),
        }
    }

    fn cancel(&mut self, _cx: &mut Cx<'_>) {
        if let Phase::Streaming(mut transfer) = std::mem::replace(&mut self.phase, Phase::Idle) {
            let _ = transfer.file.flush();
            debug!(
                pack = %self.path(),
                kept = transfer.written,
                "download cancelled; partial file kept"
            );
        }
    }
}
