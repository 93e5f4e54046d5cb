//! Load one pack after its upstream packs.
//!
//! Upstream links are recorded before the upstream loads start, so an
//! upstream pack cannot be evicted out from under a pack that is still
//! loading. A pack that only exists remotely is downloaded first.

use std::task::Poll;

use tracing::debug;

use super::{Cx, DownloadTask, Services};
use crate::error::RespackError;
use crate::loader::PendingLoad;
use crate::registry::{PackId, StorageLocation};
use crate::scheduler::{Pending, Step, Task, TaskKey, TaskKind, TaskOutcome, TaskOutput};

enum Phase {
    Start,
    Prerequisites,
    Loading(Box<dyn PendingLoad>),
}

pub struct PackLoadTask {
    key: TaskKey,
    phase: Phase,
    pack: Option<PackId>,
    upstream: Vec<(String, Pending)>,
    download: Option<Pending>,
}

impl PackLoadTask {
    pub fn new(relative_path: impl Into<String>) -> Self {
        Self {
            key: TaskKey::new(TaskKind::PackLoad, relative_path),
            phase: Phase::Start,
            pack: None,
            upstream: Vec::new(),
            download: None,
        }
    }

    pub fn key_for(relative_path: &str) -> TaskKey {
        TaskKey::new(TaskKind::PackLoad, relative_path)
    }

    fn failed(&self, message: impl Into<String>) -> Step {
        Step::Done(Err(RespackError::LoadFailed {
            name: self.key.name.clone(),
            message: message.into(),
        }))
    }

    fn start(&mut self, cx: &mut Cx<'_>) -> Step {
        let path = self.key.name.clone();
        let registry = &mut cx.env.registry;
        let id = match registry.get_or_create_pack(&path) {
            Ok(id) => id,
            Err(e) => return Step::Done(Err(e)),
        };
        self.pack = Some(id);

        let ready = registry.pack(id).is_some_and(|p| p.is_ready());
        if ready {
            return Step::Done(Ok(TaskOutput::Pack(id)));
        }

        let upstream = registry
            .catalog()
            .pack(&path)
            .map(|entry| entry.upstream.clone())
            .unwrap_or_default();
        for up in &upstream {
            match registry.get_or_create_pack(up) {
                Ok(up_id) => registry.add_pack_dependency(id, up_id),
                Err(e) => return Step::Done(Err(e)),
            }
        }

        let remote = registry
            .pack(id)
            .filter(|p| p.location() == StorageLocation::Remote)
            .map(|p| p.info().clone());

        for up in upstream {
            let pending = cx.spawn(Box::new(PackLoadTask::new(up.clone())));
            self.upstream.push((up, pending));
        }

        if let Some(info) = remote {
            let Some(url) = cx.env.pack_url(&info.relative_path) else {
                return self.failed("pack is remote but no remote manifest has been checked");
            };
            debug!(pack = %path, "pack only available remotely; downloading");
            let task = DownloadTask::new(info, url, &cx.env.config.download);
            self.download = Some(cx.spawn(Box::new(task)));
        }

        self.phase = Phase::Prerequisites;
        Step::Running
    }

    fn prerequisites(&mut self, cx: &mut Cx<'_>) -> Step {
        let waiting = self.upstream.iter().any(|(_, p)| !p.is_done())
            || self.download.as_ref().is_some_and(|p| !p.is_done());
        if waiting {
            return Step::Waiting;
        }

        for (up, pending) in std::mem::take(&mut self.upstream) {
            if let Some(Err(e)) = pending.take() {
                return self.failed(format!("upstream pack {up}: {e}"));
            }
        }
        if let Some(Err(e)) = self.download.take().and_then(|p| p.take()) {
            return Step::Done(Err(e));
        }

        let Some(id) = self.pack else {
            return self.failed("pack not registered");
        };
        let Services {
            registry,
            loader,
            storage,
            ..
        } = &mut *cx.env;
        let Some(pack) = registry.pack(id) else {
            return self.failed("runtime info vanished while loading");
        };
        let Some(path) = storage.pack_path(pack.location(), &pack.info().relative_path) else {
            return self.failed("pack has no local copy");
        };

        if pack.info().is_raw {
            // A raw pack is its single resource; the resource load maps the file.
            registry.set_pack_loaded(id, None);
            return Step::Done(Ok(TaskOutput::Pack(id)));
        }

        let pending = loader.load_pack(&path, pack.info());
        self.phase = Phase::Loading(pending);
        Step::Running
    }
}

impl Task<Services> for PackLoadTask {
    fn key(&self) -> &TaskKey {
        &self.key
    }

    fn poll(&mut self, cx: &mut Cx<'_>) -> Step {
        match &mut self.phase {
            Phase::Start => self.start(cx),
            Phase::Prerequisites => self.prerequisites(cx),
            Phase::Loading(pending) => match pending.poll() {
                Poll::Pending => Step::Waiting,
                Poll::Ready(Ok(handle)) => match self.pack {
                    Some(id) => {
                        cx.env.registry.set_pack_loaded(id, Some(handle));
                        debug!(pack = %self.key.name, "pack loaded");
                        Step::Done(Ok(TaskOutput::Pack(id)))
                    }
                    None => self.failed("pack not registered"),
                },
                Poll::Ready(Err(e)) => self.failed(e.to_string()),
            },
        }
    }

    fn finish(&mut self, cx: &mut Cx<'_>, _outcome: &TaskOutcome, _external_waiters: usize) {
        // Nobody may be left holding the pack, e.g. after a failed load.
        if let Some(id) = self.pack {
            cx.env.registry.request_eviction(id);
        }
    }

    fn cancel(&mut self, cx: &mut Cx<'_>) {
        for (_, pending) in self.upstream.drain(..) {
            cx.cancel(pending.ticket());
        }
        if let Some(download) = self.download.take() {
            cx.cancel(download.ticket());
        }
        if let Some(id) = self.pack {
            cx.env.registry.request_eviction(id);
        }
        debug!(pack = %self.key.name, "pack load cancelled");
    }
}
