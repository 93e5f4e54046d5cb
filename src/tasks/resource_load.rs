//! Load one resource: its dependencies, its pack, then the instance.
//!
//! The task holds one reference on the resource while it runs, so the
//! resource, its dependencies and its pack stay pinned. On completion each
//! active public caller receives its own reference and the hold is dropped;
//! if every caller cancelled, dropping the hold releases everything exactly
//! once.

use std::task::Poll;

use tracing::debug;

use super::{Cx, PackLoadTask, Services};
use crate::error::RespackError;
use crate::loader::PendingLoad;
use crate::registry::ResourceId;
use crate::scheduler::{Pending, Step, Task, TaskKey, TaskKind, TaskOutcome, TaskOutput};

enum Phase {
    Start,
    Prerequisites,
    Loading(Box<dyn PendingLoad>),
}

pub struct ResourceLoadTask {
    key: TaskKey,
    phase: Phase,
    hold: Option<ResourceId>,
    dependencies: Vec<(String, Pending)>,
    pack: Option<Pending>,
}

impl ResourceLoadTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            key: TaskKey::new(TaskKind::ResourceLoad, name),
            phase: Phase::Start,
            hold: None,
            dependencies: Vec::new(),
            pack: None,
        }
    }

    pub fn key_for(name: &str) -> TaskKey {
        TaskKey::new(TaskKind::ResourceLoad, name)
    }

    fn name(&self) -> &str {
        &self.key.name
    }

    fn failed(&self, message: impl Into<String>) -> Step {
        Step::Done(Err(RespackError::LoadFailed {
            name: self.name().to_string(),
            message: message.into(),
        }))
    }

    fn start(&mut self, cx: &mut Cx<'_>) -> Step {
        let registry = &mut cx.env.registry;
        let id = match registry.get_or_create_resource(&self.key.name) {
            Ok(id) => id,
            Err(e) => return Step::Done(Err(e)),
        };
        if let Err(e) = registry.add_ref(id) {
            return Step::Done(Err(e));
        }
        self.hold = Some(id);

        if let Some(asset) = registry.asset(id) {
            return Step::Done(Ok(TaskOutput::Resource { id, asset }));
        }

        let Some(entry) = registry.catalog().resource(&self.key.name) else {
            return Step::Done(Err(RespackError::UnknownResource(self.key.name.clone())));
        };
        let pack = entry.pack.clone();
        let dependencies = entry.info.dependencies.clone();

        for dep in dependencies {
            let pending = cx.spawn(Box::new(ResourceLoadTask::new(dep.clone())));
            self.dependencies.push((dep, pending));
        }
        self.pack = Some(cx.spawn(Box::new(PackLoadTask::new(pack))));
        self.phase = Phase::Prerequisites;
        Step::Running
    }

    fn prerequisites(&mut self, cx: &mut Cx<'_>) -> Step {
        let waiting = self.dependencies.iter().any(|(_, p)| !p.is_done())
            || self.pack.as_ref().is_some_and(|p| !p.is_done());
        if waiting {
            return Step::Waiting;
        }

        for (dep, pending) in std::mem::take(&mut self.dependencies) {
            if let Some(Err(e)) = pending.take() {
                return self.failed(format!("dependency {dep}: {e}"));
            }
        }
        let pack_id = match self.pack.take().and_then(|p| p.take()) {
            Some(Ok(TaskOutput::Pack(id))) => id,
            Some(Err(e)) => return self.failed(format!("pack: {e}")),
            _ => return self.failed("pack load produced no pack"),
        };

        let Some(id) = self.hold else {
            return self.failed("resource not held");
        };
        let Services {
            registry,
            loader,
            storage,
            ..
        } = &mut *cx.env;
        let (Some(resource), Some(pack)) = (registry.resource(id), registry.pack(pack_id)) else {
            return self.failed("runtime info vanished while loading");
        };

        let pending = if pack.info().is_raw {
            match storage.pack_path(pack.location(), &pack.info().relative_path) {
                Some(path) => loader.load_raw(&path, pack.info()),
                None => return self.failed("raw pack has no local copy"),
            }
        } else {
            match pack.loaded() {
                Some(handle) => loader.load_resource(handle, pack.info(), resource.info()),
                None => return self.failed("pack is not loaded"),
            }
        };
        self.phase = Phase::Loading(pending);
        Step::Running
    }
}

impl Task<Services> for ResourceLoadTask {
    fn key(&self) -> &TaskKey {
        &self.key
    }

    fn poll(&mut self, cx: &mut Cx<'_>) -> Step {
        match &mut self.phase {
            Phase::Start => self.start(cx),
            Phase::Prerequisites => self.prerequisites(cx),
            Phase::Loading(pending) => match pending.poll() {
                Poll::Pending => Step::Waiting,
                Poll::Ready(Ok(asset)) => match self.hold {
                    Some(id) => {
                        cx.env.registry.set_asset(id, asset.clone());
                        debug!(resource = %self.key.name, "resource loaded");
                        Step::Done(Ok(TaskOutput::Resource { id, asset }))
                    }
                    None => self.failed("resource not held"),
                },
                Poll::Ready(Err(e)) => self.failed(e.to_string()),
            },
        }
    }

    fn finish(&mut self, cx: &mut Cx<'_>, outcome: &TaskOutcome, external_waiters: usize) {
        let registry = &mut cx.env.registry;
        if let Ok(TaskOutput::Resource { id, .. }) = outcome {
            for _ in 0..external_waiters {
                let _ = registry.add_ref(*id);
            }
        }
        if let Some(id) = self.hold.take() {
            let _ = registry.release(id);
        }
    }

    fn cancel(&mut self, cx: &mut Cx<'_>) {
        for (_, pending) in self.dependencies.drain(..) {
            cx.cancel(pending.ticket());
        }
        if let Some(pack) = self.pack.take() {
            cx.cancel(pack.ticket());
        }
        if let Some(id) = self.hold.take() {
            let _ = cx.env.registry.release(id);
        }
        debug!(resource = %self.key.name, "resource load cancelled");
    }
}
