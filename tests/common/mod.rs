//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::task::Poll;
use std::time::{Duration, Instant};

use respack_core::config::EngineConfig;
use respack_core::loader::{Asset, ContentLoader, LoadError, PendingLoad, Ready};
use respack_core::manifest::{digest, Manifest, PackManifestInfo, ResourceManifestInfo};
use respack_core::net::{MemoryTransport, Transport};
use respack_core::Engine;
use tempfile::TempDir;

pub const PREFIX: &str = "mem://cdn";
pub const PLATFORM: &str = "test";
pub const GAME_VERSION: &str = "1.0";

pub fn manifest_url() -> String {
    format!("{PREFIX}/{PLATFORM}/{GAME_VERSION}/manifest.json")
}

pub fn pack_url(manifest_version: u32, relative_path: &str) -> String {
    format!("{PREFIX}/{PLATFORM}/{GAME_VERSION}/{manifest_version}/{relative_path}")
}

// === Loader ===

/// Everything the recording loader saw.
#[derive(Debug, Default)]
pub struct LoaderLog {
    pub pack_loads: Vec<String>,
    pub resource_loads: Vec<String>,
    pub pack_unloads: Vec<String>,
    pub resource_unloads: Vec<String>,
    /// Resource loads that fail.
    pub failing: HashSet<String>,
    /// Resource loads that panic.
    pub panicking: HashSet<String>,
    /// Resource loads that stay pending until the gate opens.
    pub gated: HashSet<String>,
    pub gate_open: bool,
}

/// A loader that fabricates assets and records every call.
#[derive(Clone, Default)]
pub struct RecordingLoader {
    pub log: Rc<RefCell<LoaderLog>>,
}

impl RecordingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loads_of(&self, name: &str) -> usize {
        self.log
            .borrow()
            .resource_loads
            .iter()
            .filter(|n| *n == name)
            .count()
    }

    pub fn unloads_of(&self, name: &str) -> usize {
        self.log
            .borrow()
            .resource_unloads
            .iter()
            .filter(|n| *n == name)
            .count()
    }

    pub fn pack_unloads_of(&self, path: &str) -> usize {
        self.log
            .borrow()
            .pack_unloads
            .iter()
            .filter(|p| *p == path)
            .count()
    }

    pub fn open_gate(&self) {
        self.log.borrow_mut().gate_open = true;
    }
}

struct Gated {
    log: Rc<RefCell<LoaderLog>>,
    asset: Asset,
}

impl PendingLoad for Gated {
    fn poll(&mut self) -> Poll<Result<Asset, LoadError>> {
        if self.log.borrow().gate_open {
            Poll::Ready(Ok(self.asset.clone()))
        } else {
            Poll::Pending
        }
    }
}

impl ContentLoader for RecordingLoader {
    fn load_pack(&mut self, _path: &Path, info: &PackManifestInfo) -> Box<dyn PendingLoad> {
        self.log
            .borrow_mut()
            .pack_loads
            .push(info.relative_path.clone());
        Ready::new(Ok(Arc::new(info.relative_path.clone())))
    }

    fn load_resource(
        &mut self,
        _pack: &Asset,
        info: &PackManifestInfo,
        resource: &ResourceManifestInfo,
    ) -> Box<dyn PendingLoad> {
        let name = resource.name.clone();
        let mut log = self.log.borrow_mut();
        log.resource_loads.push(name.clone());
        if log.panicking.contains(&name) {
            panic!("loader exploded on {name}");
        }
        if log.failing.contains(&name) {
            return Ready::new(Err(LoadError::Other(format!("{name} is broken"))));
        }
        let asset: Asset = Arc::new(format!("{}:{}", info.relative_path, name));
        if log.gated.contains(&name) && !log.gate_open {
            return Box::new(Gated {
                log: Rc::clone(&self.log),
                asset,
            });
        }
        Ready::new(Ok(asset))
    }

    fn load_raw(&mut self, path: &Path, info: &PackManifestInfo) -> Box<dyn PendingLoad> {
        let name = info
            .resources
            .first()
            .map(|r| r.name.clone())
            .unwrap_or_else(|| info.pack_name.clone());
        self.log.borrow_mut().resource_loads.push(name);
        match std::fs::read(path) {
            Ok(bytes) => Ready::new(Ok(Arc::new(bytes))),
            Err(e) => Ready::new(Err(LoadError::from(e))),
        }
    }

    fn unload_pack(&mut self, relative_path: &str, _handle: Asset) {
        self.log
            .borrow_mut()
            .pack_unloads
            .push(relative_path.to_string());
    }

    fn unload_resource(&mut self, name: &str, _instance: Asset) {
        self.log
            .borrow_mut()
            .resource_unloads
            .push(name.to_string());
    }
}

// === Manifest builders ===

pub fn resource(name: &str, deps: &[&str]) -> ResourceManifestInfo {
    ResourceManifestInfo {
        name: name.to_string(),
        length: 1,
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
    }
}

/// A bundled pack whose identity is derived from `content`.
pub fn pack(relative_path: &str, group: &str, content: &[u8], resources: Vec<ResourceManifestInfo>) -> PackManifestInfo {
    PackManifestInfo {
        relative_path: relative_path.to_string(),
        directory: String::new(),
        pack_name: relative_path.trim_end_matches(".pack").to_string(),
        group: group.to_string(),
        is_raw: false,
        is_scene: false,
        length: content.len() as u64,
        hash: digest::sha256_bytes(content),
        resources,
    }
}

pub fn manifest(version: u32, packs: Vec<PackManifestInfo>) -> Manifest {
    let mut manifest = Manifest::new(GAME_VERSION, version, PLATFORM);
    manifest.packs = packs;
    manifest.normalize();
    manifest
}

/// Deterministic pack body of `len` bytes.
pub fn body(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add((i % 251) as u8)).collect()
}

pub fn write_manifest(dir: &Path, manifest: &Manifest) {
    std::fs::create_dir_all(dir).unwrap();
    manifest
        .write_atomic(&dir.join(respack_core::manifest::MANIFEST_FILE_NAME))
        .unwrap();
}

pub fn write_pack(dir: &Path, relative_path: &str, content: &[u8]) {
    let path = dir.join(relative_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub fn read_manifest(dir: &Path) -> Manifest {
    Manifest::from_file(&dir.join(respack_core::manifest::MANIFEST_FILE_NAME)).unwrap()
}

// === Engine fixture ===

pub struct Fixture {
    pub read_only: TempDir,
    pub read_write: TempDir,
    pub transport: MemoryTransport,
    pub loader: RecordingLoader,
    pub engine: Engine,
    pub now: Instant,
}

impl Fixture {
    /// Engine over empty roots; `tweak` adjusts the config first.
    pub fn with_config(tweak: impl FnOnce(&mut EngineConfig)) -> Self {
        Self::build(tweak, |memory| Box::new(memory) as Box<dyn Transport>)
    }

    /// Engine whose transport wraps the shared in-memory one.
    pub fn with_transport(wrap: impl FnOnce(MemoryTransport) -> Box<dyn Transport>) -> Self {
        Self::build(|_| {}, wrap)
    }

    fn build(
        tweak: impl FnOnce(&mut EngineConfig),
        wrap: impl FnOnce(MemoryTransport) -> Box<dyn Transport>,
    ) -> Self {
        let read_only = tempfile::tempdir().unwrap();
        let read_write = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::with_roots(read_only.path(), read_write.path());
        config.remote.url_prefix = PREFIX.to_string();
        config.remote.platform = PLATFORM.to_string();
        config.remote.game_version = GAME_VERSION.to_string();
        config.unload_delay = Duration::ZERO;
        tweak(&mut config);

        let transport = MemoryTransport::new();
        let loader = RecordingLoader::new();
        let engine = Engine::new(config, Box::new(loader.clone()), wrap(transport.clone()));
        Self {
            read_only,
            read_write,
            transport,
            loader,
            engine,
            now: Instant::now(),
        }
    }

    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Fixture whose read-only root ships `packs`, catalog opened.
    pub fn shipped(packs: Vec<PackManifestInfo>) -> Self {
        let mut fixture = Self::new();
        fixture.ship(packs);
        fixture
    }

    pub fn ship(&mut self, packs: Vec<PackManifestInfo>) {
        write_manifest(self.read_only.path(), &manifest(1, packs));
        self.engine.open_local().unwrap();
    }

    pub fn ro(&self) -> PathBuf {
        self.read_only.path().to_path_buf()
    }

    pub fn rw(&self) -> PathBuf {
        self.read_write.path().to_path_buf()
    }

    /// Publish `manifest` and the pack bodies on the in-memory remote.
    pub fn publish(&self, manifest: &Manifest, bodies: &[(&str, &[u8])]) {
        self.transport
            .insert(manifest_url(), manifest.to_json().unwrap().into_bytes());
        for (path, content) in bodies {
            self.transport
                .insert(pack_url(manifest.manifest_version, path), content.to_vec());
        }
    }

    /// One tick, advancing the clock by a frame.
    pub fn tick(&mut self) {
        self.now += Duration::from_millis(16);
        self.engine.tick_at(self.now);
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        self.engine.tick_at(self.now);
    }

    /// Tick until `done` holds; false if it never did.
    pub fn tick_until(&mut self, mut done: impl FnMut(&mut Self) -> bool) -> bool {
        for _ in 0..500 {
            if done(self) {
                return true;
            }
            self.tick();
        }
        done(self)
    }

    pub fn settle(&mut self) -> bool {
        self.tick_until(|f| f.engine.is_idle())
    }
}

/// Shared slot for a callback result.
pub type Slot<T> = Rc<RefCell<Option<T>>>;

pub fn slot<T>() -> (Slot<T>, impl FnOnce(T) + 'static)
where
    T: 'static,
{
    let slot: Slot<T> = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    (slot, move |value| *sink.borrow_mut() = Some(value))
}
