//! Content loading seam.
//!
//! The engine never interprets pack contents. A [`ContentLoader`] turns pack
//! files into opaque handles and resources into opaque instances; loads are
//! polled once per tick so a loader may complete them asynchronously.

mod mapped;

pub use mapped::{MappedLoader, MappedPack, ResourceView};

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::task::Poll;

use thiserror::Error;

use crate::manifest::{PackManifestInfo, ResourceManifestInfo};

/// Opaque loaded instance: a pack handle or a resource.
pub type Asset = Arc<dyn Any + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Pack file not found: {0}")]
    NotFound(PathBuf),

    #[error("Pack {path} is {actual} bytes, manifest says {expected}")]
    LengthMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Resource {resource} not present in pack {pack}")]
    MissingResource { pack: String, resource: String },

    #[error("Pack handle has an unexpected type")]
    ForeignHandle,

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// An in-flight load, polled by the owning task.
pub trait PendingLoad {
    fn poll(&mut self) -> Poll<Result<Asset, LoadError>>;
}

/// A load that completed synchronously.
pub struct Ready(Option<Result<Asset, LoadError>>);

impl Ready {
    pub fn new(result: Result<Asset, LoadError>) -> Box<dyn PendingLoad> {
        Box::new(Self(Some(result)))
    }
}

impl PendingLoad for Ready {
    fn poll(&mut self) -> Poll<Result<Asset, LoadError>> {
        match self.0.take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Ready(Err(LoadError::Other("load already consumed".into()))),
        }
    }
}

/// Turns pack files into loaded handles and resources into instances.
pub trait ContentLoader {
    /// Open a bundled pack located at `path`.
    fn load_pack(&mut self, path: &Path, info: &PackManifestInfo) -> Box<dyn PendingLoad>;

    /// Instantiate one resource out of an opened pack.
    fn load_resource(
        &mut self,
        pack: &Asset,
        info: &PackManifestInfo,
        resource: &ResourceManifestInfo,
    ) -> Box<dyn PendingLoad>;

    /// Load the single resource of a raw pack straight from its file.
    fn load_raw(&mut self, path: &Path, info: &PackManifestInfo) -> Box<dyn PendingLoad>;

    fn unload_pack(&mut self, relative_path: &str, handle: Asset);

    fn unload_resource(&mut self, name: &str, instance: Asset);
}
