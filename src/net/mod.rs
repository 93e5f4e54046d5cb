//! Network seam.
//!
//! A [`Transport`] starts a transfer and hands back a channel of
//! [`FetchEvent`]s. The tick thread drains the channel without blocking;
//! dropping the receiver aborts the transfer.

mod http;
mod memory;

pub use http::HttpTransport;
pub use memory::{MemoryTransport, RequestRecord};

use tokio::sync::mpsc;

/// One GET. `offset > 0` asks for `Range: bytes=offset-`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub offset: u64,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            offset: 0,
        }
    }

    pub fn resume(url: impl Into<String>, offset: u64) -> Self {
        Self {
            url: url.into(),
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    /// Headers received. `resumed` is false when the server ignored the
    /// range and is sending the whole body; `total` is the full size if known.
    Accepted { resumed: bool, total: Option<u64> },
    Data(Vec<u8>),
    Finished,
    Failed(String),
}

pub type FetchStream = mpsc::Receiver<FetchEvent>;

pub trait Transport {
    fn fetch(&self, request: FetchRequest) -> FetchStream;
}

/// URL scheme of the remote content root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    pub prefix: String,
    pub platform: String,
    pub game_version: String,
}

impl RemoteLayout {
    pub fn new(
        prefix: impl Into<String>,
        platform: impl Into<String>,
        game_version: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            platform: platform.into(),
            game_version: game_version.into(),
        }
    }

    fn base(&self) -> String {
        format!(
            "{}/{}/{}",
            self.prefix.trim_end_matches('/'),
            self.platform,
            self.game_version
        )
    }

    pub fn manifest_url(&self) -> String {
        format!("{}/{}", self.base(), crate::manifest::MANIFEST_FILE_NAME)
    }

    pub fn pack_url(&self, manifest_version: u32, relative_path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base(),
            manifest_version,
            relative_path.trim_start_matches('/')
        )
    }
}
