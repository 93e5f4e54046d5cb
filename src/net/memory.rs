//! In-process transport over a URL → bytes map.
//!
//! Used by tests and offline mirrors. Failures are scripted per URL and are
//! consumed by the next matching fetch. Clones share state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{FetchEvent, FetchRequest, FetchStream, Transport};

const DEFAULT_CHUNK: usize = 64 * 1024;

/// One fetch as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub url: String,
    pub offset: u64,
}

#[derive(Debug, Default)]
struct Script {
    fail: u32,
    corrupt: u32,
    cut_after: Option<usize>,
    stall_after: Option<usize>,
}

#[derive(Debug)]
struct Inner {
    bodies: HashMap<String, Arc<Vec<u8>>>,
    scripts: HashMap<String, Script>,
    ignore_range: bool,
    chunk_size: usize,
    log: Vec<RequestRecord>,
    // Senders of stalled transfers, kept so the stream never disconnects.
    stalled: Vec<mpsc::Sender<FetchEvent>>,
}

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                bodies: HashMap::new(),
                scripts: HashMap::new(),
                ignore_range: false,
                chunk_size: DEFAULT_CHUNK,
                log: Vec::new(),
                stalled: Vec::new(),
            })),
        }
    }

    pub fn insert(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .bodies
            .insert(url.into(), Arc::new(body.into()));
    }

    pub fn remove(&self, url: &str) {
        self.inner.lock().bodies.remove(url);
    }

    /// The next `times` fetches of `url` fail before any byte.
    pub fn fail_next(&self, url: &str, times: u32) {
        self.inner.lock().scripts.entry(url.to_string()).or_default().fail += times;
    }

    /// The next `times` fetches of `url` deliver a body with one byte flipped.
    pub fn corrupt_next(&self, url: &str, times: u32) {
        self.inner.lock().scripts.entry(url.to_string()).or_default().corrupt += times;
    }

    /// The next fetch of `url` drops the connection after `bytes` bytes.
    pub fn cut_next_after(&self, url: &str, bytes: usize) {
        self.inner.lock().scripts.entry(url.to_string()).or_default().cut_after = Some(bytes);
    }

    /// The next fetch of `url` sends `bytes` bytes and then goes silent.
    pub fn stall_next_after(&self, url: &str, bytes: usize) {
        self.inner.lock().scripts.entry(url.to_string()).or_default().stall_after = Some(bytes);
    }

    /// Answer ranged requests with the whole body, like a server without
    /// range support.
    pub fn set_ignore_range(&self, ignore: bool) {
        self.inner.lock().ignore_range = ignore;
    }

    pub fn set_chunk_size(&self, bytes: usize) {
        self.inner.lock().chunk_size = bytes.max(1);
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.inner.lock().log.clone()
    }

    pub fn requests_for(&self, url: &str) -> Vec<RequestRecord> {
        self.inner
            .lock()
            .log
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.inner.lock().log.clear();
    }
}

/// A stream already holding `events`. Sized to fit, so nothing blocks.
fn preloaded(events: Vec<FetchEvent>) -> (mpsc::Sender<FetchEvent>, FetchStream) {
    let (tx, rx) = mpsc::channel(events.len().max(1));
    for event in events {
        let _ = tx.try_send(event);
    }
    (tx, rx)
}

impl Transport for MemoryTransport {
    fn fetch(&self, request: FetchRequest) -> FetchStream {
        let mut inner = self.inner.lock();
        inner.log.push(RequestRecord {
            url: request.url.clone(),
            offset: request.offset,
        });

        let Some(body) = inner.bodies.get(&request.url).cloned() else {
            return preloaded(vec![FetchEvent::Failed("HTTP 404 Not Found".into())]).1;
        };

        let script = inner.scripts.entry(request.url.clone()).or_default();
        if script.fail > 0 {
            script.fail -= 1;
            return preloaded(vec![FetchEvent::Failed("scripted failure".into())]).1;
        }
        let corrupt = if script.corrupt > 0 {
            script.corrupt -= 1;
            true
        } else {
            false
        };
        let cut_after = script.cut_after.take();
        let stall_after = script.stall_after.take();

        let resumed = request.offset > 0 && !inner.ignore_range;
        let start = if resumed { request.offset as usize } else { 0 };
        if start > body.len() {
            return preloaded(vec![FetchEvent::Failed("HTTP 416 Range Not Satisfiable".into())]).1;
        }

        let mut payload = body[start..].to_vec();
        if corrupt {
            if let Some(last) = payload.last_mut() {
                *last ^= 0xff;
            }
        }
        let limit = cut_after.or(stall_after).unwrap_or(payload.len()).min(payload.len());

        let mut events = vec![FetchEvent::Accepted {
            resumed,
            total: Some(body.len() as u64),
        }];
        events.extend(
            payload[..limit]
                .chunks(inner.chunk_size)
                .map(|chunk| FetchEvent::Data(chunk.to_vec())),
        );
        if stall_after.is_none() {
            events.push(if cut_after.is_some() && limit < payload.len() {
                FetchEvent::Failed("connection reset".into())
            } else {
                FetchEvent::Finished
            });
        }

        let (tx, rx) = preloaded(events);
        if stall_after.is_some() {
            inner.stalled.push(tx);
        }
        rx
    }
}
