//! Fetch a whole document from disk or over the transport.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;

use super::{Cx, Services};
use crate::error::RespackError;
use crate::net::{FetchEvent, FetchRequest, FetchStream};
use crate::scheduler::{Step, Task, TaskKey, TaskKind, TaskOutput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSource {
    File(PathBuf),
    Url(String),
}

/// Upper bound on the buffer reserved from an announced length. Larger
/// bodies still arrive; they grow the buffer as data comes in.
const MAX_PREALLOC: usize = 4 * 1024 * 1024;

struct InFlight {
    stream: FetchStream,
    body: Vec<u8>,
    last_progress: Instant,
}

pub struct RequestTask {
    key: TaskKey,
    source: RequestSource,
    stall_timeout: Duration,
    in_flight: Option<InFlight>,
}

impl RequestTask {
    pub fn new(name: impl Into<String>, source: RequestSource, stall_timeout: Duration) -> Self {
        Self {
            key: TaskKey::new(TaskKind::Request, name),
            source,
            stall_timeout,
            in_flight: None,
        }
    }

    pub fn key_for(name: &str) -> TaskKey {
        TaskKey::new(TaskKind::Request, name)
    }

    fn poll_url(&mut self, url: String, cx: &mut Cx<'_>) -> Step {
        let in_flight = self.in_flight.get_or_insert_with(|| {
            debug!(%url, "request started");
            InFlight {
                stream: cx.env.transport.fetch(FetchRequest::get(url.clone())),
                body: Vec::new(),
                last_progress: cx.now,
            }
        });

        loop {
            match in_flight.stream.try_recv() {
                Ok(FetchEvent::Accepted { total, .. }) => {
                    if let Some(total) = total {
                        let hint = usize::try_from(total).unwrap_or(usize::MAX);
                        in_flight.body.reserve(hint.min(MAX_PREALLOC));
                    }
                    in_flight.last_progress = cx.now;
                }
                Ok(FetchEvent::Data(bytes)) => {
                    in_flight.body.extend_from_slice(&bytes);
                    in_flight.last_progress = cx.now;
                }
                Ok(FetchEvent::Finished) => {
                    let body = std::mem::take(&mut in_flight.body);
                    self.in_flight = None;
                    debug!(%url, bytes = body.len(), "request finished");
                    return Step::Done(Ok(TaskOutput::Body(Arc::new(body))));
                }
                Ok(FetchEvent::Failed(message)) => {
                    self.in_flight = None;
                    return Step::Done(Err(RespackError::Network { url, message }));
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.in_flight = None;
                    return Step::Done(Err(RespackError::Network {
                        url,
                        message: "transfer closed without finishing".into(),
                    }));
                }
            }
        }

        if cx.now.saturating_duration_since(in_flight.last_progress) >= self.stall_timeout {
            self.in_flight = None;
            return Step::Done(Err(RespackError::Network {
                url,
                message: format!("no data for {}s", self.stall_timeout.as_secs()),
            }));
        }
        Step::Waiting
    }
}

impl Task<Services> for RequestTask {
    fn key(&self) -> &TaskKey {
        &self.key
    }

    fn poll(&mut self, cx: &mut Cx<'_>) -> Step {
        match &self.source {
            RequestSource::File(path) => match std::fs::read(path) {
                Ok(body) => Step::Done(Ok(TaskOutput::Body(Arc::new(body)))),
                Err(e) => Step::Done(Err(RespackError::io(path, &e))),
            },
            RequestSource::Url(url) => {
                let url = url.clone();
                self.poll_url(url, cx)
            }
        }
    }

    fn cancel(&mut self, _cx: &mut Cx<'_>) {
        // Dropping the receiver aborts the transfer.
        self.in_flight = None;
    }
}
