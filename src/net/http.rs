//! `reqwest`-backed transport.
//!
//! Each fetch runs as a task on a host-provided tokio runtime and streams
//! its body back through the event channel. A fetch stops when its receiver
//! is dropped or when the transport is shut down.

use std::time::Duration;

use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{FetchEvent, FetchRequest, FetchStream, Transport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Body chunks buffered ahead of the tick thread before the fetch waits.
const CHANNEL_DEPTH: usize = 32;

pub struct HttpTransport {
    client: Client,
    runtime: Handle,
    shutdown: CancellationToken,
}

impl HttpTransport {
    pub fn new(runtime: Handle) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("respack-core/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, runtime))
    }

    pub fn with_client(client: Client, runtime: Handle) -> Self {
        Self {
            client,
            runtime,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that aborts every in-flight fetch when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, request: FetchRequest) -> FetchStream {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let client = self.client.clone();
        let shutdown = self.shutdown.child_token();
        self.runtime.spawn(async move {
            let result = tokio::select! {
                _ = shutdown.cancelled() => Err("transport shut down".to_string()),
                _ = tx.closed() => Ok(()),
                result = stream_body(&client, &request, &tx) => result,
            };
            if let Err(message) = result {
                debug!(url = %request.url, %message, "fetch failed");
                let _ = tx.send(FetchEvent::Failed(message)).await;
            }
        });
        rx
    }
}

/// Returns `Ok` also when the receiver went away mid-transfer.
async fn stream_body(
    client: &Client,
    request: &FetchRequest,
    tx: &mpsc::Sender<FetchEvent>,
) -> Result<(), String> {
    let mut builder = client.get(&request.url);
    if request.offset > 0 {
        builder = builder.header(header::RANGE, format!("bytes={}-", request.offset));
    }

    let response = builder.send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {status}"));
    }

    let resumed = request.offset > 0 && status == StatusCode::PARTIAL_CONTENT;
    let total = response
        .content_length()
        .map(|len| if resumed { len + request.offset } else { len });
    if tx.send(FetchEvent::Accepted { resumed, total }).await.is_err() {
        return Ok(());
    }

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        if tx.send(FetchEvent::Data(chunk.to_vec())).await.is_err() {
            return Ok(());
        }
    }
    let _ = tx.send(FetchEvent::Finished).await;
    Ok(())
}
