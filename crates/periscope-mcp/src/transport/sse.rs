//! Legacy HTTP+SSE transport.
//!
//! The server keeps one `text/event-stream` open. Its first `endpoint` event
//! names the URL that client messages are POSTed to; everything after that
//! arrives as `message` events. Pushes skip rmcp and go to the bridge with
//! their SSE `id:` attached, everything else is fed into the rmcp service.

use std::sync::Arc;

use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use reqwest::header::{ACCEPT, HeaderMap};
use rmcp::ServiceExt;
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{Link, McpService, Transport, header_map};
use crate::bridge::RawPush;
use crate::config::ServerConfig;
use crate::error::McpResult;
use crate::handler::PeriscopeClientHandler;
use crate::notification::is_push;

/// Buffered messages in each direction between the HTTP tasks and rmcp.
const CHANNEL_BOUND: usize = 64;

/// JSON-RPC internal error code used for undeliverable requests.
const INTERNAL_ERROR: i64 = -32603;

/// One decoded server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `id:` field.
    pub id: Option<String>,
    /// `event:` field.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Largest frame the decoder buffers; anything longer is discarded.
const MAX_FRAME_BYTES: usize = 4_194_304;

/// Incremental `text/event-stream` decoder. Chunks may split frames (and
/// UTF-8 sequences or CRLF pairs) anywhere. CRLF, CR and LF all end a line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Pending bytes, line endings already normalized to LF.
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a frame end.
    scanned: usize,
    /// The previous byte was a CR, so an LF now completes a CRLF.
    after_cr: bool,
    /// Dropping the remainder of an oversized frame.
    discarding: bool,
}

impl SseDecoder {
    /// Feed a chunk and return the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        for &byte in chunk {
            match byte {
                b'\n' if self.after_cr => self.after_cr = false,
                b'\r' => {
                    self.buffer.push(b'\n');
                    self.after_cr = true;
                },
                _ => {
                    self.buffer.push(byte);
                    self.after_cr = false;
                },
            }
        }

        let mut events = Vec::new();
        let mut start = 0;
        let mut from = self.scanned.saturating_sub(1);
        while let Some(pos) = self.buffer[from..].windows(2).position(|w| w == b"\n\n") {
            let end = from.saturating_add(pos).saturating_add(2);
            if self.discarding {
                self.discarding = false;
            } else if let Some(event) = parse_frame(&String::from_utf8_lossy(&self.buffer[start..end])) {
                events.push(event);
            }
            start = end;
            from = end;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_FRAME_BYTES {
            warn!(bytes = self.buffer.len(), "Discarding oversized SSE frame");
            let ends_line = self.buffer.last() == Some(&b'\n');
            self.buffer.clear();
            if ends_line {
                self.buffer.push(b'\n');
            }
            self.scanned = self.buffer.len();
            self.discarding = true;
        }
        events
    }
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data: Vec<&str> = Vec::new();

    for line in frame.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event.event = Some(value.to_string()),
            "data" => data.push(value),
            "id" if !value.contains('\0') => event.id = Some(value.to_string()),
            _ => {},
        }
    }

    if data.is_empty() && event.event.is_none() {
        return None;
    }
    event.data = data.join("\n");
    Some(event)
}

/// Reader and writer tasks of an SSE connection. Dropping aborts both,
/// which closes their sockets.
#[derive(Debug)]
pub(crate) struct SseTransport {
    reader: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
}

impl SseTransport {
    pub(super) async fn release(mut self) {
        self.reader.abort();
        let _ = (&mut self.reader).await;
        if let Some(writer) = self.writer.as_mut() {
            writer.abort();
            let _ = writer.await;
        }
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(writer) = &self.writer {
            writer.abort();
        }
    }
}

pub(super) async fn connect(
    config: &ServerConfig,
    handler: PeriscopeClientHandler,
    link: &Arc<Link>,
) -> McpResult<(McpService, Transport)> {
    let url = config
        .parsed_url()
        .map_err(|e| link.connect_error(e.to_string()))?;
    let headers = header_map(&config.headers).map_err(|e| link.connect_error(e))?;
    let client = reqwest::Client::new();

    let response = client
        .get(url.clone())
        .headers(headers.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| link.connect_error(format!("failed to open event stream {url}: {e}")))?;

    let (endpoint_tx, endpoint_rx) = oneshot::channel();
    let (inbound_tx, inbound_rx) = mpsc::channel::<ServerJsonRpcMessage>(CHANNEL_BOUND);
    let mut tasks = SseTransport {
        reader: tokio::spawn(read_events(
            response,
            url.clone(),
            endpoint_tx,
            inbound_tx.clone(),
            Arc::clone(link),
        )),
        writer: None,
    };

    let endpoint = match endpoint_rx.await {
        Ok(Ok(endpoint)) => endpoint,
        Ok(Err(reason)) => return Err(link.connect_error(reason)),
        Err(_) => {
            return Err(link.connect_error("event stream closed before the endpoint event"));
        },
    };
    debug!(server = %link.server_id(), endpoint = %endpoint, "Received SSE endpoint");

    let (outbound_tx, outbound_rx) = mpsc::channel::<ClientJsonRpcMessage>(CHANNEL_BOUND);
    tasks.writer = Some(tokio::spawn(post_messages(
        client,
        endpoint,
        headers,
        outbound_rx,
        inbound_tx,
        link.server_id().to_string(),
    )));

    let service = handler
        .serve((outbound_tx, inbound_rx))
        .await
        .map_err(|e| link.connect_error(format!("handshake with {url} failed: {e}")))?;

    info!(server = %link.server_id(), url = %url, "Connected over SSE");
    Ok((service, Transport::Sse(tasks)))
}

async fn read_events(
    response: reqwest::Response,
    base: Url,
    endpoint_tx: oneshot::Sender<Result<Url, String>>,
    mut inbound: mpsc::Sender<ServerJsonRpcMessage>,
    link: Arc<Link>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::default();
    let mut stream = response.bytes_stream();

    let reason = loop {
        match stream.next().await {
            Some(Ok(chunk)) => {
                for event in decoder.feed(&chunk) {
                    match event.event.as_deref() {
                        Some("endpoint") => {
                            let resolved = base
                                .join(event.data.trim())
                                .map_err(|e| format!("invalid endpoint {:?}: {e}", event.data));
                            match endpoint_tx.take() {
                                Some(tx) => {
                                    let _ = tx.send(resolved);
                                },
                                None => debug!(server = %link.server_id(), "Ignoring repeated endpoint event"),
                            }
                        },
                        None | Some("message") => route_message(event, &mut inbound, &link).await,
                        Some(other) => {
                            debug!(server = %link.server_id(), event = %other, "Ignoring SSE event");
                        },
                    }
                }
            },
            Some(Err(e)) => break format!("event stream error: {e}"),
            None => break "event stream closed".to_string(),
        }
    };

    // Before the endpoint arrives this is a connect failure, reported by
    // `connect` through the dropped sender.
    if endpoint_tx.is_none() {
        link.transport_lost(&reason);
    }
}

async fn route_message(
    event: SseEvent,
    inbound: &mut mpsc::Sender<ServerJsonRpcMessage>,
    link: &Link,
) {
    let Ok(value) = serde_json::from_str::<Value>(&event.data) else {
        link.bridge()
            .on_raw_push_with_id(RawPush::Text(event.data), event.id);
        return;
    };

    if is_push(&value) {
        link.bridge()
            .on_raw_push_with_id(RawPush::Text(event.data), event.id);
        return;
    }

    match serde_json::from_value::<ServerJsonRpcMessage>(value) {
        Ok(message) => {
            if inbound.send(message).await.is_err() {
                debug!(server = %link.server_id(), "Service gone, dropping SSE message");
            }
        },
        Err(e) => {
            warn!(server = %link.server_id(), error = %e, "Undecodable SSE message");
            link.bridge()
                .on_raw_push_with_id(RawPush::Text(event.data), event.id);
        },
    }
}

async fn post_messages(
    client: reqwest::Client,
    endpoint: Url,
    headers: HeaderMap,
    mut outbound: mpsc::Receiver<ClientJsonRpcMessage>,
    mut inbound: mpsc::Sender<ServerJsonRpcMessage>,
    server_id: String,
) {
    while let Some(message) = outbound.next().await {
        let result = client
            .post(endpoint.clone())
            .headers(headers.clone())
            .json(&message)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        if let Err(e) = result {
            warn!(server = %server_id, error = %e, "POST to SSE endpoint failed");
            // Answer the pending request ourselves so the caller gets an
            // error instead of waiting forever.
            if let Some(reply) = undeliverable_reply(&message, &e.to_string()) {
                let _ = inbound.send(reply).await;
            }
        }
    }
}

fn undeliverable_reply(message: &ClientJsonRpcMessage, reason: &str) -> Option<ServerJsonRpcMessage> {
    let id = serde_json::to_value(message).ok()?.get("id")?.clone();
    serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": INTERNAL_ERROR,
            "message": format!("request could not be delivered: {reason}"),
        },
    }))
    .ok()
}
