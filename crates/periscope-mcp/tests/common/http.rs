//! MCP servers speaking just enough HTTP/1.1 over a local socket.
//!
//! Every response closes its connection, so each client message arrives on a
//! fresh socket and stopping a server makes the next request fail to connect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// A request as the server received it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// JSON-RPC method of the body, if any.
    pub fn rpc_method(&self) -> Option<&str> {
        self.body.get("method").and_then(Value::as_str)
    }
}

type RequestLog = Arc<Mutex<Vec<Recorded>>>;

/// Stateless streamable HTTP server: every request is answered in the POST
/// response and no session id is handed out.
pub struct StreamableServer {
    url: String,
    requests: RequestLog,
    accept: JoinHandle<()>,
}

impl StreamableServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("http://{}/mcp", listener.local_addr().expect("local addr"));
        let requests = RequestLog::default();
        let log = Arc::clone(&requests);
        let accept = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            while let Ok((stream, _)) = listener.accept().await {
                connections.spawn(serve_streamable(stream, Arc::clone(&log)));
            }
        });
        Self { url, requests, accept }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Close the listener and every open connection.
    pub async fn stop(self) {
        self.accept.abort();
        let _ = self.accept.await;
    }
}

async fn serve_streamable(stream: TcpStream, log: RequestLog) {
    let mut reader = BufReader::new(stream);
    let Some(request) = read_request(&mut reader).await else {
        return;
    };
    log.lock().unwrap().push(request.clone());

    let stream = reader.get_mut();
    let _ = match (request.method.as_str(), reply_to(&request.body)) {
        ("POST", Some(reply)) => respond(stream, "200 OK", Some(&reply)).await,
        ("POST", None) => respond(stream, "202 Accepted", None).await,
        _ => respond(stream, "405 Method Not Allowed", None).await,
    };
}

/// Legacy SSE server: `GET /sse` opens the event stream, which announces
/// `/messages` as the POST endpoint. Replies travel over the stream.
pub struct SseServer {
    url: String,
    requests: RequestLog,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    accept: JoinHandle<()>,
}

impl SseServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("http://{}/sse", listener.local_addr().expect("local addr"));
        let requests = RequestLog::default();
        let events = Arc::new(Mutex::new(None));
        let (log, slot) = (Arc::clone(&requests), Arc::clone(&events));
        let accept = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            while let Ok((stream, _)) = listener.accept().await {
                connections.spawn(serve_sse(stream, Arc::clone(&log), Arc::clone(&slot)));
            }
        });
        Self {
            url,
            requests,
            events,
            accept,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Write a raw frame (including its blank-line terminator) to the open
    /// event stream.
    pub fn push(&self, frame: &str) {
        let sender = self.events.lock().unwrap().clone();
        sender
            .expect("no open event stream")
            .send(frame.to_string())
            .expect("event stream task gone");
    }

    /// End the event stream cleanly; the listener stays up.
    pub fn close_stream(&self) {
        self.events.lock().unwrap().take();
    }

    pub async fn stop(self) {
        self.accept.abort();
        let _ = self.accept.await;
    }
}

async fn serve_sse(
    stream: TcpStream,
    log: RequestLog,
    slot: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
) {
    let mut reader = BufReader::new(stream);
    let Some(request) = read_request(&mut reader).await else {
        return;
    };
    log.lock().unwrap().push(request.clone());
    let stream = reader.get_mut();

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/sse") => {
            let (tx, rx) = mpsc::unbounded_channel();
            *slot.lock().unwrap() = Some(tx);
            let _ = stream_events(stream, rx).await;
        },
        ("POST", "/messages") => {
            if let Some(reply) = reply_to(&request.body) {
                let sender = slot.lock().unwrap().clone();
                if let Some(sender) = sender {
                    let _ = sender.send(format!("event: message\ndata: {reply}\n\n"));
                }
            }
            let _ = respond(stream, "202 Accepted", None).await;
        },
        _ => {
            let _ = respond(stream, "404 Not Found", None).await;
        },
    }
}

async fn stream_events(
    stream: &mut TcpStream,
    mut frames: mpsc::UnboundedReceiver<String>,
) -> std::io::Result<()> {
    stream
        .write_all(
            b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncache-control: no-cache\r\ntransfer-encoding: chunked\r\n\r\n",
        )
        .await?;
    write_chunk(stream, "event: endpoint\ndata: /messages\n\n").await?;
    while let Some(frame) = frames.recv().await {
        write_chunk(stream, &frame).await?;
    }
    stream.write_all(b"0\r\n\r\n").await?;
    stream.shutdown().await
}

async fn write_chunk(stream: &mut TcpStream, data: &str) -> std::io::Result<()> {
    let chunk = format!("{:x}\r\n{data}\r\n", data.len());
    stream.write_all(chunk.as_bytes()).await?;
    stream.flush().await
}

/// Result for each method the servers know; anything else gets `{}`.
fn answer(method: &str) -> Value {
    match method {
        "initialize" => json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {"tools": {"listChanged": true}},
            "serverInfo": {"name": "fake-http", "version": "1.0.0"}
        }),
        "tools/list" => json!({
            "tools": [{"name": "echo", "inputSchema": {"type": "object"}}]
        }),
        _ => json!({}),
    }
}

/// Response to a JSON-RPC request; `None` for notifications and responses.
fn reply_to(message: &Value) -> Option<Value> {
    let id = message.get("id")?;
    let method = message.get("method")?.as_str()?;
    Some(json!({"jsonrpc": "2.0", "id": id, "result": answer(method)}))
}

async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<Recorded> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let len = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0; len];
    reader.read_exact(&mut body).await.ok()?;
    Some(Recorded {
        method,
        path,
        headers,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    })
}

async fn respond(stream: &mut TcpStream, status: &str, body: Option<&Value>) -> std::io::Result<()> {
    let body = body.map(Value::to_string).unwrap_or_default();
    let head = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body.as_bytes()).await?;
    stream.shutdown().await
}
