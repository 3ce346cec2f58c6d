//! Shared fixtures: a scripted stdio MCP server, local HTTP servers and
//! event collection.

#![allow(dead_code)]

pub mod http;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use periscope_mcp::{EventCallback, ServerConfig, UiEvent};
use tokio::sync::mpsc;

/// A line-oriented MCP server in POSIX sh.
///
/// Tools: `echo` (returns "pong"), `touch` (announces three tool list
/// changes, then returns), `fail` (JSON-RPC error), `hang` (never answers),
/// `crash` (exits mid-call).
///
/// `SLOW_INIT=<secs>` delays the initialize reply. `NO_TEMPLATES=1` answers
/// `resources/templates/list` with method-not-found, as does any other
/// unknown request.
const FAKE_SERVER: &str = r#"#!/bin/sh
send() { printf '%s\n' "$1"; }
reply() { send "{\"jsonrpc\":\"2.0\",\"id\":$1,\"result\":$2}"; }
unknown() { send "{\"jsonrpc\":\"2.0\",\"id\":$1,\"error\":{\"code\":-32601,\"message\":\"Method not found\"}}"; }

while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{[^{}]*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      [ -n "$SLOW_INIT" ] && sleep "$SLOW_INIT"
      reply "$id" '{"protocolVersion":"2025-03-26","capabilities":{"tools":{"listChanged":true},"prompts":{"listChanged":true},"resources":{"listChanged":true}},"serverInfo":{"name":"fake-server","version":"1.0.0"}}'
      ;;
    *'"method":"tools/list"'*)
      reply "$id" '{"tools":[{"name":"echo","description":"Echo","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]}},{"name":"touch","inputSchema":{"type":"object"}}]}'
      ;;
    *'"method":"tools/call"'*'"name":"crash"'*)
      exit 3
      ;;
    *'"method":"tools/call"'*'"name":"hang"'*)
      ;;
    *'"method":"tools/call"'*'"name":"fail"'*)
      send "{\"jsonrpc\":\"2.0\",\"id\":$id,\"error\":{\"code\":-32602,\"message\":\"tool exploded\"}}"
      ;;
    *'"method":"tools/call"'*'"name":"touch"'*)
      send '{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}'
      send '{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}'
      send '{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}'
      reply "$id" '{"content":[{"type":"text","text":"touched"}]}'
      ;;
    *'"method":"tools/call"'*)
      reply "$id" '{"content":[{"type":"text","text":"pong"}],"isError":false}'
      ;;
    *'"method":"prompts/list"'*)
      reply "$id" '{"prompts":[{"name":"greet","description":"Say hello","arguments":[{"name":"who","required":true}]}]}'
      ;;
    *'"method":"prompts/get"'*)
      reply "$id" '{"description":"Greeting","messages":[{"role":"user","content":{"type":"text","text":"hello there"}}]}'
      ;;
    *'"method":"resources/list"'*)
      reply "$id" '{"resources":[{"uri":"mem://readme","name":"readme","mimeType":"text/plain"}]}'
      ;;
    *'"method":"resources/templates/list"'*)
      if [ -n "$NO_TEMPLATES" ]; then
        unknown "$id"
        continue
      fi
      reply "$id" '{"resourceTemplates":[{"uriTemplate":"mem://notes/{id}","name":"note"}]}'
      ;;
    *'"method":"resources/read"'*)
      uri=$(printf '%s' "$line" | sed -n 's/.*"uri":"\([^"]*\)".*/\1/p')
      reply "$id" "{\"contents\":[{\"uri\":\"$uri\",\"mimeType\":\"text/plain\",\"text\":\"body of $uri\"}]}"
      ;;
    *'"method":"ping"'*)
      reply "$id" '{}'
      ;;
    *)
      [ -n "$id" ] && unknown "$id"
      ;;
  esac
done
"#;

/// Write the fake server into `dir` and return a config that runs it.
pub fn fake_server(dir: &Path, id: &str) -> ServerConfig {
    let script = dir.join("fake_server.sh");
    std::fs::write(&script, FAKE_SERVER).expect("write fake server");
    ServerConfig::stdio(id, "sh").with_args([script.to_string_lossy().into_owned()])
}

/// Callback that forwards events into a channel.
pub fn event_channel() -> (EventCallback, mpsc::UnboundedReceiver<UiEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: EventCallback = Arc::new(move |event: &UiEvent| {
        let _ = tx.send(event.clone());
    });
    (callback, rx)
}

/// Callback that appends events to a shared vector.
pub fn event_log() -> (EventCallback, Arc<Mutex<Vec<UiEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: EventCallback = Arc::new(move |event: &UiEvent| {
        sink.lock().unwrap().push(event.clone());
    });
    (callback, events)
}

/// Wait for the next event matching `pred`, skipping others.
pub async fn next_matching(
    rx: &mut mpsc::UnboundedReceiver<UiEvent>,
    pred: impl Fn(&UiEvent) -> bool,
) -> UiEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
