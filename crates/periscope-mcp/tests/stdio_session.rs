//! End-to-end tests against a scripted stdio MCP server.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use periscope_mcp::{
    ActionTarget, ConnectionState, DISCONNECTED_METHOD, Direction, ExecutionResult, Inspector,
    InspectorSettings, ListKind, McpError, Root, UiEvent,
};
use serde_json::{Map, json};

fn settings() -> InspectorSettings {
    InspectorSettings::default().with_debounce(Duration::from_millis(40))
}

fn args(value: serde_json::Value) -> Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_discovery_and_execution() {
    let dir = tempfile::tempdir().unwrap();
    let inspector = Inspector::new(settings());

    let caps = inspector
        .connect(common::fake_server(dir.path(), "fake"))
        .await
        .unwrap();
    assert!(caps.tools_list_changed);

    let conn = inspector.connection("fake").unwrap();
    assert_eq!(conn.state, ConnectionState::Connected);
    assert_eq!(conn.server_info.unwrap().name, "fake-server");

    let tools = inspector.list_tools("fake").await.unwrap();
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0].server, "fake");

    let listing = inspector.list_resources("fake").await.unwrap();
    assert_eq!(listing.resources.len(), 1);
    assert_eq!(listing.templates[0].parameters(), vec!["id".to_string()]);

    let cache = inspector.cached("fake").unwrap();
    assert_eq!(cache.tools.map(|t| t.len()), Some(2));
    assert!(cache.prompts.is_none());

    let result = inspector
        .execute("fake", &ActionTarget::Tool("echo".into()), args(json!({"text": "ping"})))
        .await
        .unwrap();
    let ExecutionResult::Tool(tool) = result else {
        panic!("expected a tool result");
    };
    assert_eq!(tool.text(), "pong");
    assert!(!tool.is_error);

    let result = inspector
        .execute(
            "fake",
            &ActionTarget::ResourceTemplate("mem://notes/{id}".into()),
            args(json!({"id": "7"})),
        )
        .await
        .unwrap();
    let ExecutionResult::Resource(contents) = result else {
        panic!("expected resource contents");
    };
    assert_eq!(contents[0].uri, "mem://notes/7");
    assert_eq!(contents[0].text.as_deref(), Some("body of mem://notes/7"));

    let result = inspector
        .execute("fake", &ActionTarget::Prompt("greet".into()), args(json!({"who": "you"})))
        .await
        .unwrap();
    let ExecutionResult::Prompt(prompt) = result else {
        panic!("expected a prompt");
    };
    assert_eq!(prompt.messages[0].content, "hello there");

    // Every request and response is in the history.
    let history = inspector.interactions_for("fake");
    assert!(history.iter().any(|r| r.direction == Direction::Sent
        && r.payload["method"] == "tools/call"));
    assert!(history.iter().any(|r| r.direction == Direction::Received
        && r.payload["method"] == "tools/call"));

    inspector.shutdown().await;
    assert!(inspector.connections().is_empty());
}

#[tokio::test]
async fn test_forms_gate_execution() {
    let dir = tempfile::tempdir().unwrap();
    let inspector = Inspector::new(settings());
    inspector
        .connect(common::fake_server(dir.path(), "fake"))
        .await
        .unwrap();

    let target = ActionTarget::Tool("echo".into());
    let form = inspector.form_for("fake", &target).await.unwrap();
    form.mount_all();
    assert!(!form.can_execute());
    assert!(matches!(
        inspector.execute_form("fake", &target, &form).await,
        Err(McpError::InvalidTarget(_))
    ));

    form.set_value("text", "hi").unwrap();
    let result = inspector.execute_form("fake", &target, &form).await.unwrap();
    assert!(matches!(result, ExecutionResult::Tool(_)));

    let prompt = ActionTarget::Prompt("greet".into());
    let form = inspector.form_for("fake", &prompt).await.unwrap();
    form.mount_all();
    assert!(!form.can_execute());
    form.set_value("who", "world").unwrap();
    assert!(form.can_execute());

    inspector.shutdown().await;
}

#[tokio::test]
async fn test_application_error_keeps_connection() {
    let dir = tempfile::tempdir().unwrap();
    let inspector = Inspector::new(settings());
    inspector
        .connect(common::fake_server(dir.path(), "fake"))
        .await
        .unwrap();

    let err = inspector
        .execute("fake", &ActionTarget::Tool("fail".into()), Map::new())
        .await
        .unwrap_err();
    match err {
        McpError::Tool { server, tool, message } => {
            assert_eq!(server, "fake");
            assert_eq!(tool, "fail");
            assert!(message.contains("tool exploded"));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        inspector.connection("fake").unwrap().state,
        ConnectionState::Connected
    );

    // Still usable.
    assert!(inspector.list_tools("fake").await.is_ok());
    inspector.shutdown().await;
}

#[tokio::test]
async fn test_list_changed_burst_refreshes_once() {
    let dir = tempfile::tempdir().unwrap();
    let inspector = Inspector::new(settings());
    let (callback, mut events) = common::event_channel();
    inspector.subscribe("fake", callback);
    inspector
        .connect(common::fake_server(dir.path(), "fake"))
        .await
        .unwrap();

    inspector
        .execute("fake", &ActionTarget::Tool("touch".into()), Map::new())
        .await
        .unwrap();

    let event = common::next_matching(&mut events, |e| {
        matches!(e, UiEvent::Refreshed { .. } | UiEvent::RefreshFailed { .. })
    })
    .await;
    assert_eq!(
        event,
        UiEvent::Refreshed {
            server_id: "fake".into(),
            kind: ListKind::Tools,
            count: 2,
        }
    );
    let toast = common::next_matching(&mut events, |e| matches!(e, UiEvent::Toast(_))).await;
    let UiEvent::Toast(toast) = toast else {
        unreachable!()
    };
    assert_eq!(toast.message, "fake: tools list refreshed (2 items)");

    // No second refresh for the same burst.
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, UiEvent::Refreshed { .. }), "extra refresh: {event:?}");
    }
    assert!(inspector.cached("fake").unwrap().tools.is_some());

    inspector.shutdown().await;
}

#[tokio::test]
async fn test_process_exit_mid_call_fails_connection() {
    let dir = tempfile::tempdir().unwrap();
    let inspector = Inspector::new(settings());
    let (callback, mut events) = common::event_channel();
    inspector.subscribe("fake", callback);
    inspector
        .connect(common::fake_server(dir.path(), "fake"))
        .await
        .unwrap();
    let mut state = inspector.watch("fake").unwrap();

    let err = inspector
        .execute("fake", &ActionTarget::Tool("crash".into()), Map::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, McpError::TransportFailure { .. }),
        "unexpected error: {err}"
    );

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|c| c.state == ConnectionState::Failed),
    )
    .await
    .unwrap()
    .unwrap();

    let event = common::next_matching(&mut events, |e| matches!(e, UiEvent::Log(_))).await;
    let UiEvent::Log(notification) = event else {
        unreachable!()
    };
    assert_eq!(notification.method.as_deref(), Some(DISCONNECTED_METHOD));

    // Further calls fail fast instead of hanging.
    let err = inspector.list_tools("fake").await.unwrap_err();
    assert!(!matches!(err, McpError::ServerNotFound { .. }));

    inspector.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_interrupts_pending_call() {
    let dir = tempfile::tempdir().unwrap();
    let inspector = Arc::new(Inspector::new(settings()));
    inspector
        .connect(common::fake_server(dir.path(), "fake"))
        .await
        .unwrap();

    let pending = {
        let inspector = Arc::clone(&inspector);
        tokio::spawn(async move {
            inspector
                .execute("fake", &ActionTarget::Tool("hang".into()), Map::new())
                .await
        })
    };
    // Let the request reach the server.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut state = inspector.watch("fake").unwrap();
    tokio::time::timeout(Duration::from_secs(10), inspector.disconnect("fake"))
        .await
        .unwrap()
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(McpError::Disconnected { .. })));
    assert_eq!(state.borrow_and_update().state, ConnectionState::Disconnected);
    assert!(inspector.connection("fake").is_none());
}

#[tokio::test]
async fn test_roots_are_announced() {
    let dir = tempfile::tempdir().unwrap();
    let inspector = Inspector::new(settings());
    inspector
        .connect(common::fake_server(dir.path(), "fake"))
        .await
        .unwrap();

    let roots = inspector
        .add_root("fake", Root::new("file:///work").with_name("work"))
        .await
        .unwrap();
    assert_eq!(roots.len(), 1);
    assert!(matches!(
        inspector.add_root("fake", Root::new("file:///work")).await,
        Err(McpError::Root { .. })
    ));
    assert_eq!(inspector.get_roots("fake").unwrap(), roots);

    let announced = inspector
        .interactions_for("fake")
        .iter()
        .filter(|r| r.payload["method"] == "notifications/roots/list_changed")
        .count();
    assert_eq!(announced, 1);

    assert!(inspector.remove_root("fake", "file:///work").await.unwrap().is_empty());
    inspector.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_replaces_session() {
    let dir = tempfile::tempdir().unwrap();
    let inspector = Inspector::new(settings());
    let config = common::fake_server(dir.path(), "fake");

    inspector.connect(config.clone()).await.unwrap();
    inspector.list_tools("fake").await.unwrap();
    inspector.connect(config).await.unwrap();

    assert_eq!(inspector.connections().len(), 1);
    assert!(inspector.cached("fake").unwrap().tools.is_none());
    assert!(inspector.list_tools("fake").await.is_ok());
    inspector.shutdown().await;
}

#[tokio::test]
async fn test_missing_template_listing_keeps_resources() {
    let dir = tempfile::tempdir().unwrap();
    let inspector = Inspector::new(settings());
    inspector
        .connect(common::fake_server(dir.path(), "fake").with_env("NO_TEMPLATES", "1"))
        .await
        .unwrap();

    let listing = inspector.list_resources("fake").await.unwrap();
    assert_eq!(listing.resources.len(), 1);
    assert!(listing.templates.is_empty());
    assert_eq!(
        inspector.connection("fake").unwrap().state,
        ConnectionState::Connected
    );
    inspector.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_during_handshake_wins() {
    let dir = tempfile::tempdir().unwrap();
    let inspector = Arc::new(Inspector::new(settings()));
    let config = common::fake_server(dir.path(), "fake").with_env("SLOW_INIT", "1");

    let connecting = {
        let inspector = Arc::clone(&inspector);
        tokio::spawn(async move { inspector.connect(config).await })
    };
    // The server is still sleeping before its initialize reply.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut state = inspector.watch("fake").unwrap();
    inspector.disconnect("fake").await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), connecting)
        .await
        .unwrap()
        .unwrap();
    assert!(
        matches!(result, Err(McpError::Disconnected { .. })),
        "unexpected result: {result:?}"
    );
    assert_eq!(state.borrow_and_update().state, ConnectionState::Disconnected);
    assert!(inspector.connection("fake").is_none());
}
