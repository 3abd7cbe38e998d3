//! Protocol client integration tests
//!
//! A fake tsserver runs over in-memory duplex pipes: the test reads the
//! newline-terminated requests the client writes and answers with
//! `Content-Length` framed responses and events.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tsmill_config::TsServerConfig;
use tsmill_foundation::TsMillError;
use tsmill_tsserver::framing::encode_frame;
use tsmill_tsserver::TsServerClient;

const PIPE_CAPACITY: usize = 64 * 1024;

struct FakeTsServer {
    requests: Lines<BufReader<DuplexStream>>,
    output: DuplexStream,
}

impl FakeTsServer {
    async fn next_request(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.requests.next_line())
            .await
            .expect("client should write a request")
            .expect("request pipe readable")
            .expect("request pipe open");
        serde_json::from_str(&line).expect("request is one JSON line")
    }

    async fn expect_request(&mut self, command: &str) -> Value {
        let request = self.next_request().await;
        assert_eq!(request["type"], "request");
        assert_eq!(request["command"], command, "unexpected request {request}");
        request
    }

    async fn send(&mut self, message: Value) {
        let mut body = message.to_string();
        body.push('\n');
        self.output.write_all(&encode_frame(&body)).await.unwrap();
        self.output.flush().await.unwrap();
    }

    async fn respond(&mut self, request: &Value, body: Value) {
        self.send(json!({
            "seq": 0,
            "type": "response",
            "command": request["command"],
            "request_seq": request["seq"],
            "success": true,
            "body": body
        }))
        .await;
    }

    async fn fail(&mut self, request: &Value, message: Option<&str>) {
        let mut response = json!({
            "seq": 0,
            "type": "response",
            "command": request["command"],
            "request_seq": request["seq"],
            "success": false
        });
        if let Some(message) = message {
            response["message"] = json!(message);
        }
        self.send(response).await;
    }

    async fn event(&mut self, name: &str) {
        self.send(json!({"seq": 0, "type": "event", "event": name, "body": {}}))
            .await;
    }
}

fn client_with_timeout(request_timeout_ms: u64) -> Arc<TsServerClient> {
    Arc::new(TsServerClient::new(TsServerConfig {
        request_timeout_ms,
        ..TsServerConfig::default()
    }))
}

/// Attach `client` to a fresh fake server and answer the initial `configure`
async fn connect(client: &TsServerClient, root: &std::path::Path) -> FakeTsServer {
    let (client_out, server_in) = tokio::io::duplex(PIPE_CAPACITY);
    let (server_out, client_in) = tokio::io::duplex(PIPE_CAPACITY);
    client.attach(client_in, client_out, root).await.unwrap();

    let mut server = FakeTsServer {
        requests: BufReader::new(server_in).lines(),
        output: server_out,
    };
    let configure = server.expect_request("configure").await;
    assert_eq!(configure["arguments"]["hostInfo"], "tsmill");
    server.respond(&configure, Value::Null).await;
    server
}

async fn wait_for_latch(client: &TsServerClient, loaded: bool) {
    for _ in 0..200 {
        if client.is_project_loaded().await == loaded {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("project-loaded latch never became {loaded}");
}

async fn wait_for_exit(client: &TsServerClient) {
    for _ in 0..200 {
        if !client.is_running().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session still running");
}

// ============================================================================
// Request / response matching
// ============================================================================

#[tokio::test]
async fn test_sequence_numbers_start_at_one() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_timeout(2_000);

    let (client_out, server_in) = tokio::io::duplex(PIPE_CAPACITY);
    let (server_out, client_in) = tokio::io::duplex(PIPE_CAPACITY);
    client.attach(client_in, client_out, dir.path()).await.unwrap();
    let mut server = FakeTsServer {
        requests: BufReader::new(server_in).lines(),
        output: server_out,
    };

    let configure = server.expect_request("configure").await;
    assert_eq!(configure["seq"], 1);
    server.respond(&configure, Value::Null).await;

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.send_request("projectInfo", None).await })
    };
    let request = server.expect_request("projectInfo").await;
    assert_eq!(request["seq"], 2);
    assert!(request.get("arguments").is_none());
    server.respond(&request, json!({"fileNames": []})).await;

    let body = pending.await.unwrap().unwrap();
    assert_eq!(body, Some(json!({"fileNames": []})));
}

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_timeout(2_000);
    let mut server = connect(&client, dir.path()).await;

    let first = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .send_request("quickinfo", Some(json!({"file": "/a.ts", "line": 1, "offset": 1})))
                .await
        })
    };
    let first_request = server.expect_request("quickinfo").await;

    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.send_request("projectInfo", Some(json!({"file": "/a.ts"}))).await })
    };
    let second_request = server.expect_request("projectInfo").await;

    server.respond(&second_request, json!({"answer": "second"})).await;
    server.respond(&first_request, json!({"answer": "first"})).await;

    assert_eq!(
        first.await.unwrap().unwrap(),
        Some(json!({"answer": "first"}))
    );
    assert_eq!(
        second.await.unwrap().unwrap(),
        Some(json!({"answer": "second"}))
    );
    assert_eq!(client.pending_requests().await, 0);
}

#[tokio::test]
async fn test_typed_request_deserializes_body() {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Info {
        config_file_name: String,
    }

    let dir = tempfile::tempdir().unwrap();
    let client = client_with_timeout(2_000);
    let mut server = connect(&client, dir.path()).await;

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.request::<Info>("projectInfo", None).await })
    };
    let request = server.expect_request("projectInfo").await;
    server
        .respond(&request, json!({"configFileName": "/repo/tsconfig.json"}))
        .await;

    let info = pending.await.unwrap().unwrap().unwrap();
    assert_eq!(info.config_file_name, "/repo/tsconfig.json");
}

#[tokio::test]
async fn test_unsuccessful_response_rejects_with_server_message() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_timeout(2_000);
    let mut server = connect(&client, dir.path()).await;

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.send_request("rename", None).await })
    };
    let request = server.expect_request("rename").await;
    server.fail(&request, Some("No Project.")).await;

    match pending.await.unwrap() {
        Err(TsMillError::Server { command, message }) => {
            assert_eq!(command, "rename");
            assert_eq!(message, "No Project.");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unsuccessful_response_without_message_uses_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_timeout(2_000);
    let mut server = connect(&client, dir.path()).await;

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.send_request("getCodeFixes", None).await })
    };
    let request = server.expect_request("getCodeFixes").await;
    server.fail(&request, None).await;

    match pending.await.unwrap() {
        Err(TsMillError::Server { command, message }) => {
            assert_eq!(command, "getCodeFixes");
            assert_eq!(message, "tsserver reported failure for 'getCodeFixes'");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_request_timeout_names_command_and_late_reply_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_timeout(100);
    let mut server = connect(&client, dir.path()).await;

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.send_request("getEditsForRefactor", None).await })
    };
    let request = server.expect_request("getEditsForRefactor").await;

    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("getEditsForRefactor"));
    assert_eq!(client.pending_requests().await, 0);

    // A reply after the timeout has nobody waiting and must not wedge the reader
    server.respond(&request, json!({"late": true})).await;

    let next = {
        let client = client.clone();
        tokio::spawn(async move { client.send_request("projectInfo", None).await })
    };
    let request = server.expect_request("projectInfo").await;
    server.respond(&request, json!({"ok": true})).await;
    assert_eq!(next.await.unwrap().unwrap(), Some(json!({"ok": true})));
}

#[tokio::test]
async fn test_response_split_across_writes() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_timeout(2_000);
    let mut server = connect(&client, dir.path()).await;

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.send_request("navtree", None).await })
    };
    let request = server.expect_request("navtree").await;

    let mut body = json!({
        "seq": 0,
        "type": "response",
        "command": "navtree",
        "request_seq": request["seq"],
        "success": true,
        "body": {"text": "héllo wörld"}
    })
    .to_string();
    body.push('\n');
    let frame = encode_frame(&body);

    for piece in [&frame[..7], &frame[7..30], &frame[30..]] {
        server.output.write_all(piece).await.unwrap();
        server.output.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let body = pending.await.unwrap().unwrap().unwrap();
    assert_eq!(body["text"], "héllo wörld");
}

// ============================================================================
// Events and the project-loaded latch
// ============================================================================

#[tokio::test]
async fn test_loading_events_move_latch() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_timeout(2_000);
    let mut server = connect(&client, dir.path()).await;

    assert!(client.is_project_loaded().await, "optimistic initial value");

    server.event("projectLoadingStart").await;
    wait_for_latch(&client, false).await;

    server.event("typingsInstallerPid").await;
    server.event("projectLoadingFinish").await;
    wait_for_latch(&client, true).await;

    server.event("projectLoadingStart").await;
    wait_for_latch(&client, false).await;
    server.event("projectsUpdatedInBackground").await;
    wait_for_latch(&client, true).await;
}

#[tokio::test]
async fn test_open_file_sends_content_and_sets_latch() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("index.ts");
    std::fs::write(&file, "export const answer = 42;\n").unwrap();

    let client = client_with_timeout(2_000);
    let mut server = connect(&client, dir.path()).await;

    server.event("projectLoadingStart").await;
    wait_for_latch(&client, false).await;

    client.open_file(&file).await.unwrap();
    assert!(client.is_project_loaded().await);
    assert_eq!(client.pending_requests().await, 0);

    let open = server.expect_request("open").await;
    assert_eq!(open["arguments"]["file"], &*file.to_string_lossy());
    assert_eq!(open["arguments"]["fileContent"], "export const answer = 42;\n");
}

#[tokio::test]
async fn test_open_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_timeout(2_000);
    let _server = connect(&client, dir.path()).await;

    let err = client.open_file(&dir.path().join("nope.ts")).await.unwrap_err();
    assert!(matches!(err, TsMillError::Io { .. }));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_attach_while_running_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_timeout(2_000);
    let _server = connect(&client, dir.path()).await;

    let (client_out, _server_in) = tokio::io::duplex(PIPE_CAPACITY);
    let (_server_out, client_in) = tokio::io::duplex(PIPE_CAPACITY);
    let err = client.attach(client_in, client_out, dir.path()).await.unwrap_err();
    assert!(matches!(err, TsMillError::AlreadyRunning));
}

#[tokio::test]
async fn test_stop_orphans_pending_requests_until_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_timeout(300);
    let mut server = connect(&client, dir.path()).await;

    let pending = {
        let client = client.clone();
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = client.send_request("organizeImports", None).await;
            (result, started.elapsed())
        })
    };
    server.expect_request("organizeImports").await;

    client.stop().await;
    assert!(!client.is_running().await);
    assert!(matches!(
        client.send_request("projectInfo", None).await,
        Err(TsMillError::NotRunning)
    ));

    let (result, waited) = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("orphaned request still resolves")
        .unwrap();
    let err = result.unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert!(err.to_string().contains("organizeImports"));
    assert!(waited >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_server_exit_marks_session_not_running() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_timeout(2_000);
    let server = connect(&client, dir.path()).await;

    drop(server);
    wait_for_exit(&client).await;
    assert!(matches!(
        client.send_request("projectInfo", None).await,
        Err(TsMillError::NotRunning)
    ));
}

#[tokio::test]
async fn test_reattach_after_exit_starts_fresh_session() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_timeout(2_000);
    let mut server = connect(&client, dir.path()).await;

    server.event("projectLoadingStart").await;
    wait_for_latch(&client, false).await;
    drop(server);
    wait_for_exit(&client).await;

    let (client_out, server_in) = tokio::io::duplex(PIPE_CAPACITY);
    let (server_out, client_in) = tokio::io::duplex(PIPE_CAPACITY);
    client.attach(client_in, client_out, dir.path()).await.unwrap();
    let mut server = FakeTsServer {
        requests: BufReader::new(server_in).lines(),
        output: server_out,
    };

    // Sequence numbers and the latch start over for the new session
    let configure = server.expect_request("configure").await;
    assert_eq!(configure["seq"], 1);
    assert!(client.is_running().await);
    assert!(client.is_project_loaded().await);
}

#[tokio::test]
async fn test_isolated_clients_do_not_share_state() {
    let dir = tempfile::tempdir().unwrap();
    let first = client_with_timeout(2_000);
    let second = client_with_timeout(2_000);

    let mut first_server = connect(&first, dir.path()).await;
    let _second_server = connect(&second, dir.path()).await;

    first_server.event("projectLoadingStart").await;
    wait_for_latch(&first, false).await;
    assert!(second.is_project_loaded().await);

    first.stop().await;
    assert!(!first.is_running().await);
    assert!(second.is_running().await);
}
