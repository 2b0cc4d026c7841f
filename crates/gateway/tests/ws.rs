//! End-to-end WebSocket tests: a tokio-tungstenite client against a
//! gateway bound to an ephemeral port.

use std::{net::SocketAddr, sync::Arc};

use {
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
};

use {
    coldwire_exec::Executor,
    coldwire_gateway::{server::build_gateway_app, state::GatewayState},
};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_gateway_with(executor: Executor) -> SocketAddr {
    let state = GatewayState::new(executor);
    let app = build_gateway_app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn start_gateway() -> SocketAddr {
    start_gateway_with(Executor::new("sh", "claude", std::env::temp_dir())).await
}

/// Connect and consume the hello frame.
async fn connect(addr: SocketAddr) -> (Client, Value) {
    let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let hello = next_json(&mut client).await;
    (client, hello)
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        match client.next().await.expect("connection closed").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Send a command and collect frames until the terminal `exit`.
/// Returns (system announcement, output frames, exit frame).
async fn run_command(client: &mut Client, payload: Value) -> (Value, Vec<Value>, Value) {
    send_json(client, payload).await;
    let system = next_json(client).await;
    assert_eq!(system["type"], "system", "expected announcement: {system}");
    let mut output = Vec::new();
    loop {
        let frame = next_json(client).await;
        match frame["type"].as_str() {
            Some("exit") => return (system, output, frame),
            Some("stdout") | Some("stderr") => output.push(frame),
            other => panic!("unexpected frame type {other:?}: {frame}"),
        }
    }
}

fn stdout_text(output: &[Value]) -> String {
    output
        .iter()
        .filter(|f| f["type"] == "stdout")
        .filter_map(|f| f["message"].as_str())
        .collect()
}

#[tokio::test]
async fn hello_announces_root_and_features() {
    let addr = start_gateway().await;
    let (_client, hello) = connect(addr).await;

    assert_eq!(hello["type"], "system");
    assert!(hello["clientId"].as_str().unwrap().starts_with("client-"));
    assert!(hello["projectRoot"].as_str().is_some());
    assert!(hello["timestamp"].as_str().is_some());
    let features = hello["features"].as_array().unwrap();
    assert!(features.iter().any(|f| f == "auto-classification"));
}

#[tokio::test]
async fn ping_echoes_payload() {
    let addr = start_gateway().await;
    let (mut client, _) = connect(addr).await;

    send_json(&mut client, json!({"type": "ping", "data": "x"})).await;
    let pong = next_json(&mut client).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["message"], "pong");
    assert_eq!(pong["echo"], "x");

    send_json(&mut client, json!({"type": "ping"})).await;
    let pong = next_json(&mut client).await;
    assert!(pong["echo"].is_null());
}

#[tokio::test]
async fn malformed_json_is_reported_and_survivable() {
    let addr = start_gateway().await;
    let (mut client, _) = connect(addr).await;

    client
        .send(Message::Text("definitely not json".into()))
        .await
        .unwrap();
    let error = next_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert!(error["message"].as_str().unwrap().starts_with("Invalid JSON"));

    // Connection still works.
    send_json(&mut client, json!({"type": "ping", "data": 1})).await;
    assert_eq!(next_json(&mut client).await["type"], "pong");
}

#[tokio::test]
async fn unknown_type_lists_supported_and_keeps_connection() {
    let addr = start_gateway().await;
    let (mut client, _) = connect(addr).await;

    send_json(&mut client, json!({"type": "teleport"})).await;
    let error = next_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["message"], "Unknown message type: teleport");
    let supported: Vec<&str> = error["supportedTypes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(supported, ["command", "claude_command", "ping"]);

    send_json(&mut client, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut client).await["type"], "pong");
}

#[tokio::test]
async fn missing_command_field_is_a_validation_error() {
    let addr = start_gateway().await;
    let (mut client, _) = connect(addr).await;

    send_json(&mut client, json!({"type": "command"})).await;
    let error = next_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert!(
        error["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid command")
    );
}

#[tokio::test]
async fn shell_command_streams_output_and_exits_zero() {
    let addr = start_gateway().await;
    let (mut client, _) = connect(addr).await;

    let (system, output, exit) =
        run_command(&mut client, json!({"type": "command", "command": "echo hello"})).await;

    assert_eq!(system["commandType"], "shell");
    assert!(
        system["message"]
            .as_str()
            .unwrap()
            .starts_with("Executing shell command")
    );
    assert_eq!(stdout_text(&output).trim(), "hello");
    assert_eq!(exit["code"], 0);
    assert_eq!(exit["commandType"], "shell");
    assert_eq!(exit["message"], "Command completed successfully");
}

#[tokio::test]
async fn nonzero_exit_is_an_exit_frame_not_an_error() {
    let addr = start_gateway().await;
    let (mut client, _) = connect(addr).await;

    let (_system, _output, exit) =
        run_command(&mut client, json!({"type": "command", "command": "!exit 3"})).await;

    assert_eq!(exit["type"], "exit");
    assert_eq!(exit["code"], 3);
    assert_eq!(exit["message"], "Command exited with code 3");
}

#[tokio::test]
async fn stderr_frames_carry_the_stream_label() {
    let addr = start_gateway().await;
    let (mut client, _) = connect(addr).await;

    let (_system, output, exit) = run_command(
        &mut client,
        json!({"type": "command", "command": "!echo oops >&2"}),
    )
    .await;

    let stderr: String = output
        .iter()
        .filter(|f| f["type"] == "stderr")
        .filter_map(|f| f["message"].as_str())
        .collect();
    assert_eq!(stderr.trim(), "oops");
    assert_eq!(exit["code"], 0);
}

#[tokio::test]
async fn force_type_runs_agent_text_through_the_shell() {
    let addr = start_gateway().await;
    let (mut client, _) = connect(addr).await;

    let (system, _output, exit) = run_command(
        &mut client,
        json!({
            "type": "command",
            "command": "summarize the repository",
            "options": {"forceType": "shell"}
        }),
    )
    .await;

    assert_eq!(system["commandType"], "shell");
    // `sh -c "summarize the repository"` has no such binary: a normal
    // non-zero exit, still never an error frame.
    assert_ne!(exit["code"], 0);
    assert_eq!(exit["commandType"], "shell");
}

#[tokio::test]
async fn claude_command_alias_still_works() {
    let addr = start_gateway().await;
    let (mut client, _) = connect(addr).await;

    let (_system, output, exit) = run_command(
        &mut client,
        json!({"type": "claude_command", "command": "!echo legacy"}),
    )
    .await;

    assert_eq!(stdout_text(&output).trim(), "legacy");
    assert_eq!(exit["code"], 0);
}

#[tokio::test]
async fn agent_spawn_failure_is_an_error_with_os_detail() {
    let addr =
        start_gateway_with(Executor::new("sh", "coldwire-no-such-agent", std::env::temp_dir()))
            .await;
    let (mut client, _) = connect(addr).await;

    send_json(
        &mut client,
        json!({"type": "command", "command": "describe the build system"}),
    )
    .await;

    let system = next_json(&mut client).await;
    assert_eq!(system["type"], "system");
    assert_eq!(system["commandType"], "agent");

    let error = next_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert!(
        error["message"]
            .as_str()
            .unwrap()
            .starts_with("Failed to execute agent command")
    );
    assert_eq!(error["commandType"], "agent");
    assert!(error["details"].is_object());

    // The failed spawn left nothing behind; the session keeps serving.
    send_json(&mut client, json!({"type": "ping", "data": "still-alive"})).await;
    assert_eq!(next_json(&mut client).await["echo"], "still-alive");
}

#[tokio::test]
async fn binary_frames_are_decoded_as_text() {
    let addr = start_gateway().await;
    let (mut client, _) = connect(addr).await;

    let payload = json!({"type": "ping", "data": "bin"}).to_string();
    client
        .send(Message::Binary(payload.into_bytes().into()))
        .await
        .unwrap();
    let pong = next_json(&mut client).await;
    assert_eq!(pong["echo"], "bin");
}

#[tokio::test]
async fn health_reports_connection_count() {
    let addr = start_gateway().await;
    let (_client, _) = connect(addr).await;

    // Plain HTTP request over a raw socket keeps the dev-dependency
    // surface small.
    let body = http_get(addr, "/health").await;
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    let (_headers, body) = response
        .split_once("\r\n\r\n")
        .expect("malformed HTTP response");
    body.to_string()
}
