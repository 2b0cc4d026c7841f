//! Per-connection message handling and process ownership.
//!
//! One session owns one WebSocket link and every process spawned over it.
//! Inbound frames are decoded into a closed sum and matched exhaustively;
//! each spawned process gets a drain task translating its events into
//! outbound frames, and the owned-process map shrinks at exactly one call
//! site when a process reaches its terminal state.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use {
    axum::extract::ws::{CloseFrame, Message, WebSocket},
    futures::{SinkExt, StreamExt, stream::SplitSink},
    serde_json::Value,
    tokio::sync::{Mutex, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use {
    coldwire_exec::{OutputStream, ProcessEvent, ProcessHandle, classify},
    coldwire_protocol::{CommandKind, CommandOptions, Inbound, Outbound, decode, encode},
};

use crate::state::{ConnectedClient, GatewayState};

/// Feature set announced in the connection acknowledgment.
const FEATURES: &[&str] = &["shell-commands", "agent-commands", "auto-classification"];

/// WebSocket close code sent when the server is going away.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Command preview length in system frames and logs.
const PREVIEW_LEN: usize = 60;

// ── Connection lifecycle ─────────────────────────────────────────────────────

/// Drive one accepted WebSocket until it closes.
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, addr: SocketAddr) {
    let conn_id = format!("client-{}", Uuid::new_v4());
    let (sender, outbound_rx) = mpsc::unbounded_channel::<String>();

    info!(%conn_id, %addr, "client connected");

    state
        .register_client(ConnectedClient {
            conn_id: conn_id.clone(),
            sender: sender.clone(),
            connected_at: Instant::now(),
        })
        .await;

    let (ws_tx, mut ws_rx) = socket.split();
    let write_task = tokio::spawn(write_loop(ws_tx, outbound_rx, state.shutdown.clone()));

    let session = Session::new(conn_id.clone(), Arc::clone(&state), sender);
    session.send_hello();

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => session.handle_text(&text).await,
            Ok(Message::Binary(bytes)) => {
                // Some clients frame their JSON as binary.
                let text = String::from_utf8_lossy(&bytes).into_owned();
                session.handle_text(&text).await;
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {},
            Err(e) => {
                warn!(%conn_id, error = %e, "websocket error");
                break;
            },
        }
    }

    session.close().await;
    if let Some(client) = state.remove_client(&conn_id).await {
        info!(%conn_id, connected_for = ?client.connected_at.elapsed(), "client disconnected");
    }
    write_task.abort();
}

/// Forward queued frames to the socket. On gateway drain: flush whatever
/// is still queued (the shutdown notice included), then close 1001.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<String>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(frame) => {
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                },
                None => break,
            },
            _ = shutdown.cancelled() => {
                while let Ok(frame) = rx.try_recv() {
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        return;
                    }
                }
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            },
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

/// Server-side state for one client link: its outbound channel and the
/// processes it owns.
pub struct Session {
    conn_id: String,
    state: Arc<GatewayState>,
    sender: mpsc::UnboundedSender<String>,
    /// Owned processes, keyed by a session-local id. Constructed with the
    /// session and only ever shrinks once an entry is removed.
    processes: Arc<Mutex<HashMap<u64, ProcessHandle>>>,
    next_process_id: AtomicU64,
}

impl Session {
    pub fn new(
        conn_id: String,
        state: Arc<GatewayState>,
        sender: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            conn_id,
            state,
            sender,
            processes: Arc::new(Mutex::new(HashMap::new())),
            next_process_id: AtomicU64::new(0),
        }
    }

    /// Queue an outbound frame. A closed link drops it; process cleanup
    /// is the close path's job, so nothing can leak through here.
    fn send(&self, message: &Outbound) {
        let _ = self.sender.send(encode(message));
    }

    /// Connection acknowledgment: fixed working root plus feature set.
    pub fn send_hello(&self) {
        self.send(&Outbound::hello(
            "Connected to coldwire gateway",
            &self.conn_id,
            self.state.executor.project_root().display().to_string(),
            &self.state.version,
            FEATURES,
        ));
    }

    /// Decode and dispatch one inbound frame. Every failure mode is
    /// reported over the wire; none closes the connection.
    pub async fn handle_text(&self, raw: &str) {
        match decode(raw) {
            Err(e) => {
                warn!(conn_id = %self.conn_id, error = %e, "undecodable frame");
                self.send(&Outbound::error(format!("Invalid JSON: {e}")));
            },
            Ok(Inbound::Command { command, options }) => {
                self.handle_command(command, options).await;
            },
            Ok(Inbound::Ping { data }) => self.handle_ping(data),
            Ok(Inbound::Unknown { kind }) => {
                warn!(conn_id = %self.conn_id, kind = %kind, "unknown message type");
                self.send(&Outbound::unknown_type(&kind));
            },
        }
    }

    async fn handle_command(&self, command: Option<Value>, options: CommandOptions) {
        let raw = match command.as_ref().and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => s,
            _ => {
                self.send(&Outbound::error(
                    "Invalid command: 'command' field is required and must be a string",
                ));
                return;
            },
        };

        let (kind, text) = resolve(raw, &options);
        let preview = preview(&text);

        info!(conn_id = %self.conn_id, %kind, command = %preview, "executing command");
        self.send(&Outbound::system_for(
            kind,
            format!("Executing {kind} command: {preview}"),
        ));

        match self.state.executor.spawn(kind, &text) {
            Ok((handle, events)) => {
                let id = self.next_process_id.fetch_add(1, Ordering::Relaxed);
                self.processes.lock().await.insert(id, handle);
                self.drain_events(id, kind, events);
            },
            Err(e) => {
                warn!(conn_id = %self.conn_id, %kind, error = %e, "spawn failed");
                self.send(&Outbound::command_error(
                    kind,
                    format!("Failed to execute {kind} command: {}", e.source),
                    e.os_code(),
                ));
            },
        }
    }

    fn handle_ping(&self, data: Option<Value>) {
        self.send(&Outbound::pong(data.unwrap_or(Value::Null)));
    }

    /// Translate one process's events into outbound frames. The removal
    /// below is the only place a process leaves its owner's set.
    fn drain_events(
        &self,
        id: u64,
        kind: CommandKind,
        mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    ) {
        let sender = self.sender.clone();
        let processes = Arc::clone(&self.processes);
        let conn_id = self.conn_id.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ProcessEvent::Output { stream, chunk } => {
                        debug!(%conn_id, ?stream, len = chunk.len(), "process output");
                        let frame = match stream {
                            OutputStream::Stdout => Outbound::stdout(kind, chunk),
                            OutputStream::Stderr => Outbound::stderr(kind, chunk),
                        };
                        let _ = sender.send(encode(&frame));
                    },
                    ProcessEvent::Exited { code, signal } => {
                        info!(%conn_id, ?code, ?signal, %kind, "process exited");
                        let _ = sender.send(encode(&Outbound::exit(kind, code, signal)));
                        break;
                    },
                }
            }
            processes.lock().await.remove(&id);
        });
    }

    /// Terminate every process this connection still owns and clear the
    /// set. Fire-and-forget, and idempotent: a second close (or a close
    /// with nothing running) sees an empty set.
    pub async fn close(&self) {
        let mut processes = self.processes.lock().await;
        if processes.is_empty() {
            return;
        }
        info!(
            conn_id = %self.conn_id,
            count = processes.len(),
            "terminating orphaned processes"
        );
        for (_, handle) in processes.drain() {
            handle.terminate();
        }
    }

    /// Number of processes currently owned by this session.
    pub async fn process_count(&self) -> usize {
        self.processes.lock().await.len()
    }
}

// ── Command resolution ───────────────────────────────────────────────────────

/// Apply the classifier, or honor an explicit forceType. A forced message
/// always executes the raw trimmed text (never the marker-stripped form);
/// unrecognized force values fall back to the classifier's kind.
fn resolve(raw: &str, options: &CommandOptions) -> (CommandKind, String) {
    let classified = classify(raw);
    match options.force_type.as_deref() {
        None => (classified.kind, classified.command),
        Some(forced) => {
            let kind = match forced {
                "shell" => CommandKind::Shell,
                "agent" => CommandKind::Agent,
                _ => classified.kind,
            };
            (kind, raw.trim().to_string())
        },
    }
}

fn preview(command: &str) -> String {
    if command.chars().count() > PREVIEW_LEN {
        let head: String = command.chars().take(PREVIEW_LEN).collect();
        format!("{head}...")
    } else {
        command.to_string()
    }
}
