//! Child process orchestration: spawn, stream, terminate.
//!
//! Each spawned command gets its own event channel. Output chunks are
//! forwarded as soon as they are read, in per-stream order; exactly one
//! `Exited` event closes the stream once the child is gone and both
//! pipes have reached EOF.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use {
    tokio::{
        io::{AsyncRead, AsyncReadExt},
        process::{Child, Command},
        sync::mpsc,
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use coldwire_protocol::CommandKind;

/// Read size for the stdout/stderr pipes.
const CHUNK_SIZE: usize = 8 * 1024;

/// Which pipe a chunk was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Lifecycle events emitted by a running process.
///
/// `Exited` is terminal and arrives exactly once, after every `Output`
/// event. A non-zero exit code is a normal outcome, not an error.
#[derive(Debug)]
pub enum ProcessEvent {
    Output {
        stream: OutputStream,
        chunk: String,
    },
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
}

/// The OS could not create the process. Emitted instead of, never in
/// addition to, an `Exited` event.
#[derive(Debug, thiserror::Error)]
#[error("failed to spawn {kind} command: {source}")]
pub struct SpawnError {
    pub kind: CommandKind,
    #[source]
    pub source: std::io::Error,
}

impl SpawnError {
    /// Raw OS error code (e.g. ENOENT), for wire-level error details.
    pub fn os_code(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

/// Termination handle for a spawned process, held in the owning
/// connection's process set.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub kind: CommandKind,
    pub command: String,
    cancel: CancellationToken,
}

impl ProcessHandle {
    /// Request termination. Fire-and-forget: does not wait for the child
    /// to die, and calling it on an already-terminated process (or more
    /// than once) is a no-op.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }
}

/// Spawns classified commands as child processes. The project root,
/// shell and agent binaries are fixed at startup and read-only after.
#[derive(Debug, Clone)]
pub struct Executor {
    shell: String,
    agent: String,
    project_root: PathBuf,
}

impl Executor {
    pub fn new(
        shell: impl Into<String>,
        agent: impl Into<String>,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            shell: shell.into(),
            agent: agent.into(),
            project_root: project_root.into(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Spawn `command` according to `kind` and return its termination
    /// handle plus the event channel the owner drains.
    pub fn spawn(
        &self,
        kind: CommandKind,
        command: &str,
    ) -> Result<(ProcessHandle, mpsc::UnboundedReceiver<ProcessEvent>), SpawnError> {
        let child = self
            .build_command(kind, command)
            .spawn()
            .map_err(|source| SpawnError { kind, source })?;

        debug!(%kind, pid = child.id(), "spawned child process");

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        drive(child, tx, cancel.clone());

        let handle = ProcessHandle {
            kind,
            command: command.to_string(),
            cancel,
        };
        Ok((handle, rx))
    }

    fn build_command(&self, kind: CommandKind, command: &str) -> Command {
        let mut cmd = match kind {
            // The whole string goes to the shell as one argument, so
            // pipes, redirection and globbing work as written.
            CommandKind::Shell => {
                let mut cmd = Command::new(&self.shell);
                cmd.arg("-c").arg(command);
                cmd
            },
            // Print mode; TERM=dumb keeps the agent from emitting
            // interactive ANSI sequences.
            CommandKind::Agent => {
                let mut cmd = Command::new(&self.agent);
                cmd.arg("-p").arg(command).env("TERM", "dumb");
                cmd
            },
        };
        cmd.current_dir(&self.project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Forward one pipe to the event channel, chunk by chunk, until EOF.
fn forward_stream(
    mut reader: impl AsyncRead + Unpin + Send + 'static,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<ProcessEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if tx
                        .send(ProcessEvent::Output { stream, chunk })
                        .is_err()
                    {
                        break;
                    }
                },
            }
        }
    })
}

/// Own the child until it terminates: race wait against a termination
/// request, then drain both readers so `Exited` is the last event.
fn drive(mut child: Child, tx: mpsc::UnboundedSender<ProcessEvent>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let stdout_task = child
            .stdout
            .take()
            .map(|s| forward_stream(s, OutputStream::Stdout, tx.clone()));
        let stderr_task = child
            .stderr
            .take()
            .map(|s| forward_stream(s, OutputStream::Stderr, tx.clone()));

        let mut kill_sent = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = cancel.cancelled(), if !kill_sent => {
                    kill_sent = true;
                    debug!(pid = child.id(), "termination requested, killing child");
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "failed to kill child process");
                    }
                },
            }
        };

        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let event = match status {
            Ok(status) => ProcessEvent::Exited {
                code: status.code(),
                signal: exit_signal(&status),
            },
            Err(e) => {
                warn!(error = %e, "waiting on child process failed");
                ProcessEvent::Exited {
                    code: None,
                    signal: None,
                }
            },
        };
        let _ = tx.send(event);
    });
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
