//! The long-lived Node.js subprocess and its request/response multiplexer.
//!
//! One runtime owns one child process. Callers issue commands through
//! [`JsRuntime::send_command`], which writes a JSON line to the child's stdin
//! and parks the caller on a one-shot reply slot; a single reader task parses
//! response lines off stdout and routes each to its slot by request id. The
//! child may answer out of order; the host never relies on arrival order.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use lessr_core::{Error, Result};
use lessr_protocol::{CommandRequest, CommandResponse, IpcMode, cmd};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};

/// The plugin host script shipped inside the crate. Materialized to a temp
/// file on start when no explicit path is configured.
const EMBEDDED_PLUGIN_HOST: &str = include_str!("../host/plugin-host.js");

/// Configuration for a [`JsRuntime`].
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    plugin_host_path: Option<PathBuf>,
    node_command: String,
    ipc_mode: Option<IpcMode>,
    request_timeout: Duration,
    shutdown_grace: Duration,
}

impl RuntimeOptions {
    /// Defaults: embedded host script, `node` from `PATH`, IPC mode from the
    /// environment, 30s request timeout, 2s shutdown grace.
    #[must_use]
    pub fn new() -> Self {
        Self {
            plugin_host_path: None,
            node_command: "node".to_string(),
            ipc_mode: None,
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
        }
    }

    /// Override the default plugin host script location.
    #[must_use]
    pub fn with_plugin_host_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugin_host_path = Some(path.into());
        self
    }

    /// Override the `node` executable.
    #[must_use]
    pub fn with_node_command(mut self, command: impl Into<String>) -> Self {
        self.node_command = command.into();
        self
    }

    /// Default function calls on this runtime to inline JSON marshalling.
    #[must_use]
    pub const fn with_json_mode(mut self) -> Self {
        self.ipc_mode = Some(IpcMode::Json);
        self
    }

    /// Default function calls on this runtime to shared-memory buffers.
    #[must_use]
    pub const fn with_shared_memory_mode(mut self) -> Self {
        self.ipc_mode = Some(IpcMode::SharedMemory);
        self
    }

    /// Set the per-request deadline used by the convenience wrappers.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the materialized embedded script alive for the child's lifetime.
enum HostScript {
    Explicit(PathBuf),
    Embedded(tempfile::NamedTempFile),
}

impl HostScript {
    fn path(&self) -> PathBuf {
        match self {
            Self::Explicit(path) => path.clone(),
            Self::Embedded(file) => file.path().to_path_buf(),
        }
    }
}

/// A supervised Node.js plugin host subprocess.
pub struct JsRuntime {
    options: RuntimeOptions,
    ipc_mode: IpcMode,
    next_id: AtomicU64,
    pending: Arc<DashMap<u64, oneshot::Sender<CommandResponse>>>,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    script: Mutex<Option<HostScript>>,
    started: AtomicBool,
    stopped: Arc<AtomicBool>,
}

impl JsRuntime {
    /// Create a runtime. The IPC mode resolves here: an explicit option wins,
    /// otherwise `LESS_JS_IPC_MODE` decides, defaulting to shared memory.
    #[must_use]
    pub fn new(options: RuntimeOptions) -> Self {
        let ipc_mode = options.ipc_mode.unwrap_or_else(IpcMode::from_env);
        Self {
            options,
            ipc_mode,
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            stdin: Mutex::new(None),
            child: Mutex::new(None),
            script: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The default IPC mode for function calls on this runtime.
    #[must_use]
    pub const fn ipc_mode(&self) -> IpcMode {
        self.ipc_mode
    }

    /// The per-request deadline the convenience wrappers apply.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.options.request_timeout
    }

    /// Whether the runtime has started and not yet stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    /// Spawn the child, wire up the pipes, and launch the reader and stderr
    /// drain tasks.
    ///
    /// # Errors
    ///
    /// Returns an error on double start or when the child cannot be spawned.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::protocol("Runtime already started"));
        }

        let script = match self.materialize_script() {
            Ok(script) => script,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let script_path = script.path();

        let spawned = Command::new(&self.options.node_command)
            .arg(&script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(Error::transport(format!(
                    "Failed to spawn {} {:?}: {}",
                    self.options.node_command, script_path, e
                )));
            }
        };

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::transport("Child has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transport("Child has no stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr));
        }

        tokio::spawn(read_responses(
            BufReader::new(stdout),
            Arc::clone(&self.pending),
            Arc::clone(&self.stopped),
        ));

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        *self.script.lock().await = Some(script);

        tracing::info!(
            "Plugin host started ({} {:?}, ipc mode {})",
            self.options.node_command,
            script_path,
            self.ipc_mode
        );
        Ok(())
    }

    /// Send a command and wait for its reply.
    ///
    /// Concurrent callers interleave safely: each request gets a fresh id and
    /// its own reply slot, and line writes are serialized.
    ///
    /// # Errors
    ///
    /// [`Error::RuntimeStopped`] when the runtime is not running or stops
    /// while waiting; [`Error::Protocol`] when the child reports failure.
    pub async fn send_command(&self, command: &str, data: Option<Value>) -> Result<Value> {
        let (_, receiver) = self.dispatch(command, data).await?;
        match receiver.await {
            Ok(response) => into_result(response),
            Err(_) => Err(Error::RuntimeStopped),
        }
    }

    /// [`JsRuntime::send_command`] with a deadline. On expiry the reply slot
    /// is removed and any eventual reply is dropped.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] on deadline expiry, otherwise as `send_command`.
    pub async fn send_command_with_timeout(
        &self,
        command: &str,
        data: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let (id, receiver) = self.dispatch(command, data).await?;
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => into_result(response),
            Ok(Err(_)) => Err(Error::RuntimeStopped),
            Err(_) => {
                self.pending.remove(&id);
                Err(Error::Timeout)
            }
        }
    }

    /// Liveness check.
    ///
    /// # Errors
    ///
    /// Returns an error when the child does not answer `"pong"`.
    pub async fn ping(&self) -> Result<()> {
        let result = self
            .send_command_with_timeout(cmd::PING, None, self.options.request_timeout)
            .await?;
        if result.as_str() == Some("pong") {
            Ok(())
        } else {
            Err(Error::protocol(format!("Unexpected ping reply: {}", result)))
        }
    }

    /// Round-trip arbitrary data through the child.
    ///
    /// # Errors
    ///
    /// Propagates any transport or protocol failure.
    pub async fn echo(&self, data: Value) -> Result<Value> {
        self.send_command_with_timeout(cmd::ECHO, Some(data), self.options.request_timeout)
            .await
    }

    /// Stop the child: `shutdown`, then SIGTERM, then SIGKILL. Every pending
    /// request fails with [`Error::RuntimeStopped`]. Idempotent.
    pub async fn stop(&self) {
        if !self.started.load(Ordering::SeqCst) || self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // Polite phase: the child acknowledges and exits on its own.
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let shutdown = CommandRequest::new(id, cmd::SHUTDOWN, None);
        if let Ok(line) = serde_json::to_string(&shutdown) {
            let (sender, receiver) = oneshot::channel();
            self.pending.insert(id, sender);
            let mut stdin = self.stdin.lock().await;
            if let Some(pipe) = stdin.as_mut() {
                let _ = pipe.write_all(line.as_bytes()).await;
                let _ = pipe.write_all(b"\n").await;
                let _ = pipe.flush().await;
            }
            // Closing stdin gives the child a second exit signal.
            *stdin = None;
            drop(stdin);
            let _ = tokio::time::timeout(self.options.shutdown_grace, receiver).await;
            self.pending.remove(&id);
        }

        let mut child_slot = self.child.lock().await;
        if let Some(child) = child_slot.as_mut() {
            let deadline = self.options.shutdown_grace;
            if tokio::time::timeout(deadline, child.wait()).await.is_err() {
                #[cfg(unix)]
                if let Some(pid) = child.id() {
                    // SAFETY: plain signal send to our own child's pid.
                    unsafe {
                        libc::kill(pid as i32, libc::SIGTERM);
                    }
                }
                if tokio::time::timeout(deadline, child.wait()).await.is_err() {
                    tracing::warn!("Plugin host ignored SIGTERM, killing");
                    let _ = child.kill().await;
                }
            }
        }
        *child_slot = None;
        *self.script.lock().await = None;

        fail_pending(&self.pending);
        tracing::info!("Plugin host stopped");
    }

    fn materialize_script(&self) -> Result<HostScript> {
        match &self.options.plugin_host_path {
            Some(path) => Ok(HostScript::Explicit(path.clone())),
            None => {
                let mut file = tempfile::Builder::new()
                    .prefix("lessr-plugin-host-")
                    .suffix(".js")
                    .tempfile()
                    .map_err(|e| {
                        Error::resource(format!("Failed to materialize plugin host: {}", e))
                    })?;
                use std::io::Write;
                file.write_all(EMBEDDED_PLUGIN_HOST.as_bytes())
                    .map_err(|e| Error::resource(format!("Failed to write plugin host: {}", e)))?;
                Ok(HostScript::Embedded(file))
            }
        }
    }

    async fn dispatch(
        &self,
        command: &str,
        data: Option<Value>,
    ) -> Result<(u64, oneshot::Receiver<CommandResponse>)> {
        if !self.is_running() {
            return Err(Error::RuntimeStopped);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CommandRequest::new(id, command, data);
        let line = serde_json::to_string(&request)?;

        let (sender, receiver) = oneshot::channel();
        self.pending.insert(id, sender);

        let mut stdin = self.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            self.pending.remove(&id);
            return Err(Error::RuntimeStopped);
        };
        let write = async {
            pipe.write_all(line.as_bytes()).await?;
            pipe.write_all(b"\n").await?;
            pipe.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        if let Err(e) = write.await {
            self.pending.remove(&id);
            return Err(Error::transport(format!("Failed to write request: {}", e)));
        }
        drop(stdin);

        tracing::debug!("Sent command {} (id {})", command, id);
        Ok((id, receiver))
    }
}

impl std::fmt::Debug for JsRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsRuntime")
            .field("ipc_mode", &self.ipc_mode)
            .field("running", &self.is_running())
            .field("pending", &self.pending.len())
            .finish()
    }
}

fn into_result(response: CommandResponse) -> Result<Value> {
    if response.success {
        Ok(response.result.unwrap_or(Value::Null))
    } else {
        Err(Error::protocol(
            response.error.unwrap_or_else(|| "Unspecified failure".to_string()),
        ))
    }
}

fn fail_pending(pending: &DashMap<u64, oneshot::Sender<CommandResponse>>) {
    let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        // Dropping the sender wakes the waiter with RuntimeStopped.
        pending.remove(&id);
    }
}

async fn read_responses(
    mut stdout: BufReader<tokio::process::ChildStdout>,
    pending: Arc<DashMap<u64, oneshot::Sender<CommandResponse>>>,
    stopped: Arc<AtomicBool>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match stdout.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<CommandResponse>(trimmed) {
                    Ok(response) => match pending.remove(&response.id) {
                        Some((_, sender)) => {
                            let _ = sender.send(response);
                        }
                        None => {
                            tracing::warn!(
                                "Reply for unknown or expired request id {}",
                                response.id
                            );
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Discarding malformed reply line: {} ({})", trimmed, e);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Plugin host stdout read failed: {}", e);
                break;
            }
        }
    }
    stopped.store(true, Ordering::SeqCst);
    fail_pending(&pending);
    tracing::debug!("Plugin host reader exited");
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let message = line.trim_end();
                if !message.is_empty() {
                    tracing::warn!("[plugin-host stderr] {}", message);
                }
            }
        }
    }
}
