//! tsserver client: owns one session over the subprocess's standard streams
//!
//! Requests are matched to responses strictly by sequence number, so
//! concurrent requests may complete out of order. Events and responses are
//! demultiplexed from the same input stream in arrival order.

use crate::framing::MessageFramer;
use crate::process;
use crate::protocol::{wire_path, EventMessage, InboundMessage, Request, ResponseMessage, ServerEvent};
use crate::session::ServerSession;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, trace, warn};
use tsmill_config::TsServerConfig;
use tsmill_foundation::{TsMillError, TsMillResult};

/// Read size for the stdout pump
const READ_CHUNK_SIZE: usize = 8 * 1024;
/// Buffer size for the outbound request channel
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Pending requests by sequence number
type PendingRequests = Mutex<HashMap<u64, oneshot::Sender<ResponseMessage>>>;

/// Flags and in-flight requests of one session
struct SessionState {
    running: AtomicBool,
    project_loaded: AtomicBool,
    next_seq: AtomicU64,
    pending: PendingRequests,
}

impl SessionState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            // tsserver answers while it indexes in the background
            project_loaded: AtomicBool::new(true),
            next_seq: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    async fn dispatch(&self, raw: Value) {
        match serde_json::from_value::<InboundMessage>(raw) {
            Ok(InboundMessage::Response(response)) => {
                let sender = self.pending.lock().await.remove(&response.request_seq);
                match sender {
                    Some(sender) => {
                        trace!(
                            request_seq = response.request_seq,
                            success = response.success,
                            "Dispatching tsserver response"
                        );
                        let _ = sender.send(response);
                    }
                    None => warn!(
                        request_seq = response.request_seq,
                        command = ?response.command,
                        "Received response for unknown request (already timed out)"
                    ),
                }
            }
            Ok(InboundMessage::Event(event)) => self.handle_event(&event),
            Err(e) => warn!(error = %e, "Dropping unrecognized tsserver message"),
        }
    }

    fn handle_event(&self, event: &EventMessage) {
        match ServerEvent::from_name(&event.event).loaded_transition() {
            Some(loaded) => {
                self.project_loaded.store(loaded, Ordering::SeqCst);
                info!(event = %event.event, project_loaded = loaded, "tsserver project state changed");
            }
            None => debug!(event = %event.event, "Ignoring tsserver event"),
        }
    }
}

/// Everything needed to issue requests without holding the session lock
#[derive(Clone)]
struct Channel {
    state: Arc<SessionState>,
    outbound: mpsc::Sender<String>,
    request_timeout: Duration,
}

impl Channel {
    fn allocate_seq(&self) -> u64 {
        self.state.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    async fn request(&self, command: &str, arguments: Option<Value>) -> TsMillResult<Option<Value>> {
        if !self.state.running.load(Ordering::SeqCst) {
            return Err(TsMillError::NotRunning);
        }

        let seq = self.allocate_seq();
        let line = Request::new(seq, command, arguments.as_ref()).to_line()?;
        let (response_tx, response_rx) = oneshot::channel();
        self.state.pending.lock().await.insert(seq, response_tx);

        debug!(command = %command, seq, "Sending tsserver request");
        if self.outbound.send(line).await.is_err() {
            self.state.pending.lock().await.remove(&seq);
            return Err(TsMillError::session_closed(command));
        }

        let started = Instant::now();
        match timeout(self.request_timeout, response_rx).await {
            Ok(Ok(response)) => {
                debug!(
                    command = %command,
                    seq,
                    success = response.success,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Received tsserver response"
                );
                if response.success {
                    Ok(response.body)
                } else {
                    let message = response
                        .message
                        .unwrap_or_else(|| format!("tsserver reported failure for '{}'", command));
                    Err(TsMillError::server(command, message))
                }
            }
            Ok(Err(_)) => Err(TsMillError::session_closed(command)),
            Err(_) => {
                self.state.pending.lock().await.remove(&seq);
                warn!(
                    command = %command,
                    seq,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "tsserver request timeout"
                );
                Err(TsMillError::timeout(
                    command,
                    self.request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    async fn notify(&self, command: &str, arguments: Option<Value>) -> TsMillResult<()> {
        if !self.state.running.load(Ordering::SeqCst) {
            return Err(TsMillError::NotRunning);
        }
        let seq = self.allocate_seq();
        let line = Request::new(seq, command, arguments.as_ref()).to_line()?;
        self.outbound
            .send(line)
            .await
            .map_err(|_| TsMillError::session_closed(command))?;
        debug!(command = %command, seq, "Queued tsserver notification");
        Ok(())
    }
}

/// One running tsserver: streams, background tasks and optional child
struct Session {
    root: PathBuf,
    channel: Channel,
    child: Option<Child>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn install<R, W>(reader: R, writer: W, root: PathBuf, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let state = Arc::new(SessionState::new());
        let (outbound, outbound_rx) = mpsc::channel::<String>(CHANNEL_BUFFER_SIZE);

        let tasks = vec![
            tokio::spawn(write_loop(writer, outbound_rx, state.clone())),
            tokio::spawn(read_loop(reader, state.clone())),
        ];

        Self {
            root,
            channel: Channel {
                state,
                outbound,
                request_timeout,
            },
            child: None,
            tasks,
        }
    }

    fn is_running(&self) -> bool {
        self.channel.state.running.load(Ordering::SeqCst)
    }

    async fn shutdown(mut self) {
        let state = self.channel.state.clone();
        state.running.store(false, Ordering::SeqCst);

        // In-flight requests are orphaned and left to their own timeouts
        let orphaned = state.pending.lock().await.len();
        if orphaned > 0 {
            debug!(orphaned, "Orphaned in-flight tsserver requests on shutdown");
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(child) = self.child.take() {
            process::terminate(child).await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn write_loop<W>(mut writer: W, mut outbound: mpsc::Receiver<String>, state: Arc<SessionState>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbound.recv().await {
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            error!(error_category = "tsserver_communication", error = %e, "Failed to write to tsserver");
            break;
        }
        if let Err(e) = writer.flush().await {
            error!(error_category = "tsserver_communication", error = %e, "Failed to flush tsserver stdin");
            break;
        }
    }
    state.running.store(false, Ordering::SeqCst);
}

async fn read_loop<R>(mut reader: R, state: Arc<SessionState>)
where
    R: AsyncRead + Unpin,
{
    let mut framer = MessageFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut message_count: u64 = 0;

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                warn!(message_count, "tsserver stdout closed");
                break;
            }
            Ok(n) => {
                for message in framer.push(&chunk[..n]) {
                    message_count += 1;
                    state.dispatch(message).await;
                }
            }
            Err(e) => {
                error!(error_category = "tsserver_communication", error = %e, "Failed to read from tsserver");
                break;
            }
        }
    }

    // In-flight requests are left to time out individually
    state.running.store(false, Ordering::SeqCst);
}

fn spawn_stderr_drain(stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let lowered = trimmed.to_lowercase();
            if lowered.contains("error") || lowered.contains("fatal") || lowered.contains("crash") {
                error!(stderr = %trimmed, "tsserver stderr");
            } else {
                debug!(stderr = %trimmed, "tsserver stderr");
            }
        }
    })
}

/// Protocol client for a single tsserver session.
///
/// Create one per project and share it (`Arc<TsServerClient>`) among the
/// operations that use that project; separate instances are fully isolated.
pub struct TsServerClient {
    config: TsServerConfig,
    session: Mutex<Option<Session>>,
}

impl TsServerClient {
    pub fn new(config: TsServerConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TsServerConfig {
        &self.config
    }

    /// Spawn tsserver rooted at `project_root`.
    ///
    /// Fails with [`TsMillError::AlreadyRunning`] while a live session exists.
    /// A session whose process died is replaced.
    pub async fn start(&self, project_root: &Path) -> TsMillResult<()> {
        let channel = {
            let mut guard = self.session.lock().await;
            Self::clear_stale(&mut *guard).await?;

            let mut child = process::spawn(&self.config, project_root)?;
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| TsMillError::internal("Failed to get stdin for tsserver"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| TsMillError::internal("Failed to get stdout for tsserver"))?;
            let stderr = child.stderr.take();

            info!(
                pid = ?child.id(),
                root = %project_root.display(),
                "tsserver process spawned"
            );

            let mut session = Session::install(
                stdout,
                stdin,
                project_root.to_path_buf(),
                self.config.request_timeout(),
            );
            if let Some(stderr) = stderr {
                session.tasks.push(spawn_stderr_drain(stderr));
            }
            session.child = Some(child);

            let channel = session.channel.clone();
            *guard = Some(session);
            channel
        };

        self.configure(channel);
        Ok(())
    }

    /// Run a session over arbitrary streams instead of a spawned process
    pub async fn attach<R, W>(&self, reader: R, writer: W, project_root: impl Into<PathBuf>) -> TsMillResult<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let channel = {
            let mut guard = self.session.lock().await;
            Self::clear_stale(&mut *guard).await?;

            let session = Session::install(
                reader,
                writer,
                project_root.into(),
                self.config.request_timeout(),
            );
            let channel = session.channel.clone();
            *guard = Some(session);
            channel
        };

        self.configure(channel);
        Ok(())
    }

    async fn clear_stale(guard: &mut Option<Session>) -> TsMillResult<()> {
        if let Some(existing) = guard.as_ref() {
            if existing.is_running() {
                return Err(TsMillError::AlreadyRunning);
            }
        }
        if let Some(stale) = guard.take() {
            info!(root = %stale.root.display(), "Replacing exited tsserver session");
            stale.shutdown().await;
        }
        Ok(())
    }

    /// Fire the initial `configure` request; its outcome is only logged
    fn configure(&self, channel: Channel) {
        let mut arguments = json!({
            "hostInfo": "tsmill",
            "preferences": self.config.preferences,
        });
        if let Some(format_options) = &self.config.format_options {
            arguments["formatOptions"] = format_options.clone();
        }

        tokio::spawn(async move {
            match channel.request("configure", Some(arguments)).await {
                Ok(_) => debug!("tsserver configured"),
                Err(e) => warn!(error = %e, "tsserver configure request failed"),
            }
        });
    }

    /// Terminate the session. Idempotent.
    pub async fn stop(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            let root = session.root.clone();
            session.shutdown().await;
            info!(root = %root.display(), "tsserver session stopped");
        }
    }

    /// Stop then start again in the same root
    pub async fn restart(&self) -> TsMillResult<()> {
        let root = self
            .session_root()
            .await
            .ok_or(TsMillError::NotRunning)?;
        self.stop().await;
        self.start(&root).await
    }

    async fn channel(&self) -> TsMillResult<Channel> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.channel.clone())
            .ok_or(TsMillError::NotRunning)
    }

    async fn session_root(&self) -> Option<PathBuf> {
        self.session.lock().await.as_ref().map(|s| s.root.clone())
    }

    /// Send a request and wait for the response body.
    ///
    /// Rejects after the configured timeout (30s by default) with an error
    /// naming the command, or with the server's message when `success` is
    /// false.
    pub async fn send_request(&self, command: &str, arguments: Option<Value>) -> TsMillResult<Option<Value>> {
        self.channel().await?.request(command, arguments).await
    }

    /// [`send_request`](Self::send_request) with the body deserialized into `T`
    pub async fn request<T: DeserializeOwned>(&self, command: &str, arguments: Option<Value>) -> TsMillResult<Option<T>> {
        match self.send_request(command, arguments).await? {
            Some(body) => Ok(Some(serde_json::from_value(body)?)),
            None => Ok(None),
        }
    }

    /// Write a request for which tsserver sends no response
    pub async fn send_notification(&self, command: &str, arguments: Option<Value>) -> TsMillResult<()> {
        self.channel().await?.notify(command, arguments).await
    }

    /// Open `path` with its full on-disk content.
    ///
    /// tsserver never answers `open`, so success means the request was
    /// written. The loaded latch is set afterwards as an availability signal.
    pub async fn open_file(&self, path: &Path) -> TsMillResult<()> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TsMillError::io_at(path, e))?;

        let (channel, root) = {
            let guard = self.session.lock().await;
            let session = guard.as_ref().ok_or(TsMillError::NotRunning)?;
            (session.channel.clone(), session.root.clone())
        };

        let arguments = json!({
            "file": wire_path(path),
            "fileContent": content,
            "projectRootPath": wire_path(&root),
        });
        channel.notify("open", Some(arguments)).await?;
        channel.state.project_loaded.store(true, Ordering::SeqCst);
        debug!(file = %path.display(), "Opened file in tsserver");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .map(Session::is_running)
            .unwrap_or(false)
    }

    pub async fn is_project_loaded(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.channel.state.project_loaded.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Number of requests still waiting for a response
    pub async fn pending_requests(&self) -> usize {
        let state = {
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(session) => session.channel.state.clone(),
                None => return 0,
            }
        };
        let count = state.pending.lock().await.len();
        count
    }
}

#[async_trait]
impl ServerSession for TsServerClient {
    async fn project_root(&self) -> Option<PathBuf> {
        self.session_root().await
    }

    async fn is_running(&self) -> bool {
        TsServerClient::is_running(self).await
    }

    async fn is_project_loaded(&self) -> bool {
        TsServerClient::is_project_loaded(self).await
    }

    async fn start(&self, project_root: &Path) -> TsMillResult<()> {
        TsServerClient::start(self, project_root).await
    }

    async fn send_request(&self, command: &str, arguments: Option<Value>) -> TsMillResult<Option<Value>> {
        TsServerClient::send_request(self, command, arguments).await
    }

    async fn open_file(&self, path: &Path) -> TsMillResult<()> {
        TsServerClient::open_file(self, path).await
    }
}
