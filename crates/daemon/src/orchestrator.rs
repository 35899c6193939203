//! Share server lifecycle.
//!
//! This module provides the `ShareServer` that wires the shared-root registry,
//! the HTTP router and the control socket together, and moves them through
//! start and graceful shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::files::{DirectoryBrowser, FileTransfer, Root, RootRegistry};
use crate::ipc::{IpcConnection, IpcRequest, IpcResponse, IpcServer};
use crate::network::{advertised_ip, share_url};
use crate::router::{build_router, AppState};
use crate::ui::generate_png_qr_bytes;

/// How long in-flight requests may run after shutdown begins.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Share server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Initial state, not started.
    Stopped,
    /// Binding sockets.
    Starting,
    /// Serving HTTP requests.
    Running,
    /// Draining in-flight requests.
    ShuttingDown,
}

/// Events emitted by the share server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Server state changed.
    StateChanged(ServerState),
    /// The shared folder changed; `None` means nothing is shared.
    RootChanged(Option<PathBuf>),
    /// A control client asked the server to stop.
    ShutdownRequested,
    /// Error occurred.
    Error { message: String },
}

/// The LanShare HTTP server and its control socket.
pub struct ShareServer {
    /// Configuration.
    config: Config,
    /// Currently shared root.
    registry: Arc<RootRegistry>,
    /// Current state.
    state: Arc<RwLock<ServerState>>,
    /// Control socket path; no control socket when unset.
    control_socket: Option<PathBuf>,
    /// Address the HTTP listener is bound to.
    local_addr: Option<SocketAddr>,
    /// URL peers open in a browser.
    share_url: Option<String>,
    /// HTTP server task.
    http_task: Option<JoinHandle<()>>,
    /// Control socket task.
    control_task: Option<JoinHandle<()>>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<ServerEvent>,
}

impl ShareServer {
    /// Creates a share server, sharing `config.share.root` when set.
    pub fn new(config: Config) -> Result<Self> {
        let registry = match &config.share.root {
            Some(path) => {
                let root = Root::new(path)
                    .with_context(|| format!("Cannot share {}", path.display()))?;
                RootRegistry::with_root(root)
            }
            None => RootRegistry::new(),
        };

        let (event_tx, _) = broadcast::channel(256);

        Ok(Self {
            config,
            registry: Arc::new(registry),
            state: Arc::new(RwLock::new(ServerState::Stopped)),
            control_socket: None,
            local_addr: None,
            share_url: None,
            http_task: None,
            control_task: None,
            shutdown_token: CancellationToken::new(),
            event_tx,
        })
    }

    /// Accept control requests on the Unix socket at `path`.
    pub fn with_control_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.control_socket = Some(path.into());
        self
    }

    /// Returns the current state.
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Returns a receiver for server events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.event_tx.subscribe()
    }

    /// Returns the shared-root registry.
    pub fn registry(&self) -> &Arc<RootRegistry> {
        &self.registry
    }

    /// Address the HTTP listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// URL peers open in a browser, once started.
    pub fn share_url(&self) -> Option<&str> {
        self.share_url.as_deref()
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    ///
    /// The token is cancelled when a control client requests a stop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Binds the HTTP listener and the control socket and starts serving.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        {
            let mut state = self.state.write().await;
            if *state != ServerState::Stopped {
                anyhow::bail!("Share server is already running");
            }
            *state = ServerState::Starting;
        }
        self.emit_event(ServerEvent::StateChanged(ServerState::Starting));

        match self.bind_and_spawn().await {
            Ok(addr) => {
                *self.state.write().await = ServerState::Running;
                self.emit_event(ServerEvent::StateChanged(ServerState::Running));
                info!(%addr, url = ?self.share_url, "Share server started");
                Ok(addr)
            }
            Err(e) => {
                self.shutdown_token.cancel();
                self.join_tasks().await;
                *self.state.write().await = ServerState::Stopped;
                self.emit_event(ServerEvent::StateChanged(ServerState::Stopped));
                Err(e)
            }
        }
    }

    async fn bind_and_spawn(&mut self) -> Result<SocketAddr> {
        self.shutdown_token = CancellationToken::new();

        let bind_addr = self.config.server.bind_addr()?;
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind {bind_addr}"))?;
        let local_addr = listener.local_addr()?;
        let url = share_url(advertised_ip(local_addr), local_addr.port());

        let browser = DirectoryBrowser::new().include_hidden(self.config.share.show_hidden);
        let transfer = FileTransfer::new(self.config.server.max_upload_size);
        let mut app_state = AppState::new(Arc::clone(&self.registry), browser, transfer);
        match generate_png_qr_bytes(&url) {
            Ok(png) => app_state = app_state.with_qr_png(png),
            Err(e) => warn!(error = %e, "Failed to render QR code, /qr.png disabled"),
        }
        let app = build_router(app_state);

        let token = self.shutdown_token.clone();
        let event_tx = self.event_tx.clone();
        self.http_task = Some(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
                let _ = event_tx.send(ServerEvent::Error {
                    message: e.to_string(),
                });
            }
        }));

        if let Some(path) = &self.control_socket {
            let ipc = IpcServer::bind(path)
                .await
                .with_context(|| format!("Failed to bind control socket {}", path.display()))?;
            debug!(path = ?ipc.path(), "Control socket listening");

            let control = ControlContext {
                registry: Arc::clone(&self.registry),
                state: Arc::clone(&self.state),
                started_at: Instant::now(),
                url: url.clone(),
                shutdown_token: self.shutdown_token.clone(),
                event_tx: self.event_tx.clone(),
            };
            self.control_task = Some(tokio::spawn(control.run(ipc)));
        }

        self.local_addr = Some(local_addr);
        self.share_url = Some(url);
        Ok(local_addr)
    }

    /// Stops the share server gracefully.
    ///
    /// In-flight transfers get a grace period to finish before they are cut.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == ServerState::Stopped {
                return Ok(());
            }
            if *state == ServerState::ShuttingDown {
                anyhow::bail!("Share server is already shutting down");
            }
            *state = ServerState::ShuttingDown;
        }
        self.emit_event(ServerEvent::StateChanged(ServerState::ShuttingDown));

        info!("Stopping share server...");
        self.shutdown_token.cancel();
        self.join_tasks().await;

        *self.state.write().await = ServerState::Stopped;
        self.emit_event(ServerEvent::StateChanged(ServerState::Stopped));

        info!("Share server stopped");
        Ok(())
    }

    async fn join_tasks(&mut self) {
        if let Some(mut task) = self.http_task.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "HTTP server task ended abnormally"),
                Err(_) => {
                    warn!("In-flight requests did not finish in time, aborting");
                    task.abort();
                }
            }
        }

        // Dropping the control task drops the IpcServer, which removes the socket
        if let Some(task) = self.control_task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    /// Emits a server event.
    fn emit_event(&self, event: ServerEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// State shared by control socket connections.
#[derive(Clone)]
struct ControlContext {
    registry: Arc<RootRegistry>,
    state: Arc<RwLock<ServerState>>,
    started_at: Instant,
    url: String,
    shutdown_token: CancellationToken,
    event_tx: broadcast::Sender<ServerEvent>,
}

impl ControlContext {
    async fn run(self, ipc: IpcServer) {
        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                accepted = ipc.accept() => match accepted {
                    Ok(conn) => {
                        tokio::spawn(self.clone().serve_connection(conn));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept control connection");
                    }
                },
            }
        }
        debug!("Control socket closed");
    }

    async fn serve_connection(self, mut conn: IpcConnection) {
        loop {
            let request = match conn.read_request().await {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Malformed control request");
                    let _ = conn
                        .send_response(&IpcResponse::Error {
                            message: format!("invalid request: {e}"),
                        })
                        .await;
                    break;
                }
            };

            let stopping = request == IpcRequest::Stop;
            let response = self.handle(request).await;
            if let Err(e) = conn.send_response(&response).await {
                debug!(error = %e, "Control client went away");
                break;
            }

            if stopping {
                // Only after the client has its acknowledgment
                self.shutdown_token.cancel();
                break;
            }
        }
    }

    async fn handle(&self, request: IpcRequest) -> IpcResponse {
        debug!(?request, "Control request");
        match request {
            IpcRequest::Ping => IpcResponse::Pong,
            IpcRequest::Status => IpcResponse::Status {
                running: *self.state.read().await == ServerState::Running,
                uptime_secs: self.started_at.elapsed().as_secs(),
                root: self.registry.get().map(|root| root.path().to_path_buf()),
                url: Some(self.url.clone()),
            },
            IpcRequest::SetRoot { path } => {
                let registry = Arc::clone(&self.registry);
                match tokio::task::spawn_blocking(move || registry.set_path(path)).await {
                    Ok(Ok(root)) => {
                        let root = root.path().to_path_buf();
                        let _ = self.event_tx.send(ServerEvent::RootChanged(Some(root.clone())));
                        IpcResponse::RootSet { root }
                    }
                    Ok(Err(e)) => IpcResponse::Error {
                        message: e.to_string(),
                    },
                    Err(e) => {
                        error!(error = %e, "Root change task failed");
                        IpcResponse::Error {
                            message: "internal error".to_string(),
                        }
                    }
                }
            }
            IpcRequest::ClearRoot => {
                self.registry.clear();
                let _ = self.event_tx.send(ServerEvent::RootChanged(None));
                IpcResponse::RootCleared
            }
            IpcRequest::Stop => {
                info!("Stop requested over control socket");
                let _ = self.event_tx.send(ServerEvent::ShutdownRequested);
                IpcResponse::Stopping
            }
        }
    }
}
