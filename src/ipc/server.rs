//! Unix domain socket server for IPC
//!
//! Accepts the named toggle notification, answers status queries, and pushes
//! blackout events to subscribed clients.

use std::future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::blackout::{Command, TriggerSource};
use crate::events::BlackoutEvent;

use super::protocol::{DaemonStatus, Request, Response};

/// Largest accepted message body
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State shared with every client handler
struct Shared {
    state: RwLock<ServerState>,
    /// Toggle requests go to the blackout service
    command_tx: mpsc::Sender<Command>,
    /// Source for client subscriptions
    event_tx: broadcast::Sender<BlackoutEvent>,
    toggle_notification: String,
}

struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
}

/// What the read half of a connection hands to its handler
type Incoming = std::result::Result<Request, serde_json::Error>;

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(
        socket_path: &Path,
        command_tx: mpsc::Sender<Command>,
        event_tx: broadcast::Sender<BlackoutEvent>,
        toggle_notification: &str,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            state: RwLock::new(ServerState {
                status: DaemonStatus::default(),
                start_time: std::time::Instant::now(),
            }),
            command_tx,
            event_tx,
            toggle_notification: toggle_notification.to_string(),
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            shared,
            shutdown_tx,
        })
    }

    /// Record whether the hotkey listener is active
    pub async fn set_hotkey_registered(&self, registered: bool) {
        self.shared.state.write().await.status.hotkey_registered = registered;
    }

    /// Fold a blackout event into the status snapshot
    pub async fn apply_event(&self, event: &BlackoutEvent) {
        let mut state = self.shared.state.write().await;
        let was_blacked = state.status.blacked;
        state.status.apply(event);

        if was_blacked != state.status.blacked {
            info!(
                blacked = state.status.blacked,
                title = %state.status.title,
                "IPC server: status updated"
            );
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (incoming_tx, incoming_rx) = mpsc::channel::<Incoming>(8);

        // Reads run on their own task so a pushed event never interrupts a
        // partially read frame
        let read_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(body)) => {
                        if incoming_tx.send(serde_json::from_slice(&body)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("client disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(?e, "client read error");
                        break;
                    }
                }
            }
        });

        let _read_guard = AbortOnDrop(read_task);

        Self::serve(&mut writer, incoming_rx, &shared).await
    }

    async fn serve(
        writer: &mut OwnedWriteHalf,
        mut incoming_rx: mpsc::Receiver<Incoming>,
        shared: &Shared,
    ) -> Result<()> {
        let mut events: Option<broadcast::Receiver<BlackoutEvent>> = None;

        loop {
            tokio::select! {
                incoming = incoming_rx.recv() => {
                    let Some(incoming) = incoming else {
                        return Ok(());
                    };

                    let response = match incoming {
                        Ok(request) => {
                            debug!(?request, "received request");
                            let (response, subscribe) = Self::process_request(request, shared).await;
                            if subscribe && events.is_none() {
                                events = Some(shared.event_tx.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            response
                        }
                        Err(e) => Response::Error {
                            code: "bad_request".to_string(),
                            message: e.to_string(),
                        },
                    };

                    send_message(writer, &response).await?;
                }
                event = next_event(&mut events) => match event {
                    Ok(event) => send_message(writer, &Response::Event { event }).await?,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events = None;
                    }
                },
            }
        }
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, shared: &Shared) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let mut state = shared.state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                (Response::Status(state.status.clone()), false)
            }

            Request::Notify { name } if name == shared.toggle_notification => {
                info!(%name, "toggle notification received");
                match shared
                    .command_tx
                    .send(Command::Toggle(TriggerSource::Notification))
                    .await
                {
                    Ok(()) => (Response::Toggled, false),
                    Err(_) => (
                        Response::Error {
                            code: "unavailable".to_string(),
                            message: "blackout service is not running".to_string(),
                        },
                        false,
                    ),
                }
            }

            Request::Notify { name } => {
                debug!(%name, "ignoring unknown notification");
                (
                    Response::Error {
                        code: "unknown_notification".to_string(),
                        message: format!("no handler for {name:?}"),
                    },
                    false,
                )
            }

            Request::Subscribe => (Response::Subscribed, true),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Stops the connection's read task however the handler exits
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<BlackoutEvent>>,
) -> std::result::Result<BlackoutEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

/// Read one length-prefixed frame; `None` on a clean disconnect
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        anyhow::bail!("message too large ({len} bytes)");
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message
pub async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;
    use tokio_test::assert_ok;

    use super::*;
    use crate::config::DEFAULT_TOGGLE_NOTIFICATION;

    struct Harness {
        server: Arc<Server>,
        socket_path: PathBuf,
        command_rx: mpsc::Receiver<Command>,
        event_tx: broadcast::Sender<BlackoutEvent>,
    }

    fn start_server(name: &str) -> Harness {
        let socket_path =
            std::env::temp_dir().join(format!("tbb-{}-{}.sock", std::process::id(), name));
        let (command_tx, command_rx) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(8);

        let server = Arc::new(
            Server::new(&socket_path, command_tx, event_tx.clone(), DEFAULT_TOGGLE_NOTIFICATION)
                .unwrap(),
        );
        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run().await });

        Harness {
            server,
            socket_path,
            command_rx,
            event_tx,
        }
    }

    async fn request(stream: &mut UnixStream, request: &Request) -> Response {
        assert_ok!(send_message(stream, request).await);
        receive(stream).await
    }

    async fn receive(stream: &mut UnixStream) -> Response {
        let body = timeout(Duration::from_secs(5), read_frame(stream))
            .await
            .expect("timed out waiting for response")
            .unwrap()
            .expect("server closed the connection");
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let h = start_server("status");
        let mut stream = UnixStream::connect(&h.socket_path).await.unwrap();

        assert_eq!(request(&mut stream, &Request::Ping).await, Response::Pong);

        match request(&mut stream, &Request::GetStatus).await {
            Response::Status(status) => {
                assert!(!status.blacked);
                assert_eq!(status.title, "TB");
                assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
            }
            other => panic!("unexpected response: {other:?}"),
        }

        h.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_toggle_notification_reaches_service() {
        let mut h = start_server("notify");
        let mut stream = UnixStream::connect(&h.socket_path).await.unwrap();

        let response = request(
            &mut stream,
            &Request::Notify {
                name: DEFAULT_TOGGLE_NOTIFICATION.to_string(),
            },
        )
        .await;
        assert_eq!(response, Response::Toggled);
        assert!(matches!(
            h.command_rx.recv().await,
            Some(Command::Toggle(TriggerSource::Notification))
        ));

        h.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_notification_is_rejected() {
        let mut h = start_server("unknown");
        let mut stream = UnixStream::connect(&h.socket_path).await.unwrap();

        let response = request(
            &mut stream,
            &Request::Notify {
                name: "com.example.other".to_string(),
            },
        )
        .await;
        assert!(matches!(response, Response::Error { ref code, .. } if code == "unknown_notification"));
        assert!(h.command_rx.try_recv().is_err());

        h.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_request_keeps_connection() {
        let h = start_server("malformed");
        let mut stream = UnixStream::connect(&h.socket_path).await.unwrap();

        let garbage = b"{not json";
        stream
            .write_all(&(garbage.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(garbage).await.unwrap();
        assert!(matches!(
            receive(&mut stream).await,
            Response::Error { ref code, .. } if code == "bad_request"
        ));

        assert_eq!(request(&mut stream, &Request::Ping).await, Response::Pong);

        h.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let h = start_server("subscribe");
        let mut stream = UnixStream::connect(&h.socket_path).await.unwrap();

        assert_eq!(
            request(&mut stream, &Request::Subscribe).await,
            Response::Subscribed
        );

        h.event_tx.send(BlackoutEvent::BlackoutEntered).unwrap();
        assert_eq!(
            receive(&mut stream).await,
            Response::Event {
                event: BlackoutEvent::BlackoutEntered
            }
        );

        h.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_reflects_applied_events() {
        let h = start_server("apply");
        h.server.set_hotkey_registered(true).await;
        h.server.apply_event(&BlackoutEvent::BlackoutEntered).await;
        h.server.apply_event(&BlackoutEvent::OverlayPresented).await;

        let mut stream = UnixStream::connect(&h.socket_path).await.unwrap();
        match request(&mut stream, &Request::GetStatus).await {
            Response::Status(status) => {
                assert!(status.blacked);
                assert!(status.overlay_presented);
                assert!(status.hotkey_registered);
                assert_eq!(status.title, "TB off");
            }
            other => panic!("unexpected response: {other:?}"),
        }

        h.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_removes_socket() {
        let h = start_server("cleanup");
        assert!(h.socket_path.exists());
        h.server.shutdown().await;
        assert!(!h.socket_path.exists());
    }
}
