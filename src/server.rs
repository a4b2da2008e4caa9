//! WebSocket control server
//!
//! Listens on the control port pair: HTTP status on the configured port, the
//! WebSocket endpoint on port + 1. Runs on its own thread with a dedicated
//! single-threaded runtime so it can be started and stopped from synchronous
//! application code. Each accepted connection authenticates, registers in the
//! connection registry, then runs one reader/writer task: inbound messages go
//! through the dispatcher, outbound traffic drains the session's send queue,
//! so only one task ever writes to a given socket.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;

use crate::auth::{self, AuthError, HANDSHAKE_TIMEOUT};
use crate::bridge::OwnerBridge;
use crate::broadcast::Broadcaster;
use crate::config::RemoteConfig;
use crate::dispatch::CommandDispatcher;
use crate::http;
use crate::protocol::{Message, MessageType, Payload};
use crate::registry::{ConnectionRegistry, Session};

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Server startup and runtime failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("server thread failed to report readiness")]
    ThreadUnavailable,
}

struct ServerContext {
    registry: ConnectionRegistry,
    broadcaster: Broadcaster,
    bridge: OwnerBridge,
    username: String,
    password: String,
    ws_port: u16,
}

/// Handle to the running control server.
pub struct ControlServer {
    registry: ConnectionRegistry,
    shutdown_tx: watch::Sender<bool>,
    done_rx: std::sync::mpsc::Receiver<()>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ControlServer {
    /// Bind both listeners and start serving. Blocks until the server thread
    /// reports that the ports are bound, so a port conflict surfaces here
    /// rather than in a log line later.
    pub fn start(config: &RemoteConfig, bridge: OwnerBridge) -> Result<Self, ServerError> {
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(registry.clone(), bridge.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let ctx = ServerContext {
            registry: registry.clone(),
            broadcaster,
            bridge,
            username: config.username.clone(),
            password: config.password.clone(),
            ws_port: config.ws_port(),
        };
        let bind_host = config.bind_host();
        let http_port = config.port;
        let ws_port = config.ws_port();

        let thread = std::thread::Builder::new()
            .name("signal-remote-server".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(ServerError::Runtime(e)));
                        return;
                    }
                };
                runtime.block_on(serve(ctx, bind_host, http_port, ws_port, shutdown_rx, ready_tx));
                let _ = done_tx.send(());
            })
            .map_err(ServerError::Runtime)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                registry,
                shutdown_tx,
                done_rx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(ServerError::ThreadUnavailable),
        }
    }

    /// Number of live inbound sessions.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop serving: signal shutdown, close every session, and wait a bounded
    /// time for the server thread. A thread that does not finish in time is
    /// logged and leaked rather than blocking shutdown.
    pub fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        self.registry.close_all();
        match self.done_rx.recv_timeout(STOP_TIMEOUT) {
            Ok(()) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
            }
            Err(_) => tracing::warn!("control server thread did not stop in time"),
        }
    }
}

async fn serve(
    ctx: ServerContext,
    bind_host: &'static str,
    http_port: u16,
    ws_port: u16,
    shutdown: watch::Receiver<bool>,
    ready_tx: std::sync::mpsc::Sender<Result<(), ServerError>>,
) {
    let ws_listener = match TcpListener::bind((bind_host, ws_port)).await {
        Ok(listener) => listener,
        Err(source) => {
            let _ = ready_tx.send(Err(ServerError::Bind {
                port: ws_port,
                source,
            }));
            return;
        }
    };
    let http_listener = match TcpListener::bind((bind_host, http_port)).await {
        Ok(listener) => listener,
        Err(source) => {
            let _ = ready_tx.send(Err(ServerError::Bind {
                port: http_port,
                source,
            }));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));
    tracing::info!(host = bind_host, http_port, ws_port, "control server listening");

    tokio::spawn(http::serve(
        http_listener,
        http::HttpState {
            registry: ctx.registry.clone(),
            bridge: ctx.bridge.clone(),
            username: ctx.username.clone(),
            password: ctx.password.clone(),
        },
        shutdown.clone(),
    ));
    tokio::spawn(ctx.broadcaster.clone().run_position_ticker(shutdown.clone()));
    tokio::spawn(ctx.broadcaster.clone().run_state_events(shutdown.clone()));

    let ctx = Arc::new(ctx);
    let mut accept_shutdown = shutdown.clone();
    loop {
        tokio::select! {
            accepted = ws_listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tokio::spawn(handle_connection(stream, addr, ctx.clone(), shutdown.clone()));
                }
                Err(e) => tracing::warn!("accept failed: {}", e),
            },
            _ = accept_shutdown.changed() => break,
        }
    }
    tracing::debug!("control server accept loop exited");
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let auth_header = Arc::new(Mutex::new(None::<String>));
    let capture = auth_header.clone();
    let callback = move |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if let Some(value) = req
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut slot) = capture.lock() {
                *slot = Some(value.to_string());
            }
        }
        Ok(response)
    };
    let mut ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(%addr, "websocket handshake failed: {}", e);
            return;
        }
    };

    if !ctx.password.is_empty() {
        let header = auth_header.lock().ok().and_then(|slot| slot.clone());
        if !auth::check_basic_auth(header.as_deref(), &ctx.username, &ctx.password) {
            let handshake =
                await_auth_handshake(&mut ws, &ctx.username, &ctx.password, HANDSHAKE_TIMEOUT)
                    .await;
            if let Err(err) = handshake {
                tracing::info!(%addr, "authentication failed: {}", err);
                if err == AuthError::InvalidCredentials {
                    // Rejected credentials get an ERROR message ahead of the
                    // close frame.
                    let error = Message::error(err.close_reason());
                    let _ = ws.send(WsMessage::Text(error.encode())).await;
                }
                let _ = ws
                    .close(Some(CloseFrame {
                        code: CloseCode::Policy,
                        reason: err.close_reason().into(),
                    }))
                    .await;
                return;
            }
        }
    }

    let (tx, mut outbound_rx) = mpsc::unbounded_channel();
    let session = Session::new(addr, tx);
    let id = session.id;
    ctx.registry.add(session);
    tracing::info!(%addr, session = %id, "control client connected");

    let mut welcome = Payload::new();
    welcome.insert("version".to_string(), serde_json::json!("1.0"));
    welcome.insert("wsPort".to_string(), serde_json::json!(ctx.ws_port));
    let welcome = Message::new(MessageType::Connected, welcome);
    if ws.send(WsMessage::Text(welcome.encode())).await.is_err() {
        ctx.registry.remove(id);
        return;
    }
    if let Ok(snapshot) = ctx.bridge.read_snapshot().await {
        let state = Message::new(MessageType::StateUpdate, snapshot.to_payload());
        if ws.send(WsMessage::Text(state.encode())).await.is_err() {
            ctx.registry.remove(id);
            return;
        }
    }

    let dispatcher = CommandDispatcher::new(ctx.bridge.clone());
    loop {
        tokio::select! {
            inbound = ws.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    let reply = match Message::decode(&text) {
                        Ok(message) => {
                            let outcome = dispatcher.handle(message).await;
                            if outcome.broadcast_state {
                                ctx.broadcaster.broadcast_state().await;
                            }
                            outcome.reply
                        }
                        Err(e) => {
                            tracing::debug!(session = %id, "rejected message: {}", e);
                            Some(Message::error(e.to_string()))
                        }
                    };
                    if let Some(reply) = reply {
                        if ws.send(WsMessage::Text(reply.encode())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    if ws.send(WsMessage::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            queued = outbound_rx.recv() => match queued {
                Some(text) => {
                    if ws.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Dropped from the registry (failed broadcast or close_all).
                None => {
                    let _ = ws.close(None).await;
                    break;
                }
            },
            _ = shutdown.changed() => {
                let _ = ws.close(None).await;
                break;
            }
        }
    }

    ctx.registry.remove(id);
    tracing::info!(%addr, session = %id, "control client disconnected");
}

/// Wait for the first-message auth handshake, bounded by the given timeout.
/// Only a valid `{"type": "auth", ...}` text frame passes.
async fn await_auth_handshake(
    ws: &mut WebSocketStream<TcpStream>,
    username: &str,
    password: &str,
    timeout: Duration,
) -> Result<(), AuthError> {
    match tokio::time::timeout(timeout, ws.next()).await {
        Err(_) => Err(AuthError::Timeout),
        Ok(Some(Ok(WsMessage::Text(text)))) => {
            auth::check_handshake_message(&text, username, password)
        }
        Ok(_) => Err(AuthError::Required),
    }
}
