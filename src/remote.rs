//! Outbound peer manager
//!
//! Maintains persistent outbound WebSocket connections to the configured peer
//! instances and forwards local state changes to them, so several instances
//! driven from one place stay in step. Peers are fire-and-forget mirrors:
//! messages they send back are drained and dropped, and a peer's failure
//! never affects local state or the other peers. A supervision pass every
//! five seconds reconnects anything that dropped; there is no backoff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use crate::auth::basic_auth_header;
use crate::bridge::{OwnerBridge, StateEvent};
use crate::config::{PeerInstance, RemoteConfig, SyncFlags};
use crate::protocol::{Message, MessageType, Payload};
use crate::state::PlayState;

/// Supervision pass interval.
pub const SUPERVISION_INTERVAL: Duration = Duration::from_secs(5);

/// Minimum spacing between outbound position sends. Later calls inside the
/// window are dropped, not queued.
pub const POSITION_SEND_INTERVAL: Duration = Duration::from_millis(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Peer addressing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error("peer url must be http or https: {0}")]
    UnsupportedScheme(String),
    #[error("peer url has no host: {0}")]
    MissingHost(String),
    #[error("peer url has an invalid port: {0}")]
    InvalidPort(String),
}

/// Connection state of one peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Connectivity change notification for UI consumers.
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub url: String,
    pub connected: bool,
}

struct PeerLink {
    status: PeerStatus,
    tx: mpsc::UnboundedSender<String>,
    /// Identity token tying a map entry to the task that owns it. A task may
    /// only mutate or remove the entry carrying its own generation: after a
    /// link is replaced (instance-list change plus reconnect), the stale
    /// task's exit must not touch the replacement.
    generation: u64,
}

struct Shared {
    instances: Mutex<Vec<PeerInstance>>,
    links: Mutex<HashMap<String, PeerLink>>,
    next_generation: AtomicU64,
    events: broadcast::Sender<PeerEvent>,
    last_position_send: Mutex<Option<Instant>>,
    sync: SyncFlags,
}

impl Shared {
    fn allocate_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Remove the link for `url` only when it still belongs to the exiting
    /// task. Emits the disconnect notification only for an actual removal, so
    /// a stale exit never reports a live replacement as down.
    fn remove_link(&self, url: &str, generation: u64, was_connected: bool) {
        let removed = match self.links.lock() {
            Ok(mut links) => {
                if links.get(url).map(|l| l.generation) == Some(generation) {
                    links.remove(url);
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        };
        if removed && was_connected {
            let _ = self.events.send(PeerEvent {
                url: url.to_string(),
                connected: false,
            });
        }
    }

    fn mark_connected(&self, url: &str, generation: u64) {
        let marked = match self.links.lock() {
            Ok(mut links) => match links.get_mut(url) {
                Some(link) if link.generation == generation => {
                    link.status = PeerStatus::Connected;
                    true
                }
                _ => false,
            },
            Err(_) => false,
        };
        if marked {
            let _ = self.events.send(PeerEvent {
                url: url.to_string(),
                connected: true,
            });
        }
    }
}

/// Derive the WebSocket control URL from a peer's configured HTTP(S) URL:
/// `http` becomes `ws`, `https` becomes `wss`, and an explicit port is bumped
/// by one. A URL without an explicit port keeps its authority untouched.
pub fn derive_ws_url(http_url: &str) -> Result<String, PeerError> {
    let (scheme, rest) = if let Some(rest) = http_url.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = http_url.strip_prefix("http://") {
        ("ws", rest)
    } else {
        return Err(PeerError::UnsupportedScheme(http_url.to_string()));
    };

    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    if authority.is_empty() {
        return Err(PeerError::MissingHost(http_url.to_string()));
    }

    let authority = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let bumped = port
                .parse::<u16>()
                .ok()
                .and_then(|p| p.checked_add(1))
                .ok_or_else(|| PeerError::InvalidPort(http_url.to_string()))?;
            format!("{}:{}", host, bumped)
        }
        None => authority.to_string(),
    };
    Ok(format!("{}://{}{}", scheme, authority, path))
}

/// Supervises outbound peer connections on its own runtime thread.
pub struct PeerManager {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    done_rx: std::sync::mpsc::Receiver<()>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl PeerManager {
    /// Start the supervision thread with the configured peer list.
    pub fn start(config: &RemoteConfig) -> Self {
        let shared = Arc::new(Shared {
            instances: Mutex::new(config.peers.clone()),
            links: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            events: broadcast::channel(64).0,
            last_position_send: Mutex::new(None),
            sync: config.sync,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let worker = shared.clone();
        let thread = std::thread::Builder::new()
            .name("signal-remote-peers".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(supervise(worker, shutdown_rx)),
                    Err(e) => tracing::error!("peer manager runtime failed to start: {}", e),
                }
                let _ = done_tx.send(());
            })
            .ok();

        Self {
            shared,
            shutdown_tx,
            done_rx,
            thread,
        }
    }

    /// Replace the peer list. Existing links are closed; the next supervision
    /// pass reconnects according to the new list.
    pub fn set_instances(&self, instances: Vec<PeerInstance>) {
        if let Ok(mut current) = self.shared.instances.lock() {
            *current = instances;
        }
        if let Ok(mut links) = self.shared.links.lock() {
            links.clear();
        }
    }

    /// Forward a position change. Rate-limited; calls inside the throttle
    /// window are dropped.
    pub fn send_position(&self, alpha: f64, beta: f64, gamma: Option<f64>) {
        if !self.shared.sync.position {
            return;
        }
        if let Ok(mut last) = self.shared.last_position_send.lock() {
            let now = Instant::now();
            if let Some(prev) = *last {
                if now.duration_since(prev) < POSITION_SEND_INTERVAL {
                    return;
                }
            }
            *last = Some(now);
        }

        let mut payload = Payload::new();
        payload.insert("alpha".to_string(), serde_json::json!(alpha));
        payload.insert("beta".to_string(), serde_json::json!(beta));
        if let Some(gamma) = gamma {
            payload.insert("gamma".to_string(), serde_json::json!(gamma));
        }
        self.send_to_peers(&Message::new(MessageType::SetPosition, payload));
    }

    /// Forward a master volume change.
    pub fn send_volume(&self, value: f64) {
        if !self.shared.sync.volume {
            return;
        }
        let mut payload = Payload::new();
        payload.insert("value".to_string(), serde_json::json!(value));
        self.send_to_peers(&Message::new(MessageType::SetVolume, payload));
    }

    /// Forward a carrier frequency change.
    pub fn send_carrier(&self, frequency: f64) {
        if !self.shared.sync.carrier {
            return;
        }
        let mut payload = Payload::new();
        payload.insert("frequency".to_string(), serde_json::json!(frequency));
        self.send_to_peers(&Message::new(MessageType::SetCarrier, payload));
    }

    /// Forward a pulse parameter change. The payload carries whichever fields
    /// changed.
    pub fn send_pulse_params(&self, payload: Payload) {
        if !self.shared.sync.carrier {
            return;
        }
        self.send_to_peers(&Message::new(MessageType::SetPulseParams, payload));
    }

    /// Forward a local play transition.
    pub fn send_play(&self) {
        if !self.shared.sync.play_state {
            return;
        }
        self.send_to_peers(&Message::empty(MessageType::Play));
    }

    /// Forward a local stop transition.
    pub fn send_stop(&self) {
        if !self.shared.sync.play_state {
            return;
        }
        self.send_to_peers(&Message::empty(MessageType::Stop));
    }

    /// Subscribe to peer connectivity changes.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PeerEvent> {
        self.shared.events.subscribe()
    }

    /// Number of currently connected peers.
    pub fn connected_count(&self) -> usize {
        match self.shared.links.lock() {
            Ok(links) => links
                .values()
                .filter(|l| l.status == PeerStatus::Connected)
                .count(),
            Err(_) => 0,
        }
    }

    pub fn is_connected(&self, url: &str) -> bool {
        match self.shared.links.lock() {
            Ok(links) => links
                .get(url)
                .map(|l| l.status == PeerStatus::Connected)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Stop supervision and close every link, waiting a bounded time for the
    /// worker thread. A thread that does not finish in time is logged and
    /// leaked rather than blocking shutdown.
    pub fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        match self.done_rx.recv_timeout(STOP_TIMEOUT) {
            Ok(()) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
            }
            Err(_) => tracing::warn!("peer manager thread did not stop in time"),
        }
    }

    fn send_to_peers(&self, message: &Message) {
        let text = message.encode();
        if let Ok(links) = self.shared.links.lock() {
            for link in links.values() {
                if link.status == PeerStatus::Connected {
                    let _ = link.tx.send(text.clone());
                }
            }
        }
    }

    /// Forward owner-initiated play-state transitions to connected peers.
    /// Runs until shutdown is signalled or the event stream closes.
    pub async fn forward_play_state(
        &self,
        bridge: OwnerBridge,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut events = bridge.subscribe_events();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(StateEvent::PlayStateChanged(PlayState::Playing)) => self.send_play(),
                    Ok(StateEvent::PlayStateChanged(PlayState::Stopped)) => self.send_stop(),
                    // WAITING_ON_LOAD auto-starts locally; peers hear the
                    // eventual PLAYING transition.
                    Ok(StateEvent::PlayStateChanged(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("play-state event stream lagged, skipped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    }

    #[cfg(test)]
    fn insert_test_link(&self, url: &str) -> (mpsc::UnboundedReceiver<String>, u64) {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = self.shared.allocate_generation();
        if let Ok(mut links) = self.shared.links.lock() {
            links.insert(
                url.to_string(),
                PeerLink {
                    status: PeerStatus::Connected,
                    tx,
                    generation,
                },
            );
        }
        (rx, generation)
    }
}

/// Supervision loop: reconcile the link map against the instance list on
/// every tick, then tear everything down on shutdown.
async fn supervise(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(SUPERVISION_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => reconcile(&shared, &shutdown),
            _ = shutdown.changed() => break,
        }
    }
    if let Ok(mut links) = shared.links.lock() {
        // Dropping the senders unblocks every peer task's writer.
        links.clear();
    }
}

fn reconcile(shared: &Arc<Shared>, shutdown: &watch::Receiver<bool>) {
    let instances = match shared.instances.lock() {
        Ok(instances) => instances.clone(),
        Err(_) => return,
    };

    let wanted: Vec<&PeerInstance> = instances.iter().filter(|i| i.enabled).collect();

    // Close links for peers no longer wanted.
    if let Ok(mut links) = shared.links.lock() {
        links.retain(|url, _| wanted.iter().any(|i| i.url == *url));
    }

    for instance in wanted {
        let ws_url = match derive_ws_url(&instance.url) {
            Ok(ws_url) => ws_url,
            Err(e) => {
                tracing::warn!(url = %instance.url, "skipping peer: {}", e);
                continue;
            }
        };

        let already_linked = shared
            .links
            .lock()
            .map(|links| links.contains_key(&instance.url))
            .unwrap_or(true);
        if already_linked {
            continue;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let generation = shared.allocate_generation();
        if let Ok(mut links) = shared.links.lock() {
            links.insert(
                instance.url.clone(),
                PeerLink {
                    status: PeerStatus::Connecting,
                    tx,
                    generation,
                },
            );
        }
        tokio::spawn(run_peer_link(
            shared.clone(),
            instance.clone(),
            ws_url,
            generation,
            rx,
            shutdown.clone(),
        ));
    }
}

/// One connection attempt plus its message pump. On any exit the link is
/// removed; the next supervision pass retries.
async fn run_peer_link(
    shared: Arc<Shared>,
    instance: PeerInstance,
    ws_url: String,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut request = match ws_url.as_str().into_client_request() {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(url = %ws_url, "invalid peer websocket url: {}", e);
            shared.remove_link(&instance.url, generation, false);
            return;
        }
    };
    if !instance.username.is_empty() && !instance.password.is_empty() {
        let header = basic_auth_header(&instance.username, &instance.password);
        match header.parse() {
            Ok(value) => {
                request.headers_mut().insert("Authorization", value);
            }
            Err(e) => {
                tracing::warn!(url = %instance.url, "invalid peer credentials: {}", e);
            }
        }
    }

    let connected = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request)).await;
    let (ws_stream, _) = match connected {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            tracing::debug!(url = %ws_url, "peer connect failed: {}", e);
            shared.remove_link(&instance.url, generation, false);
            return;
        }
        Err(_) => {
            tracing::debug!(url = %ws_url, "peer connect timed out");
            shared.remove_link(&instance.url, generation, false);
            return;
        }
    };

    tracing::info!(url = %instance.url, "peer connected");
    shared.mark_connected(&instance.url, generation);
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(text) => {
                    if write.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Link was dropped from the map; close the socket.
                None => break,
            },
            inbound = read.next() => match inbound {
                Some(Ok(WsMessage::Ping(data))) => {
                    if write.send(WsMessage::Pong(data)).await.is_err() {
                        break;
                    }
                }
                // Peers are mirrors; anything they send back is dropped.
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = shutdown.changed() => {
                let _ = write.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }

    tracing::info!(url = %instance.url, "peer disconnected");
    shared.remove_link(&instance.url, generation, true);
}
