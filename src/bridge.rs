//! Cross-thread bridge between the network domain and the state owner
//!
//! The only sanctioned path for the network layer to read or mutate owner
//! state, and for the owner to notify the network layer. `OwnerRuntime` runs
//! the owner state on a dedicated thread that drains a typed request channel
//! strictly sequentially, so at most one mutation is in flight at a time and
//! a single caller's mutations are applied in submission order.

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::state::{Applied, CommandError, ControlCommand, PlayState, SessionState, StateSnapshot};

/// Owner-initiated notifications delivered to the network layer.
#[derive(Debug, Clone)]
pub enum StateEvent {
    /// The play state flipped outside the command path, e.g. on device
    /// connect/disconnect.
    PlayStateChanged(PlayState),
}

enum OwnerRequest {
    Apply {
        command: ControlCommand,
        reply: oneshot::Sender<Result<Applied, CommandError>>,
    },
    Snapshot {
        reply: oneshot::Sender<StateSnapshot>,
    },
    SetPlayState(PlayState),
    Shutdown,
}

/// Cloneable handle the network layer uses to reach the state owner.
#[derive(Clone)]
pub struct OwnerBridge {
    request_tx: mpsc::UnboundedSender<OwnerRequest>,
    events: broadcast::Sender<StateEvent>,
    play_state: watch::Receiver<PlayState>,
}

impl OwnerBridge {
    /// Apply a command on the owner context and wait for completion.
    pub async fn apply(&self, command: ControlCommand) -> Result<Applied, CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(OwnerRequest::Apply {
                command,
                reply: reply_tx,
            })
            .map_err(|_| CommandError::OwnerUnavailable)?;
        reply_rx.await.map_err(|_| CommandError::OwnerUnavailable)?
    }

    /// Build a fresh snapshot on the owner context.
    pub async fn read_snapshot(&self) -> Result<StateSnapshot, CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(OwnerRequest::Snapshot { reply: reply_tx })
            .map_err(|_| CommandError::OwnerUnavailable)?;
        reply_rx.await.map_err(|_| CommandError::OwnerUnavailable)
    }

    /// Last play state published by the owner. Synchronous; no owner call.
    pub fn play_state(&self) -> PlayState {
        *self.play_state.borrow()
    }

    /// Subscribe to owner-initiated state notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }
}

/// Owns the state-owner thread and exposes bridge handles.
pub struct OwnerRuntime {
    bridge: OwnerBridge,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl OwnerRuntime {
    /// Move the given state onto a dedicated owner thread and start serving
    /// bridge requests.
    pub fn spawn(mut state: SessionState) -> Self {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<OwnerRequest>();
        let (events_tx, _) = broadcast::channel(64);
        let (play_state_tx, play_state_rx) = watch::channel(state.play_state());

        let events = events_tx.clone();
        let thread = std::thread::Builder::new()
            .name("signal-remote-owner".to_string())
            .spawn(move || {
                while let Some(request) = request_rx.blocking_recv() {
                    match request {
                        OwnerRequest::Apply { command, reply } => {
                            let result = state.apply(command);
                            let _ = play_state_tx.send(state.play_state());
                            let _ = reply.send(result);
                        }
                        OwnerRequest::Snapshot { reply } => {
                            let _ = reply.send(state.snapshot());
                        }
                        OwnerRequest::SetPlayState(play_state) => {
                            if state.set_play_state(play_state) {
                                let _ = play_state_tx.send(play_state);
                                let _ = events.send(StateEvent::PlayStateChanged(play_state));
                            }
                        }
                        OwnerRequest::Shutdown => break,
                    }
                }
                tracing::debug!("state owner thread exited");
            })
            .ok();

        Self {
            bridge: OwnerBridge {
                request_tx,
                events: events_tx,
                play_state: play_state_rx,
            },
            thread,
        }
    }

    /// Get a bridge handle for the network layer.
    pub fn bridge(&self) -> OwnerBridge {
        self.bridge.clone()
    }

    /// Owner-side play-state transition (device events, auto-start). Marshals
    /// onto the owner thread and notifies subscribed network tasks.
    pub fn set_play_state(&self, play_state: PlayState) {
        let _ = self
            .bridge
            .request_tx
            .send(OwnerRequest::SetPlayState(play_state));
    }

    /// Stop the owner thread and wait for it to drain.
    pub fn shutdown(mut self) {
        let _ = self.bridge.request_tx.send(OwnerRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
