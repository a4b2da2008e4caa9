//! Broadcast scheduler: periodic and event-triggered fan-out
//!
//! Two triggers feed the fan-out. A fixed ~33 ms tick (about 30 Hz) sends a
//! minimal POSITION_UPDATE to every registered session regardless of command
//! activity, and state-changing commands or owner-initiated play-state
//! transitions send a full STATE_UPDATE. A session whose send fails is
//! dropped from the registry without aborting the fan-out to the others, and
//! a failed send is never retried.

use std::time::Duration;
use tokio::sync::watch;

use crate::bridge::{OwnerBridge, StateEvent};
use crate::protocol::{Message, MessageType, Payload};
use crate::registry::ConnectionRegistry;
use crate::state::PlayState;

/// Interval of the periodic position broadcast (~30 Hz).
pub const POSITION_BROADCAST_INTERVAL: Duration = Duration::from_millis(33);

/// Fans messages out to every registered session.
#[derive(Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
    bridge: OwnerBridge,
}

impl Broadcaster {
    pub fn new(registry: ConnectionRegistry, bridge: OwnerBridge) -> Self {
        Self { registry, bridge }
    }

    /// Send one message to every session in the current registry snapshot.
    ///
    /// Encoded once. A failed send drops that session from the registry and
    /// the fan-out continues with the rest.
    pub fn send_to_all(&self, message: &Message) {
        let text = message.encode();
        for (id, tx) in self.registry.snapshot() {
            if tx.send(text.clone()).is_err() {
                tracing::debug!(session = %id, "dropping session with closed send queue");
                self.registry.remove(id);
            }
        }
    }

    /// Broadcast a full STATE_UPDATE built from a fresh snapshot.
    pub async fn broadcast_state(&self) {
        if self.registry.is_empty() {
            return;
        }
        match self.bridge.read_snapshot().await {
            Ok(snapshot) => {
                self.send_to_all(&Message::new(MessageType::StateUpdate, snapshot.to_payload()));
            }
            Err(e) => tracing::warn!("state broadcast skipped: {}", e),
        }
    }

    /// Broadcast the minimal `{alpha, beta, gamma}` POSITION_UPDATE.
    pub async fn broadcast_position(&self) {
        if self.registry.is_empty() {
            return;
        }
        match self.bridge.read_snapshot().await {
            Ok(snapshot) => {
                self.send_to_all(&Message::new(
                    MessageType::PositionUpdate,
                    snapshot.position_payload(),
                ));
            }
            Err(e) => tracing::warn!("position broadcast skipped: {}", e),
        }
    }

    /// Broadcast an owner-initiated play-state transition: the dedicated
    /// PLAY_STATE_UPDATE event followed by a full STATE_UPDATE.
    pub async fn broadcast_play_state(&self, play_state: PlayState) {
        let mut payload = Payload::new();
        payload.insert(
            "state".to_string(),
            serde_json::Value::String(play_state.name().to_string()),
        );
        self.send_to_all(&Message::new(MessageType::PlayStateUpdate, payload));
        self.broadcast_state().await;
    }

    /// Drive the periodic position broadcast until shutdown.
    pub async fn run_position_ticker(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(POSITION_BROADCAST_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.broadcast_position().await,
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Forward owner-initiated state events to all sessions until shutdown.
    pub async fn run_state_events(self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.bridge.subscribe_events();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(StateEvent::PlayStateChanged(play_state)) => {
                        self.broadcast_play_state(play_state).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("state event stream lagged, skipped {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::OwnerRuntime;
    use crate::registry::Session;
    use crate::state::{ControlCommand, DeviceDescriptor, SessionState};
    use tokio::sync::mpsc;

    fn test_addr() -> std::net::SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn spawn_broadcaster() -> (OwnerRuntime, ConnectionRegistry, Broadcaster) {
        let owner = OwnerRuntime::spawn(SessionState::new(
            vec!["circle".to_string()],
            DeviceDescriptor::default(),
        ));
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(registry.clone(), owner.bridge());
        (owner, registry, broadcaster)
    }

    #[tokio::test]
    async fn test_failed_send_drops_only_that_session() {
        let (owner, registry, broadcaster) = spawn_broadcaster();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        registry.add(Session::new(test_addr(), tx1));
        let failing = Session::new(test_addr(), tx2);
        let failing_id = failing.id;
        registry.add(failing);
        registry.add(Session::new(test_addr(), tx3));

        // Session 2's receiver is gone: its send fails mid-fan-out.
        drop(rx2);
        broadcaster.send_to_all(&Message::error("probe"));

        assert!(rx1.try_recv().is_ok());
        assert!(rx3.try_recv().is_ok());
        assert_eq!(registry.len(), 2);
        assert!(registry
            .snapshot()
            .iter()
            .all(|(id, _)| *id != failing_id));

        owner.shutdown();
    }

    #[tokio::test]
    async fn test_state_broadcast_carries_fresh_snapshot() {
        let (owner, registry, broadcaster) = spawn_broadcaster();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.add(Session::new(test_addr(), tx));

        owner
            .bridge()
            .apply(ControlCommand::SetVolume { value: Some(55.0) })
            .await
            .unwrap();
        broadcaster.broadcast_state().await;

        let raw = rx.try_recv().unwrap();
        let msg = Message::decode(&raw).unwrap();
        assert_eq!(msg.msg_type, MessageType::StateUpdate);
        assert_eq!(msg.payload["volume"]["master"], serde_json::json!(55.0));

        owner.shutdown();
    }

    #[tokio::test]
    async fn test_position_broadcast_is_minimal() {
        let (owner, registry, broadcaster) = spawn_broadcaster();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.add(Session::new(test_addr(), tx));

        broadcaster.broadcast_position().await;
        let msg = Message::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg.msg_type, MessageType::PositionUpdate);
        assert_eq!(msg.payload.len(), 3);
        assert!(msg.payload.contains_key("alpha"));
        assert!(msg.payload.contains_key("beta"));
        assert!(msg.payload.contains_key("gamma"));

        owner.shutdown();
    }

    #[tokio::test]
    async fn test_play_state_broadcast_sends_event_then_state() {
        let (owner, registry, broadcaster) = spawn_broadcaster();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.add(Session::new(test_addr(), tx));

        broadcaster.broadcast_play_state(PlayState::Playing).await;

        let first = Message::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(first.msg_type, MessageType::PlayStateUpdate);
        assert_eq!(first.payload["state"], serde_json::json!("PLAYING"));

        let second = Message::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(second.msg_type, MessageType::StateUpdate);

        owner.shutdown();
    }
}
