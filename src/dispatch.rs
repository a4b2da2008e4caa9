//! Inbound command dispatcher
//!
//! Translates decoded wire messages into typed commands, clamps numeric
//! fields to their documented ranges at the network edge, applies commands
//! through the cross-thread bridge, and reports whether a state-change
//! broadcast is due. Every failure while applying a command is converted to
//! an ERROR message for the originating session only; it never propagates to
//! other sessions or tears down the connection.

use crate::bridge::OwnerBridge;
use crate::protocol::{Message, MessageType, Payload};
use crate::state::{ControlCommand, FourPhaseUpdate, PlayState, ThreePhaseUpdate, VibrationChannel};

/// Result of dispatching one inbound message.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Direct response for the originating session, if any.
    pub reply: Option<Message>,
    /// True when a full STATE_UPDATE broadcast should follow. Set only after
    /// the bridge confirms the mutation was applied.
    pub broadcast_state: bool,
}

impl DispatchOutcome {
    fn none() -> Self {
        Self {
            reply: None,
            broadcast_state: false,
        }
    }

    fn reply(message: Message) -> Self {
        Self {
            reply: Some(message),
            broadcast_state: false,
        }
    }
}

/// Dispatches decoded messages against the state owner.
pub struct CommandDispatcher {
    bridge: OwnerBridge,
}

impl CommandDispatcher {
    pub fn new(bridge: OwnerBridge) -> Self {
        Self { bridge }
    }

    /// Handle one inbound message.
    pub async fn handle(&self, message: Message) -> DispatchOutcome {
        match message.msg_type {
            MessageType::GetState => match self.bridge.read_snapshot().await {
                Ok(snapshot) => DispatchOutcome::reply(Message::new(
                    MessageType::StateUpdate,
                    snapshot.to_payload(),
                )),
                Err(e) => DispatchOutcome::reply(Message::error(e.to_string())),
            },
            MessageType::SetPosition => {
                // Position rides the periodic POSITION_UPDATE tick; no
                // state-change broadcast.
                self.apply(parse_set_position(&message.payload), false).await
            }
            MessageType::SetVolume => self.apply(parse_set_volume(&message.payload), true).await,
            MessageType::SetCarrier => self.apply(parse_set_carrier(&message.payload), true).await,
            MessageType::SetPulseParams => {
                self.apply(parse_set_pulse_params(&message.payload), true).await
            }
            MessageType::SetVibration => match parse_set_vibration(&message.payload) {
                Ok(command) => self.apply(command, true).await,
                Err(text) => DispatchOutcome::reply(Message::error(text)),
            },
            MessageType::SetPattern => self.apply(parse_set_pattern(&message.payload), true).await,
            MessageType::SetCalibration => {
                self.apply(parse_set_calibration(&message.payload), false).await
            }
            MessageType::Play => {
                // No-op unless stopped; checked against the bridge's cached
                // play state so a redundant PLAY never reaches the owner.
                if self.bridge.play_state() != PlayState::Stopped {
                    return DispatchOutcome::none();
                }
                self.apply(ControlCommand::Play, true).await
            }
            MessageType::Stop => {
                if self.bridge.play_state() == PlayState::Stopped {
                    return DispatchOutcome::none();
                }
                self.apply(ControlCommand::Stop, true).await
            }
            other => DispatchOutcome::reply(Message::error(format!(
                "Unsupported message type: {}",
                other.wire_name()
            ))),
        }
    }

    async fn apply(&self, command: ControlCommand, broadcast: bool) -> DispatchOutcome {
        match self.bridge.apply(command).await {
            Ok(applied) => DispatchOutcome {
                reply: None,
                broadcast_state: broadcast && applied.changed,
            },
            Err(e) => DispatchOutcome::reply(Message::error(e.to_string())),
        }
    }
}

fn num(payload: &Payload, key: &str) -> Option<f64> {
    payload.get(key).and_then(|v| v.as_f64())
}

fn boolean(payload: &Payload, key: &str) -> Option<bool> {
    payload.get(key).and_then(|v| v.as_bool())
}

/// Parse SET_POSITION, clamping each axis to [-1, 1].
fn parse_set_position(payload: &Payload) -> ControlCommand {
    ControlCommand::SetPosition {
        alpha: num(payload, "alpha").map(|v| v.clamp(-1.0, 1.0)),
        beta: num(payload, "beta").map(|v| v.clamp(-1.0, 1.0)),
        gamma: num(payload, "gamma").map(|v| v.clamp(-1.0, 1.0)),
        interval: num(payload, "interval").unwrap_or(0.1),
    }
}

/// Parse SET_VOLUME, clamping to [0, 100].
fn parse_set_volume(payload: &Payload) -> ControlCommand {
    ControlCommand::SetVolume {
        value: num(payload, "value").map(|v| v.clamp(0.0, 100.0)),
    }
}

fn parse_set_carrier(payload: &Payload) -> ControlCommand {
    ControlCommand::SetCarrier {
        frequency: num(payload, "frequency"),
    }
}

fn parse_set_pulse_params(payload: &Payload) -> ControlCommand {
    ControlCommand::SetPulseParams {
        carrier: num(payload, "carrier"),
        frequency: num(payload, "frequency"),
        width: num(payload, "width"),
        rise_time: num(payload, "riseTime"),
        interval_random: num(payload, "intervalRandom"),
    }
}

/// Parse SET_VIBRATION. Only channels 1 and 2 exist; anything else is an
/// error text for the originating session.
fn parse_set_vibration(payload: &Payload) -> Result<ControlCommand, String> {
    let index = payload
        .get("channel")
        .and_then(|v| v.as_i64())
        .unwrap_or(1);
    let channel = VibrationChannel::from_index(index)
        .ok_or_else(|| format!("Invalid vibration channel: {}", index))?;

    Ok(ControlCommand::SetVibration {
        channel,
        enabled: boolean(payload, "enabled"),
        frequency: num(payload, "frequency"),
        strength: num(payload, "strength"),
        left_right_bias: num(payload, "leftRightBias"),
        high_low_bias: num(payload, "highLowBias"),
        random: num(payload, "random"),
    })
}

/// Parse SET_PATTERN. Velocity is floored at 0.1; the name is validated by
/// the owner, which knows the available pattern list.
fn parse_set_pattern(payload: &Payload) -> ControlCommand {
    ControlCommand::SetPattern {
        name: payload
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        velocity: num(payload, "velocity").map(|v| v.max(0.1)),
    }
}

fn parse_set_calibration(payload: &Payload) -> ControlCommand {
    let threephase = payload
        .get("threephase")
        .and_then(|v| v.as_object())
        .map(|tp| ThreePhaseUpdate {
            neutral: tp.get("neutral").and_then(|v| v.as_f64()),
            right: tp.get("right").and_then(|v| v.as_f64()),
            center: tp.get("center").and_then(|v| v.as_f64()),
        });
    let fourphase = payload
        .get("fourphase")
        .and_then(|v| v.as_object())
        .map(|fp| FourPhaseUpdate {
            a: fp.get("a").and_then(|v| v.as_f64()),
            b: fp.get("b").and_then(|v| v.as_f64()),
            c: fp.get("c").and_then(|v| v.as_f64()),
            d: fp.get("d").and_then(|v| v.as_f64()),
            center: fp.get("center").and_then(|v| v.as_f64()),
        });

    ControlCommand::SetCalibration {
        threephase,
        fourphase,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::OwnerRuntime;
    use crate::state::{DeviceDescriptor, SessionState};
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    fn spawn_dispatcher() -> (OwnerRuntime, CommandDispatcher) {
        let owner = OwnerRuntime::spawn(SessionState::new(
            vec!["circle".to_string(), "wave".to_string()],
            DeviceDescriptor::default(),
        ));
        let dispatcher = CommandDispatcher::new(owner.bridge());
        (owner, dispatcher)
    }

    #[tokio::test]
    async fn test_get_state_returns_state_update() {
        let (owner, dispatcher) = spawn_dispatcher();
        let outcome = dispatcher
            .handle(Message::empty(MessageType::GetState))
            .await;
        let reply = outcome.reply.unwrap();
        assert_eq!(reply.msg_type, MessageType::StateUpdate);
        assert_eq!(reply.payload["playState"], json!("STOPPED"));
        assert!(!outcome.broadcast_state);
        owner.shutdown();
    }

    #[tokio::test]
    async fn test_position_axes_clamped() {
        let (owner, dispatcher) = spawn_dispatcher();
        let msg = Message::new(
            MessageType::SetPosition,
            payload(json!({"alpha": 2.0, "beta": -5.0, "gamma": 0.25})),
        );
        let outcome = dispatcher.handle(msg).await;
        assert!(outcome.reply.is_none());
        // Position updates ride the periodic tick, not the state broadcast.
        assert!(!outcome.broadcast_state);

        let snapshot = owner.bridge().read_snapshot().await.unwrap();
        assert_eq!(snapshot.position.alpha, 1.0);
        assert_eq!(snapshot.position.beta, -1.0);
        assert_eq!(snapshot.position.gamma, 0.25);
        owner.shutdown();
    }

    #[tokio::test]
    async fn test_volume_clamped_and_broadcast() {
        let (owner, dispatcher) = spawn_dispatcher();

        let outcome = dispatcher
            .handle(Message::new(
                MessageType::SetVolume,
                payload(json!({"value": 150.0})),
            ))
            .await;
        assert!(outcome.broadcast_state);
        assert_eq!(
            owner.bridge().read_snapshot().await.unwrap().volume.master,
            100.0
        );

        dispatcher
            .handle(Message::new(
                MessageType::SetVolume,
                payload(json!({"value": -10.0})),
            ))
            .await;
        assert_eq!(
            owner.bridge().read_snapshot().await.unwrap().volume.master,
            0.0
        );
        owner.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_pattern_yields_error_and_leaves_pattern() {
        let (owner, dispatcher) = spawn_dispatcher();
        let outcome = dispatcher
            .handle(Message::new(
                MessageType::SetPattern,
                payload(json!({"name": "spiral"})),
            ))
            .await;
        let reply = outcome.reply.unwrap();
        assert_eq!(reply.msg_type, MessageType::Error);
        assert!(!outcome.broadcast_state);

        let snapshot = owner.bridge().read_snapshot().await.unwrap();
        assert_eq!(snapshot.pattern.name, "circle");
        owner.shutdown();
    }

    #[tokio::test]
    async fn test_pattern_velocity_floor() {
        let (owner, dispatcher) = spawn_dispatcher();
        dispatcher
            .handle(Message::new(
                MessageType::SetPattern,
                payload(json!({"name": "wave", "velocity": 0.0})),
            ))
            .await;
        let snapshot = owner.bridge().read_snapshot().await.unwrap();
        assert_eq!(snapshot.pattern.name, "wave");
        assert_eq!(snapshot.pattern.velocity, 0.1);
        owner.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_vibration_channel_rejected() {
        let (owner, dispatcher) = spawn_dispatcher();
        let outcome = dispatcher
            .handle(Message::new(
                MessageType::SetVibration,
                payload(json!({"channel": 3, "strength": 50.0})),
            ))
            .await;
        let reply = outcome.reply.unwrap();
        assert_eq!(reply.msg_type, MessageType::Error);
        assert!(!outcome.broadcast_state);
        owner.shutdown();
    }

    #[tokio::test]
    async fn test_vibration_channels_apply_independently() {
        let (owner, dispatcher) = spawn_dispatcher();
        dispatcher
            .handle(Message::new(
                MessageType::SetVibration,
                payload(json!({"channel": 1, "strength": 40.0})),
            ))
            .await;
        dispatcher
            .handle(Message::new(
                MessageType::SetVibration,
                payload(json!({"channel": 2, "strength": 70.0})),
            ))
            .await;

        let snapshot = owner.bridge().read_snapshot().await.unwrap();
        assert_eq!(snapshot.vibration.vibration1.strength, 40.0);
        assert_eq!(snapshot.vibration.vibration2.strength, 70.0);
        owner.shutdown();
    }

    #[tokio::test]
    async fn test_redundant_play_is_noop() {
        let (owner, dispatcher) = spawn_dispatcher();

        let outcome = dispatcher.handle(Message::empty(MessageType::Play)).await;
        assert!(outcome.broadcast_state);
        assert_eq!(owner.bridge().play_state(), PlayState::Playing);

        // Already playing: no broadcast, no owner call.
        let outcome = dispatcher.handle(Message::empty(MessageType::Play)).await;
        assert!(outcome.reply.is_none());
        assert!(!outcome.broadcast_state);
        owner.shutdown();
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let (owner, dispatcher) = spawn_dispatcher();
        let outcome = dispatcher.handle(Message::empty(MessageType::Stop)).await;
        assert!(outcome.reply.is_none());
        assert!(!outcome.broadcast_state);
        owner.shutdown();
    }

    #[tokio::test]
    async fn test_event_typed_inbound_message_rejected() {
        let (owner, dispatcher) = spawn_dispatcher();
        let outcome = dispatcher
            .handle(Message::empty(MessageType::StateUpdate))
            .await;
        let reply = outcome.reply.unwrap();
        assert_eq!(reply.msg_type, MessageType::Error);
        assert_eq!(
            reply.payload["error"],
            json!("Unsupported message type: state_update")
        );
        owner.shutdown();
    }

    #[tokio::test]
    async fn test_calibration_applies_without_broadcast() {
        let (owner, dispatcher) = spawn_dispatcher();
        let outcome = dispatcher
            .handle(Message::new(
                MessageType::SetCalibration,
                payload(json!({"threephase": {"neutral": 0.3}, "fourphase": {"a": 1.5}})),
            ))
            .await;
        assert!(outcome.reply.is_none());
        assert!(!outcome.broadcast_state);

        let snapshot = owner.bridge().read_snapshot().await.unwrap();
        assert_eq!(snapshot.calibration.threephase.neutral, 0.3);
        assert_eq!(snapshot.calibration.fourphase.a, 1.5);
        owner.shutdown();
    }
}
