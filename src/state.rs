//! Control state model: snapshots, typed commands, and the owner-side state
//!
//! `SessionState` is the live mutable control state. It is owned by exactly
//! one execution context (see `bridge`) and applies commands strictly
//! sequentially. `StateSnapshot` is the immutable value copy handed across
//! threads; it is never mutated after construction.

use serde::{Deserialize, Serialize};

use crate::protocol::Payload;

/// Playback state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayState {
    Stopped,
    Playing,
    /// Output is stopped but will auto-start once pending content is loaded.
    WaitingOnLoad,
}

impl PlayState {
    /// Wire name used in `playState` fields and PLAY_STATE_UPDATE payloads.
    pub fn name(&self) -> &'static str {
        match self {
            PlayState::Stopped => "STOPPED",
            PlayState::Playing => "PLAYING",
            PlayState::WaitingOnLoad => "WAITING_ON_LOAD",
        }
    }
}

/// Position on the three control axes, each bounded to [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

/// Master and effective volume, both in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    pub master: f64,
    pub effective: f64,
}

/// Pulse generation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PulseParams {
    pub carrier: f64,
    pub frequency: f64,
    pub width: f64,
    pub rise_time: f64,
    pub interval_random: f64,
}

impl Default for PulseParams {
    fn default() -> Self {
        Self {
            carrier: 700.0,
            frequency: 50.0,
            width: 6.0,
            rise_time: 4.0,
            interval_random: 0.0,
        }
    }
}

/// One vibration channel's parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VibrationParams {
    pub enabled: bool,
    pub frequency: f64,
    pub strength: f64,
    pub left_right_bias: f64,
    pub high_low_bias: f64,
    pub random: f64,
}

impl Default for VibrationParams {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: 10.0,
            strength: 0.0,
            left_right_bias: 50.0,
            high_low_bias: 50.0,
            random: 0.0,
        }
    }
}

/// Both vibration channels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VibrationChannels {
    pub vibration1: VibrationParams,
    pub vibration2: VibrationParams,
}

/// Active motion pattern and the list of available pattern names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSnapshot {
    pub name: String,
    pub velocity: f64,
    pub available: Vec<String>,
}

/// Three-phase calibration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThreePhaseCalibration {
    pub neutral: f64,
    pub right: f64,
    pub center: f64,
}

/// Four-phase calibration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FourPhaseCalibration {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub center: f64,
}

/// Output transform parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TransformParams {
    pub enabled: bool,
    pub rotation: f64,
    pub mirror: bool,
}

/// All calibration parameter groups.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Calibration {
    pub threephase: ThreePhaseCalibration,
    pub fourphase: FourPhaseCalibration,
    pub transform: TransformParams,
}

/// Descriptor of the configured output device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    #[serde(rename = "type")]
    pub device_type: String,
    pub waveform_type: String,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            device_type: "NONE".to_string(),
            waveform_type: "NONE".to_string(),
        }
    }
}

/// Immutable value copy of the full control state.
///
/// Built on the owner's execution context, safe to read from any thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub play_state: PlayState,
    pub position: Position,
    pub volume: VolumeSnapshot,
    pub carrier: f64,
    pub pulse: PulseParams,
    pub vibration: VibrationChannels,
    pub pattern: PatternSnapshot,
    pub calibration: Calibration,
    pub device: DeviceDescriptor,
}

impl StateSnapshot {
    /// Serialize to an ordered payload object for STATE_UPDATE messages.
    pub fn to_payload(&self) -> Payload {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Payload::new(),
        }
    }

    /// Minimal `{alpha, beta, gamma}` payload for POSITION_UPDATE broadcasts.
    pub fn position_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("alpha".to_string(), serde_json::json!(self.position.alpha));
        payload.insert("beta".to_string(), serde_json::json!(self.position.beta));
        payload.insert("gamma".to_string(), serde_json::json!(self.position.gamma));
        payload
    }
}

/// Vibration channel selector. Only channels 1 and 2 exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VibrationChannel {
    One,
    Two,
}

impl VibrationChannel {
    /// Map a wire channel index to a channel. Anything other than 1 or 2 is
    /// rejected.
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            1 => Some(VibrationChannel::One),
            2 => Some(VibrationChannel::Two),
            _ => None,
        }
    }
}

/// Partial three-phase calibration update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ThreePhaseUpdate {
    pub neutral: Option<f64>,
    pub right: Option<f64>,
    pub center: Option<f64>,
}

/// Partial four-phase calibration update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FourPhaseUpdate {
    pub a: Option<f64>,
    pub b: Option<f64>,
    pub c: Option<f64>,
    pub d: Option<f64>,
    pub center: Option<f64>,
}

/// Typed command applied to the state owner.
///
/// Numeric fields arrive already clamped to their documented ranges; the
/// dispatcher validates at the network edge. Optional fields are multi-field
/// partial updates: absent fields leave the current value untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    SetPosition {
        alpha: Option<f64>,
        beta: Option<f64>,
        gamma: Option<f64>,
        /// Interpolation interval hint in seconds, carried through unchanged.
        interval: f64,
    },
    SetVolume {
        value: Option<f64>,
    },
    SetCarrier {
        frequency: Option<f64>,
    },
    SetPulseParams {
        carrier: Option<f64>,
        frequency: Option<f64>,
        width: Option<f64>,
        rise_time: Option<f64>,
        interval_random: Option<f64>,
    },
    SetVibration {
        channel: VibrationChannel,
        enabled: Option<bool>,
        frequency: Option<f64>,
        strength: Option<f64>,
        left_right_bias: Option<f64>,
        high_low_bias: Option<f64>,
        random: Option<f64>,
    },
    SetPattern {
        name: Option<String>,
        velocity: Option<f64>,
    },
    SetCalibration {
        threephase: Option<ThreePhaseUpdate>,
        fourphase: Option<FourPhaseUpdate>,
    },
    Play,
    Stop,
}

/// Outcome of a successfully applied command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// True when the command actually changed state. A redundant PLAY or an
    /// update with no fields present reports false, suppressing the
    /// state-change broadcast.
    pub changed: bool,
}

/// Errors raised while applying a command on the owner context.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown pattern: {0}")]
    UnknownPattern(String),
    #[error("state owner is not running")]
    OwnerUnavailable,
}

/// Live mutable control state, owned by the state-owner execution context.
#[derive(Debug, Clone)]
pub struct SessionState {
    play_state: PlayState,
    position: Position,
    volume_master: f64,
    carrier: f64,
    pulse: PulseParams,
    vibration: VibrationChannels,
    pattern_name: String,
    pattern_velocity: f64,
    available_patterns: Vec<String>,
    calibration: Calibration,
    device: DeviceDescriptor,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(Vec::new(), DeviceDescriptor::default())
    }
}

impl SessionState {
    /// Create a fresh stopped session with the given pattern list and device.
    pub fn new(available_patterns: Vec<String>, device: DeviceDescriptor) -> Self {
        let pattern_name = available_patterns.first().cloned().unwrap_or_default();
        Self {
            play_state: PlayState::Stopped,
            position: Position::default(),
            volume_master: 0.0,
            carrier: 700.0,
            pulse: PulseParams::default(),
            vibration: VibrationChannels::default(),
            pattern_name,
            pattern_velocity: 1.0,
            available_patterns,
            calibration: Calibration::default(),
            device,
        }
    }

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    /// Set the play state directly. Used for owner-initiated transitions such
    /// as device connect/disconnect; returns true when the state changed.
    pub fn set_play_state(&mut self, play_state: PlayState) -> bool {
        if self.play_state == play_state {
            return false;
        }
        self.play_state = play_state;
        true
    }

    /// Build an immutable snapshot of the current state.
    ///
    /// Pure read; cheap enough to call once per broadcast tick (>= 30 Hz).
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            play_state: self.play_state,
            position: self.position,
            volume: VolumeSnapshot {
                master: self.volume_master,
                effective: self.volume_master,
            },
            carrier: self.carrier,
            pulse: self.pulse,
            vibration: self.vibration,
            pattern: PatternSnapshot {
                name: self.pattern_name.clone(),
                velocity: self.pattern_velocity,
                available: self.available_patterns.clone(),
            },
            calibration: self.calibration,
            device: self.device.clone(),
        }
    }

    /// Apply a command, mutating state in place.
    ///
    /// Multi-field commands are applied field by field in wire order and are
    /// not rolled back when a later field fails validation: earlier fields in
    /// the same command stay applied.
    pub fn apply(&mut self, command: ControlCommand) -> Result<Applied, CommandError> {
        let changed = match command {
            ControlCommand::SetPosition {
                alpha,
                beta,
                gamma,
                interval: _,
            } => {
                let mut changed = false;
                if let Some(alpha) = alpha {
                    self.position.alpha = alpha;
                    changed = true;
                }
                if let Some(beta) = beta {
                    self.position.beta = beta;
                    changed = true;
                }
                if let Some(gamma) = gamma {
                    self.position.gamma = gamma;
                    changed = true;
                }
                changed
            }
            ControlCommand::SetVolume { value } => {
                if let Some(value) = value {
                    self.volume_master = value;
                    true
                } else {
                    false
                }
            }
            ControlCommand::SetCarrier { frequency } => {
                if let Some(frequency) = frequency {
                    // The pulse carrier tracks the main carrier, as on the
                    // control surface.
                    self.carrier = frequency;
                    self.pulse.carrier = frequency;
                    true
                } else {
                    false
                }
            }
            ControlCommand::SetPulseParams {
                carrier,
                frequency,
                width,
                rise_time,
                interval_random,
            } => {
                let mut changed = false;
                if let Some(carrier) = carrier {
                    self.pulse.carrier = carrier;
                    changed = true;
                }
                if let Some(frequency) = frequency {
                    self.pulse.frequency = frequency;
                    changed = true;
                }
                if let Some(width) = width {
                    self.pulse.width = width;
                    changed = true;
                }
                if let Some(rise_time) = rise_time {
                    self.pulse.rise_time = rise_time;
                    changed = true;
                }
                if let Some(interval_random) = interval_random {
                    self.pulse.interval_random = interval_random;
                    changed = true;
                }
                changed
            }
            ControlCommand::SetVibration {
                channel,
                enabled,
                frequency,
                strength,
                left_right_bias,
                high_low_bias,
                random,
            } => {
                let params = match channel {
                    VibrationChannel::One => &mut self.vibration.vibration1,
                    VibrationChannel::Two => &mut self.vibration.vibration2,
                };
                let mut changed = false;
                if let Some(enabled) = enabled {
                    params.enabled = enabled;
                    changed = true;
                }
                if let Some(frequency) = frequency {
                    params.frequency = frequency;
                    changed = true;
                }
                if let Some(strength) = strength {
                    params.strength = strength;
                    changed = true;
                }
                if let Some(left_right_bias) = left_right_bias {
                    params.left_right_bias = left_right_bias;
                    changed = true;
                }
                if let Some(high_low_bias) = high_low_bias {
                    params.high_low_bias = high_low_bias;
                    changed = true;
                }
                if let Some(random) = random {
                    params.random = random;
                    changed = true;
                }
                changed
            }
            ControlCommand::SetPattern { name, velocity } => {
                let mut changed = false;
                // Name is validated before velocity: an unknown name rejects
                // the command without touching the velocity.
                if let Some(name) = name {
                    if !self.available_patterns.iter().any(|p| p == &name) {
                        return Err(CommandError::UnknownPattern(name));
                    }
                    self.pattern_name = name;
                    changed = true;
                }
                if let Some(velocity) = velocity {
                    self.pattern_velocity = velocity;
                    changed = true;
                }
                changed
            }
            ControlCommand::SetCalibration {
                threephase,
                fourphase,
            } => {
                let mut changed = false;
                if let Some(tp) = threephase {
                    if let Some(neutral) = tp.neutral {
                        self.calibration.threephase.neutral = neutral;
                        changed = true;
                    }
                    if let Some(right) = tp.right {
                        self.calibration.threephase.right = right;
                        changed = true;
                    }
                    if let Some(center) = tp.center {
                        self.calibration.threephase.center = center;
                        changed = true;
                    }
                }
                if let Some(fp) = fourphase {
                    if let Some(a) = fp.a {
                        self.calibration.fourphase.a = a;
                        changed = true;
                    }
                    if let Some(b) = fp.b {
                        self.calibration.fourphase.b = b;
                        changed = true;
                    }
                    if let Some(c) = fp.c {
                        self.calibration.fourphase.c = c;
                        changed = true;
                    }
                    if let Some(d) = fp.d {
                        self.calibration.fourphase.d = d;
                        changed = true;
                    }
                    if let Some(center) = fp.center {
                        self.calibration.fourphase.center = center;
                        changed = true;
                    }
                }
                changed
            }
            ControlCommand::Play => {
                if self.play_state == PlayState::Stopped {
                    self.play_state = PlayState::Playing;
                    true
                } else {
                    false
                }
            }
            ControlCommand::Stop => {
                if self.play_state != PlayState::Stopped {
                    self.play_state = PlayState::Stopped;
                    true
                } else {
                    false
                }
            }
        };

        Ok(Applied { changed })
    }
}
