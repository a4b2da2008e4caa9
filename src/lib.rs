//! Signal Remote Library
//!
//! Real-time remote control subsystem for a live signal session: a WebSocket
//! control server with per-connection authentication and broadcast fan-out,
//! an HTTP status surface, and a supervised outbound peer client that forwards
//! local state changes to other running instances.

pub mod auth;
pub mod bridge;
pub mod broadcast;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod remote;
pub mod server;
pub mod state;
pub mod telemetry;

pub use bridge::{OwnerBridge, OwnerRuntime, StateEvent};
pub use config::{PeerInstance, RemoteConfig, SyncFlags};
pub use dispatch::{CommandDispatcher, DispatchOutcome};
pub use protocol::{DecodeError, Message, MessageType, Payload};
pub use registry::{ConnectionRegistry, Session};
pub use remote::{PeerError, PeerEvent, PeerManager, PeerStatus};
pub use server::{ControlServer, ServerError};
pub use state::{
    Applied, CommandError, ControlCommand, PlayState, SessionState, StateSnapshot,
    VibrationChannel,
};
