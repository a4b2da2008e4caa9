//! Signal Remote - standalone control server
//!
//! Runs the control subsystem against a demo state owner. In the full
//! application the owner is driven by the signal generation engine; here the
//! state just reflects whatever the connected clients set, which is enough to
//! exercise the wire protocol end to end.

use signal_remote::remote::PeerManager;
use signal_remote::server::ControlServer;
use signal_remote::state::{DeviceDescriptor, SessionState};
use signal_remote::telemetry;
use signal_remote::{OwnerRuntime, RemoteConfig};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _log_guard = telemetry::init_logging_default()?;

    let mut config: RemoteConfig = match std::env::args().nth(1) {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(&path)?)?,
        None => RemoteConfig::default(),
    };
    if config.peers.is_empty() {
        match RemoteConfig::load_peers() {
            Ok(peers) => config.peers = peers,
            Err(e) => tracing::warn!("could not load persisted peer list: {}", e),
        }
    }
    if !config.enabled {
        tracing::info!("remote control disabled in configuration, exiting");
        return Ok(());
    }

    let patterns = vec![
        "circle".to_string(),
        "wave".to_string(),
        "figure-eight".to_string(),
    ];
    let owner = OwnerRuntime::spawn(SessionState::new(patterns, DeviceDescriptor::default()));
    let server = ControlServer::start(&config, owner.bridge())?;
    let peers = PeerManager::start(&config);
    tracing::info!(
        http_port = config.port,
        ws_port = config.ws_port(),
        "signal remote running, press Ctrl-C to stop"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (_forward_shutdown, forward_rx) = tokio::sync::watch::channel(false);
    let bridge = owner.bridge();
    runtime.block_on(async {
        // Owner-initiated play/stop transitions reach peers too, not just
        // local WebSocket clients.
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!("ctrl-c handler failed: {}", e);
                }
            }
            _ = peers.forward_play_state(bridge, forward_rx) => {}
        }
    });

    tracing::info!("shutting down");
    peers.stop();
    server.stop();
    owner.shutdown();
    Ok(())
}
