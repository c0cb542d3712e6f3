//! keyplex-daemon: global keyboard input service
//!
//! Installs the global key hook, classifies key events into PRESS / HOLD /
//! RELEASE, and serves key, hold and chord subscriptions plus key emulation
//! to local clients over a Unix socket.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use keyplex::config::Config;
use keyplex::emulator::{platform_synthesizer, KeyEmulator};
use keyplex::hotkey::{HotkeyListener, HotkeyMultiplexer, KeyEventRouter};
use keyplex::ipc::{Server, ServerContext};
use keyplex::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "keyplex-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        socket_path = ?config.socket_path,
        hold_ms = config.hold_threshold.as_millis() as u64,
        chord_repeat = %config.chord_repeat,
        "configuration loaded"
    );

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    let router = KeyEventRouter::with_hold_threshold(config.hold_threshold)
        .context("failed to start key event router")?;
    let mux = Arc::new(HotkeyMultiplexer::with_repeat(&router, config.chord_repeat));

    // Without the hook nothing downstream can work
    let listener = HotkeyListener::new(router.clone());
    match listener.start() {
        Ok(handle) => {
            router.attach_hook(Box::new(handle));
            info!("global key hook installed");
        }
        Err(e) => {
            error!(?e, "failed to install global key hook");
            mux.shutdown();
            router.shutdown();
            return Err(e).context("global key hook unavailable - check Accessibility permissions");
        }
    }

    let emulator = match platform_synthesizer() {
        Ok(synth) => Some(KeyEmulator::new(synth)?.with_double_tap_gap(config.double_tap_gap)),
        Err(e) => {
            warn!(?e, "continuing without key emulation");
            None
        }
    };

    let context = ServerContext::new(router.clone(), Arc::clone(&mux), emulator);
    let server = Server::new(&config.socket_path, context)?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to register signal handlers"),
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    mux.shutdown();
    router.shutdown();
    server.shutdown().await;

    info!("keyplex-daemon stopped");

    Ok(())
}
