//! # Termination signal forwarding.
//!
//! Signals never run cleanup themselves. [`forward_shutdown_signals`] turns
//! SIGINT, SIGTERM and SIGQUIT into a cancelled [`CancellationToken`]; the
//! orchestrator notices it at its next suspension point and cleans up on the
//! main sequence.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Registered listeners for the termination signals
pub struct ShutdownSignals {
    sigint: Signal,
    sigterm: Signal,
    sigquit: Signal,
}

impl ShutdownSignals {
    /// Install the listeners. Must run before any child is spawned so an early
    /// signal is not handled by the default disposition.
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    /// Wait for the next signal and return its name
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigquit.recv() => "SIGQUIT",
        }
    }
}

/// Shared view of the signals received so far
#[derive(Debug, Clone, Default)]
pub struct SignalState {
    token: CancellationToken,
    received: Arc<AtomicU32>,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Record one delivery and request shutdown
    pub fn notify(&self) {
        self.received.fetch_add(1, Ordering::SeqCst);
        self.token.cancel();
    }

    pub fn received(&self) -> u32 {
        self.received.load(Ordering::SeqCst)
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Spawn the task that feeds signals into `state`
pub fn forward_shutdown_signals(
    mut signals: ShutdownSignals,
    state: SignalState,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let name = signals.recv().await;
            warn!("Received {}, requesting shutdown of the target run", name);
            state.notify();
        }
    })
}
