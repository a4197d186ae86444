//! Graceful shutdown coordination.
//!
//! This module provides a [`Shutdown`] handle that coordinates graceful
//! shutdown across every engine task. It wraps a root cancellation token;
//! each tenant lane and background task holds a child of that token, so one
//! trigger fans out to the whole tree.
//!
//! # Example
//!
//! ```rust,ignore
//! use switchyard::shutdown::Shutdown;
//!
//! #[tokio::main]
//! async fn main() {
//!     let shutdown = Shutdown::new();
//!
//!     let worker_token = shutdown.child();
//!     tokio::spawn(async move {
//!         loop {
//!             tokio::select! {
//!                 _ = worker_token.cancelled() => break,
//!                 // ... process events
//!             }
//!         }
//!     });
//!
//!     // Wait for SIGTERM / Ctrl+C, then cancel everything
//!     shutdown.wait_for_signal().await;
//! }
//! ```

use tokio_util::sync::CancellationToken;
use tracing::info;

/// A handle for coordinating graceful shutdown across components.
///
/// When a termination signal (SIGTERM, SIGINT) is received or shutdown is
/// triggered programmatically, every token derived from this handle is
/// cancelled.
#[derive(Clone, Default)]
pub struct Shutdown {
    root: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown handle with a fresh root token.
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
        }
    }

    /// The root token itself. Cancelling it is equivalent to [`trigger`].
    ///
    /// [`trigger`]: Shutdown::trigger
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Derive a child token that is cancelled when shutdown triggers but can
    /// also be cancelled independently.
    pub fn child(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Check if shutdown has been triggered. Non-blocking.
    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Trigger shutdown manually (for testing or programmatic shutdown).
    pub fn trigger(&self) {
        info!("Shutdown triggered programmatically");
        self.root.cancel();
    }

    /// Resolve once shutdown has been triggered.
    pub async fn cancelled(&self) {
        self.root.cancelled().await;
    }

    /// Wait for a shutdown signal (SIGTERM or SIGINT), then cancel the tree.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = self.root.cancelled() => {
                info!("Shutdown already triggered, skipping signal wait");
                return;
            }
        }

        self.root.cancel();
    }
}
