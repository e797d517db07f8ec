//! Graceful shutdown coordinator.
//!
//! Listens for SIGINT (Ctrl+C), SIGTERM, and SIGHUP, then cancels a
//! [`tokio_util::sync::CancellationToken`] so the batcher stops dispatching
//! new batches and the scheduler loop exits. A second signal force-exits.
//!
//! In watch mode SIGUSR1 asks the scheduler for an immediate pass.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
async fn next_signal(
    sigterm: &mut Option<tokio::signal::unix::Signal>,
    sighup: &mut Option<tokio::signal::unix::Signal>,
) {
    async fn recv(signal: &mut Option<tokio::signal::unix::Signal>) {
        match signal {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = recv(sigterm) => {}
        _ = recv(sighup) => {}
    }
}

/// Install signal handlers and return a [`CancellationToken`] that is
/// cancelled on the first SIGINT / SIGTERM / SIGHUP.
pub(crate) fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let count = Arc::new(AtomicU32::new(0));

    let handler_token = token.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        let (mut sigterm, mut sighup) = {
            use tokio::signal::unix::{signal, SignalKind};
            let register = |kind: SignalKind, name: &str| match signal(kind) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!("Failed to register {} handler: {}", name, e);
                    None
                }
            };
            (
                register(SignalKind::terminate(), "SIGTERM"),
                register(SignalKind::hangup(), "SIGHUP"),
            )
        };

        loop {
            #[cfg(unix)]
            next_signal(&mut sigterm, &mut sighup).await;

            #[cfg(not(unix))]
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                return;
            }

            let prev = count.fetch_add(1, Ordering::SeqCst);
            if prev == 0 {
                tracing::info!("Received shutdown signal, finishing in-flight uploads...");
                tracing::info!("Press Ctrl+C again to force exit");
                handler_token.cancel();
            } else {
                tracing::warn!("Force exit requested");
                std::process::exit(130);
            }
        }
    });

    token
}

/// Install a SIGUSR1 handler feeding an on-demand sync channel.
///
/// Signals received while a request is still queued are dropped. On
/// platforms without SIGUSR1 the channel closes immediately.
pub(crate) fn install_trigger_handler() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut usr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to register SIGUSR1 handler: {}", e);
                return;
            }
        };
        while usr1.recv().await.is_some() {
            if tx.try_send(()).is_err() {
                tracing::debug!("Sync request already queued");
            }
        }
    });

    #[cfg(not(unix))]
    drop(tx);

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_tokens_observe_parent_cancel() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    /// Signal delivery can't be safely tested in a shared test binary.
    #[tokio::test]
    async fn install_returns_live_token() {
        let token = install_signal_handler();
        assert!(!token.is_cancelled());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn trigger_channel_stays_open() {
        let mut rx = install_trigger_handler();
        tokio::task::yield_now().await;
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
    }
}
