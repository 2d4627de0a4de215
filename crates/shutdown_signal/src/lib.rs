use std::pin::Pin;
use std::sync::Arc;

use cfg_if::cfg_if;
use futures::{future::Shared, FutureExt};
use std::future::Future;
use tokio::select;
use tokio::sync::watch;
use tracing::info;

cfg_if! {
    if #[cfg(windows)] {
        use tokio::signal::windows::*;

        async fn raw_shutdown_signal() {
            let mut ctrl_c = ctrl_c().expect("Failed to attach Ctrl_C shutdown signal (windows)");
            let mut ctrl_close = ctrl_close().expect("Failed to attach Ctrl_close shutdown signal (windows)");
            let mut ctrl_shutdown = ctrl_shutdown().expect("Failed to attach Ctrl_shutdown shutdown signal (windows)");
            select! {
                _ = ctrl_c.recv() => (),
                _ = ctrl_close.recv() => (),
                _ = ctrl_shutdown.recv() => (),
            }
        }
    } else if #[cfg(unix)] {
        use tokio::signal::unix::*;

        async fn unix_shutdown_signal(signal_kind: SignalKind) {
            let mut signal = signal(signal_kind).expect("Failed to listen to unix shutdown signal");
            signal.recv().await;
        }

        async fn raw_shutdown_signal() {
            select! {
                _ = unix_shutdown_signal(SignalKind::interrupt()) => (),
                _ = unix_shutdown_signal(SignalKind::terminate()) => (),
                _ = unix_shutdown_signal(SignalKind::hangup()) => (),
            };
        }
    } else {
        compile_error!("Your OS does not support shutdown signal ! Are you targeting wasm ?");
    }
}

/// Cloneable future resolving once shutdown was requested.
pub type ShutdownSignal = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

/// Resolves on the first OS termination signal.
pub fn shutdown_signal() -> ShutdownSignal {
    async {
        raw_shutdown_signal().await;
        info!("Shutdown signal detected. Attempting graceful shutdown...");
    }
    .boxed()
    .shared()
}

/// Triggers the signal returned alongside it by [`manual_shutdown_signal`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Shutdown signal controlled from code, used by tests and embedders.
pub fn manual_shutdown_signal() -> (ShutdownHandle, ShutdownSignal) {
    let (sender, mut receiver) = watch::channel(false);
    let signal = async move {
        // A dropped handle never shuts the worker down.
        if receiver.wait_for(|triggered| *triggered).await.is_err() {
            futures::future::pending::<()>().await;
        }
        info!("Manual shutdown requested. Attempting graceful shutdown...");
    }
    .boxed()
    .shared();

    (
        ShutdownHandle {
            sender: Arc::new(sender),
        },
        signal,
    )
}

/// Resolves on whichever of the OS signal or the manual handle fires first.
pub fn shutdown_signal_or_manual() -> (ShutdownHandle, ShutdownSignal) {
    let (handle, manual) = manual_shutdown_signal();
    let os = shutdown_signal();
    let signal = async move {
        select! {
            _ = os => (),
            _ = manual => (),
        }
    }
    .boxed()
    .shared();

    (handle, signal)
}
