use std::future::Future;
use std::io;
use tokio::sync::watch;
use tracing::{error, info};

/// Spawn a task that flips the returned flag to `true` on SIGINT or SIGTERM.
pub fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let name = wait_for_signal().await;
        info!("Received {}, shutting down after the current cycle", name);
        let _ = tx.send(true);
    });

    rx
}

/// Resolves with `name` once `listener` reports the signal. A listener that
/// fails is logged and never resolves, so it cannot trigger a shutdown.
async fn delivered<F>(name: &'static str, listener: F) -> &'static str
where
    F: Future<Output = io::Result<()>>,
{
    match listener.await {
        Ok(()) => name,
        Err(e) => {
            error!("Failed to listen for {}: {}", name, e);
            std::future::pending().await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let terminate = async {
        signal(SignalKind::terminate())?
            .recv()
            .await
            .ok_or_else(|| io::Error::other("SIGTERM stream closed"))
    };

    tokio::select! {
        name = delivered("SIGINT", tokio::signal::ctrl_c()) => name,
        name = delivered("SIGTERM", terminate) => name,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    delivered("ctrl-c", tokio::signal::ctrl_c()).await
}
