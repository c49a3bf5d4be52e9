//! Process-termination signal handling.

/// Wait for a termination signal and return its name.
#[cfg(unix)]
pub async fn wait_for_termination() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
pub async fn wait_for_termination() -> &'static str {
    tokio::signal::ctrl_c().await.ok();
    "SIGINT"
}
