use axum_server::Handle;
use std::fmt;
use std::time::Duration;
use tokio::signal;

/// Signal that asked the server to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopSignal::Interrupt => f.write_str("SIGINT"),
            StopSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Resolves on the first Ctrl+C or SIGTERM. A handler that cannot be
/// installed is logged and never fires.
pub async fn wait_for_signal() -> StopSignal {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => StopSignal::Interrupt,
        _ = terminate => StopSignal::Terminate,
    }
}

/// Stops `handle` once `stop` resolves. Connections still streaming an
/// archive get `grace` to finish; `None` waits for all of them.
pub fn spawn_graceful_shutdown<F>(handle: Handle, stop: F, grace: Option<Duration>)
where
    F: Future<Output = StopSignal> + Send + 'static,
{
    tokio::spawn(async move {
        let signal = stop.await;
        tracing::info!(
            "🛑 {} received, draining {} open connections",
            signal,
            handle.connection_count()
        );
        handle.graceful_shutdown(grace);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_is_stopped_on_signal() {
        let handle = Handle::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<StopSignal>();

        spawn_graceful_shutdown(
            handle.clone(),
            async move { rx.await.unwrap_or(StopSignal::Interrupt) },
            Some(Duration::from_secs(1)),
        );

        let server = axum_server::bind("127.0.0.1:0".parse().unwrap())
            .handle(handle.clone())
            .serve(axum::Router::new().into_make_service());
        let server = tokio::spawn(server);

        assert!(handle.listening().await.is_some());
        tx.send(StopSignal::Terminate).unwrap();

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(StopSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(StopSignal::Terminate.to_string(), "SIGTERM");
    }
}
