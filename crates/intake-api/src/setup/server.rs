//! Listener binding and shutdown on signal

use anyhow::{Context, Result};
use axum::Router;
use intake_core::Config;

/// Serve `app` until SIGINT or SIGTERM, then let in-flight requests finish.
pub async fn start_server(config: &Config, app: Router) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.server_port());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let policy = config.upload_policy();
    tracing::info!(
        fields = %policy.fields.keys().cloned().collect::<Vec<_>>().join(","),
        max_parts = policy.limits.max_parts,
        max_header_bytes = policy.limits.max_header_bytes,
        max_field_value_bytes = policy.limits.max_field_value_bytes,
        storage_backend = %config.storage_backend(),
        addr = %addr,
        "Accepting uploads"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
///
/// A signal that cannot be installed is logged and never fires, so the server
/// keeps running and can still stop on the other one.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    };

    // Cut-off uploads remove their own stored files when their futures drop.
    tracing::info!(signal, "Shutting down, waiting for in-flight uploads");
}
