use std::env;
use std::net::SocketAddr;

use alert_advisor::{app, build_state_from_env, TRIGGER_PATH};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let state = build_state_from_env().await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], listen_port()?));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        version = env!("CARGO_PKG_VERSION"),
        route = TRIGGER_PATH,
        "alert advisor listening"
    );
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

/// `PORT`, or 8080 when unset. A value that is not a port is a startup error.
fn listen_port() -> Result<u16, Box<dyn std::error::Error>> {
    match env::var("PORT") {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u16>()
            .map_err(|_| {
                Box::<dyn std::error::Error>::from(format!(
                    "PORT must be a port number, got {raw:?}"
                ))
            }),
        _ => Ok(DEFAULT_PORT),
    }
}

/// Resolves on Ctrl+C, or on SIGTERM where the platform has it (container stop).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("ctrl-c received, draining connections"),
        _ = terminate => tracing::info!("SIGTERM received, draining connections"),
    }
}
