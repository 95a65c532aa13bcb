use std::net::SocketAddr;

use kube::Client;
use tokio::{task::JoinHandle, try_join};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::OperatorConfig, controller::run_controller, web::run_http_server,
};

/// Compute the HTTP bind address based on config.
pub fn compute_http_addr(cfg: &OperatorConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.http_port).into()
}

/// Spawn the Kubernetes controller loop.
pub fn spawn_controller(
    client: Client,
    cfg: OperatorConfig,
    shutdown: CancellationToken,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_controller(client, cfg, shutdown).await })
}

/// Spawn the health endpoint server.
pub fn spawn_http(
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_http_server(addr, shutdown).await })
}

/// Resolves on SIGINT or SIGTERM. The handlers are installed when this is
/// called, not when the future is first polled.
fn shutdown_signal() -> impl std::future::Future<Output = &'static str> + Send + 'static {
    #[cfg(unix)]
    let terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate());

    async move {
        let interrupt = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => "SIGINT",
                Err(e) => {
                    warn!(error = %e, "cannot listen for interrupt");
                    std::future::pending().await
                }
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            match terminate {
                Ok(mut stream) => {
                    stream.recv().await;
                    "SIGTERM"
                }
                Err(e) => {
                    warn!(error = %e, "cannot listen for SIGTERM");
                    std::future::pending().await
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<&'static str>();

        tokio::select! {
            signal = interrupt => signal,
            signal = terminate => signal,
        }
    }
}

/// Cancel `shutdown` on the first SIGINT or SIGTERM so in-flight attempts
/// abort.
pub fn spawn_signal_listener(shutdown: CancellationToken) -> JoinHandle<()> {
    let signal = shutdown_signal();
    tokio::spawn(async move {
        tokio::select! {
            name = signal => {
                info!(signal = name, "shutting down");
                shutdown.cancel();
            }
            _ = shutdown.cancelled() => {}
        }
    })
}

/// Start the controller and the HTTP server and wait until both finish.
pub async fn run_all(client: Client, cfg: OperatorConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let http_addr = compute_http_addr(&cfg);

    let _signals = spawn_signal_listener(shutdown.clone());
    let controller = spawn_controller(client, cfg, shutdown.clone());
    let http = spawn_http(http_addr, shutdown);

    let (c_res, h_res) = try_join!(controller, http)?;
    c_res?;
    h_res?;
    Ok(())
}
