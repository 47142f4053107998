use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use batchd::engine::Engine;
use batchd::settings::Settings;
use batchd::store::MemoryStore;
use batchd::{observability, sweeper, wire};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Resolves when SIGTERM or ctrl-c arrives.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

/// Poll the connection semaphore until every permit is back or the
/// deadline passes.
async fn drain_connections(semaphore: &Semaphore, max_connections: usize, deadline: Duration) {
    info!("draining connections...");
    let gave_up = tokio::time::timeout(deadline, async {
        while semaphore.available_permits() < max_connections {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .is_err();
    if gave_up {
        let remaining = max_connections - semaphore.available_permits();
        warn!("drain timeout, {remaining} connections still open");
    } else {
        info!("all connections drained");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("BATCHD_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    observability::init(metrics_port);

    let port: u16 = env_or("BATCHD_PORT", 7433);
    let bind = std::env::var("BATCHD_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let max_connections: usize = env_or("BATCHD_MAX_CONNECTIONS", 256);
    let sweep_interval_secs: u64 = env_or("BATCHD_SWEEP_INTERVAL_SECS", 300);

    let settings = Settings::from_env();
    let engine = Arc::new(Engine::new(Arc::new(MemoryStore::new()), settings.clone()));
    let semaphore = Arc::new(Semaphore::new(max_connections));

    tokio::spawn(sweeper::run_sweeper(
        engine.clone(),
        Duration::from_secs(sweep_interval_secs),
    ));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("batchd listening on {addr}");
    info!("  max_connections: {max_connections}");
    info!("  sweep_interval: {sweep_interval_secs}s");
    info!("  lock_wait: {:?}", settings.lock_wait);
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let (socket, peer) = tokio::select! {
            result = listener.accept() => match result {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept error: {e}");
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        };

        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
            warn!("connection limit reached, rejecting {peer}");
            metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
            drop(socket);
            continue;
        };

        info!("connection from {peer}");
        metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
        let engine = engine.clone();

        tokio::spawn(async move {
            let _permit = permit; // held until connection closes
            if let Err(e) = wire::process_connection(socket, engine).await {
                error!("connection error from {peer}: {e}");
            }
            metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
        });
    }

    drain_connections(&semaphore, max_connections, Duration::from_secs(10)).await;
    info!("batchd stopped");
    Ok(())
}
