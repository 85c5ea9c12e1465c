use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use courtside::config::{Config, StoreMode};
use courtside::engine::Engine;
use courtside::store::{InMemoryStore, Store, WalStore};
use courtside::{reaper, server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    courtside::observability::init(config.metrics_port)?;

    let store: Arc<dyn Store> = match config.store {
        StoreMode::Memory => Arc::new(InMemoryStore::new()),
        StoreMode::Wal => {
            std::fs::create_dir_all(&config.data_dir)?;
            Arc::new(WalStore::open(&config.wal_path(), config.compact_threshold)?)
        }
    };
    let engine = Arc::new(Engine::new(store, config.engine.clone()));
    tokio::spawn(reaper::run_reaper(engine.clone(), config.reaper_interval));

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("courtside listening on {addr}");
    info!("  store: {:?}", config.store);
    if config.store == StoreMode::Wal {
        info!("  wal: {}", config.wal_path().display());
    }
    info!("  max_connections: {max_connections}");
    info!("  store_timeout: {:?}", config.engine.store_timeout);

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await.ok();
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(courtside::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(courtside::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(courtside::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = server::process_connection(socket, engine).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(courtside::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    let stuck = engine.dead_letters();
    if !stuck.is_empty() {
        tracing::warn!("{} resources left Reserved by failed releases", stuck.len());
    }
    info!("courtside stopped");
    Ok(())
}
