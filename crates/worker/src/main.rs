use fleiss::admin;
use fleiss::config::Config;
use fleiss::db;
use fleiss::jobs::{JobStore, PgJobStore};
use fleiss::worker::WorkerPool;

use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod handlers;
use handlers::build_registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    init_tracing(&cfg)?;

    let database_url = cfg.require_database_url()?.to_string();
    let settings = cfg.pool.clone();

    tracing::info!(
        worker_id = %settings.worker_id,
        queues = ?settings.queues,
        concurrency = settings.concurrency,
        wait_time_ms = settings.wait_time.as_millis() as u64,
        reap_interval_ms = settings.reap_interval.as_millis() as u64,
        lease_secs = settings.lease.map(|l| l.as_secs()),
        admin = cfg.admin_addr.as_deref().unwrap_or("disabled"),
        migrate_on_startup = cfg.migrate_on_startup,
        "fleiss worker starting"
    );

    let pool = db::make_pool(&database_url, settings.concurrency).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));
    let workers = WorkerPool::new(store.clone(), build_registry(), settings)?;
    install_shutdown_handler(workers.shutdown_token());

    let running = workers.start();

    // ---- Admin API task ----
    if let Some(addr) = cfg.admin_addr.clone() {
        let app = admin::router(admin::AdminState {
            store: store.clone(),
            workers: running.board(),
        });
        let shutdown = running.shutdown_token();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("admin api listening on http://{addr}");
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(err) = served {
                tracing::error!(error = %err, "admin api failed");
            }
        });
    }

    running.wait().await?;
    tracing::info!("fleiss worker exited cleanly");
    Ok(())
}

fn init_tracing(cfg: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &cfg.logfile {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

/// Cancels `token` on SIGTERM or SIGINT. In-flight jobs finish before the pool stops.
fn install_shutdown_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(err), _) | (_, Err(err)) => {
                    tracing::error!(error = %err, "failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }

        token.cancel();
    });
}
