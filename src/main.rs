use smartmeter_ingest::{
    aggregate::Aggregator,
    api::{create_router, AppState},
    broker::Broker,
    config::{Config, SourceKind},
    db,
    forward::Forwarder,
    ingest::{Pipeline, ReadingSink},
    repositories::{SqliteTierStore, TierStore},
    source::start_source,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(path = %cfg_path, source = ?cfg.source.kind, "loaded config");

    if let Some(fwd) = cfg.forward.clone() {
        let forwarder: Arc<dyn ReadingSink> = Arc::new(Forwarder::new(&fwd)?);
        info!(url = %fwd.url, "forwarding readings to remote pipeline");
        let Some(task) = start_source(&cfg.source, forwarder)? else {
            anyhow::bail!("forward mode has no local source to read from");
        };
        task.run_until(shutdown_signal()).await?;
        info!("forwarder stopped");
        return Ok(());
    }

    let pool = db::connect(&cfg.database.url).await?;
    db::ensure_schema(&pool).await?;
    info!("connected to database");

    let store: Arc<dyn TierStore> = Arc::new(SqliteTierStore::new(pool));
    let aggregator = Aggregator::restore(store).await;
    let pipeline = Arc::new(Pipeline::new(aggregator, Broker::new()));

    // A device that cannot be opened only disables ingestion; stored data stays queryable.
    let ingestion = match start_source(&cfg.source, pipeline.clone()) {
        Ok(task) => {
            if cfg.source.kind == SourceKind::None {
                info!("no local source configured; accepting pushed readings only");
            }
            task
        }
        Err(e) => {
            error!(error = %e, "cannot start local source; ingestion disabled");
            None
        }
    };

    let addr = format!("{}:{}", cfg.api.host, cfg.api.port);
    let app = create_router(AppState::new(pipeline, cfg.clone()));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = ingestion {
        if let Err(e) = task.stop().await {
            warn!(error = %e, "ingestion task ended with error");
        }
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}
