use std::sync::Arc;

use anyhow::Context;
use creations::api;
use creations::config::{OrchestratorConfig, ProviderConfig, ServerConfig};
use creations::jobs::JobService;
use creations::orchestrator::{Orchestrator, SweepScheduler};
use creations::provider::{HttpTaskProvider, ProviderAdapter};
use creations::store::{AssetStore, FsAssetStore, JobStore, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let server = ServerConfig::from_env()?;
    let orchestrator_config = OrchestratorConfig::from_env()?;
    let provider_config = match ProviderConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  export CREATIONS_PROVIDER_URL=https://api.example.com/v1");
            eprintln!("  export CREATIONS_PROVIDER_API_KEY=...");
            std::process::exit(1);
        }
    };

    eprintln!("🎬 Creations v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Provider: {}", provider_config.base_url);
    eprintln!("   Model: {}", provider_config.model);
    eprintln!("   Database: {}", server.db_path.display());

    let backend = Arc::new(
        LibSqlBackend::new_local(&server.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", server.db_path.display()))?,
    );
    let jobs: Arc<dyn JobStore> = backend.clone();
    let assets: Arc<dyn AssetStore> = match &server.asset_dir {
        Some(dir) => {
            let store = FsAssetStore::new(dir)?;
            eprintln!("   Assets: {}", store.root().display());
            Arc::new(store)
        }
        None => {
            eprintln!("   Assets: database");
            backend.clone()
        }
    };

    let provider: Arc<dyn ProviderAdapter> = Arc::new(HttpTaskProvider::new(provider_config)?);
    let orchestrator = Arc::new(Orchestrator::new(
        jobs.clone(),
        assets.clone(),
        provider,
        orchestrator_config,
    ));
    let interval = orchestrator.config().sweep_interval;
    let scheduler = SweepScheduler::spawn(orchestrator, interval);
    eprintln!("   Sweep interval: {}s", interval.as_secs());

    let app = api::routes(JobService::new(jobs, assets));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server.port))
        .await
        .with_context(|| format!("failed to bind port {}", server.port))?;
    eprintln!("   Jobs API: http://0.0.0.0:{}/api/jobs", server.port);
    eprintln!("   Jobs WS: ws://0.0.0.0:{}/ws/jobs\n", server.port);

    let stop = scheduler.cancel_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown requested");
                }
                _ = stop.cancelled() => {}
            }
        })
        .await?;

    scheduler.shutdown().await;
    Ok(())
}
