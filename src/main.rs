use anyhow::Result;
use axum::Router;
use matter_drive::{
    AppState, config, db,
    routes::routes::routes,
    services::{backend, matter_service::MatterService, staging::Staging},
};
use std::{io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting matter-drive with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    // Create parent directory if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let pool = Arc::new(db::connect(db_url).await?);
    db::run_migrations(&pool).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize storage and core services ---
    let backend = backend::from_config(&cfg.storage).await?;
    let staging = Staging::new(&cfg.storage.staging_root).await?;
    let pending = staging.pending().await?;
    if pending > 0 {
        tracing::warn!(
            "{} staging files left over from a previous run in {}",
            pending,
            cfg.storage.staging_root
        );
    }
    let matters = MatterService::new(pool.clone(), backend, staging);

    // --- Background reclamation ---
    let shutdown = CancellationToken::new();
    let reclaimer = (cfg.reclaim_interval_secs > 0).then(|| {
        matters.spawn_reclaimer(
            Duration::from_secs(cfg.reclaim_interval_secs),
            shutdown.clone(),
        )
    });

    // --- Build router ---
    let app: Router = routes().with_state(AppState::new(matters));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("could not listen for shutdown signal: {}", err);
            }
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = reclaimer {
        if let Err(err) = handle.await {
            tracing::warn!("reclaimer task ended abnormally: {}", err);
        }
    }

    Ok(())
}
