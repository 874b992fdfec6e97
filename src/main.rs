use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use snaplink::analytics::GeoIpService;
use snaplink::clock::SystemClock;
use snaplink::codegen::CodeGenerator;
use snaplink::config::Config;
use snaplink::registry::UrlRegistry;
use snaplink::storage::{CachedStorage, SqliteStorage, Storage};
use snaplink::App;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("snaplink=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    info!("Using SQLite storage: {}", config.database.url);
    let sqlite: Arc<dyn Storage> = Arc::new(
        SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
    );
    let storage: Arc<dyn Storage> = Arc::new(CachedStorage::new(
        sqlite,
        config.cache.max_entries,
        config.cache.ttl_secs,
    ));

    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    let geoip = Arc::new(GeoIpService::from_config(&config.analytics)?);
    if geoip.is_enabled() {
        info!("Geolocation enabled");
    } else {
        info!("Geolocation disabled, locations will be recorded as Unknown");
    }

    let generator = CodeGenerator::new(config.short_code.length, config.short_code.max_attempts);
    let app = App::build(
        Arc::clone(&storage),
        geoip,
        Arc::new(SystemClock),
        generator,
        &config,
    );

    if config.purge_interval_secs > 0 {
        spawn_purge_task(Arc::clone(&app.registry), config.purge_interval_secs);
    }

    if config.auth.api_keys.is_empty() {
        info!("API key authentication is disabled - management routes are open");
    } else {
        info!(keys = config.auth.api_keys.len(), "API key authentication enabled");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.router
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    app.pipeline.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

fn spawn_purge_task(registry: Arc<UrlRegistry>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            if let Err(e) = registry.purge_expired().await {
                error!(error = %e, "failed to purge expired links");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
