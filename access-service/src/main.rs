use access_service::{
    build_router,
    config::{AccessConfig, ProviderMode, StoreBackend},
    db,
    services::{
        bootstrap::seed_default_catalog, Database, HttpIdentityProvider, IdentityProvider,
        MemoryStore, MockIdentityProvider, Stores,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::middleware::metrics::install_recorder;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AccessConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    let metrics = install_recorder()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        store = ?config.store,
        "Starting access service"
    );

    let stores = match config.store {
        StoreBackend::Postgres => {
            let pool = db::connect_and_migrate(&config.database).await?;
            Stores::shared(Arc::new(Database::new(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            Stores::shared(Arc::new(MemoryStore::new()))
        }
    };

    let provider: Arc<dyn IdentityProvider> = match config.identity_provider.mode {
        ProviderMode::Http => Arc::new(
            HttpIdentityProvider::new(&config.identity_provider)
                .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?,
        ),
        ProviderMode::Mock => {
            tracing::warn!("Using the mock identity provider");
            Arc::new(MockIdentityProvider::new())
        }
    };

    seed_default_catalog(
        stores.registry.as_ref(),
        stores.principals.as_ref(),
        &config.authorization.admin_role_name,
        config.authorization.bootstrap_admin_email.as_deref(),
    )
    .await?;

    let state = AppState::new(config.clone(), &stores, provider, Some(metrics));
    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
