//! Starchat API Server

use std::net::SocketAddr;

use starchat_api::{
    bootstrap::{self, BootstrapOptions},
    routes::create_router,
    AppState, Config,
};
use starchat_billing::StripeClient;
use starchat_shared::{create_migration_pool, create_pool, run_migrations};
use starchat_support::ChatwootClient;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    starchat_api::init_tracing("info,starchat_api=debug");

    tracing::info!("Starting Starchat API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let stripe = StripeClient::from_env()?;
    let chatwoot = ChatwootClient::from_env()?;
    tracing::info!("Configuration loaded");

    if config.run_migrations {
        tracing::info!("Running database migrations...");
        let migration_pool = create_migration_pool(&config.database_url).await?;
        run_migrations(&migration_pool).await?;
        migration_pool.close().await;
        tracing::info!("Database migrations applied");
    }

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database connection established");

    let state = AppState::new(pool, config.clone(), stripe, chatwoot);

    let seeded = bootstrap::run(&state.store, &BootstrapOptions::from(&config)).await?;
    tracing::info!(events = seeded.len(), "Bootstrap complete");
    state.commit(seeded).await;

    let app = create_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
