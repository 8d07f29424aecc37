//! Marketplace API server.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketplace_api::config::{AppConfig, StoreBackend};
use marketplace_api::services::auth::TokenService;
use marketplace_api::services::events::EventPublisher;
use marketplace_api::services::seed;
use marketplace_api::store::{MemoryStore, PgStore, Store};
use marketplace_api::{web, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    tracing::debug!(?config, "configuration loaded");

    let store: Arc<dyn Store> = match config.backend {
        StoreBackend::Postgres => {
            let url = config.database_url.as_deref().context("DATABASE_URL is required")?;
            let pg = PgStore::connect(url, config.database_max_connections).await.context("connecting to Postgres")?;
            pg.migrate().await.context("running migrations")?;
            Arc::new(pg)
        }
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store, data is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    if config.seed_categories {
        seed::seed_categories(store.as_ref()).await.context("seeding categories")?;
    }

    let events = EventPublisher::connect(config.nats_url.as_deref()).await;
    let tokens = TokenService::new(&config.token_secret, config.token_ttl_hours)?;
    let state = AppState::new(store, tokens, events, config.shipping);
    let app = web::router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    tracing::info!("marketplace-api listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
