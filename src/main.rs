use std::path::Path;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsdesk::cache::ArticleFeedCache;
use newsdesk::config::Config;
use newsdesk::db::Database;
use newsdesk::refresher::{start_background_refresh, Refresher};
use newsdesk::routes::{self, AppState};
use newsdesk::upstream::NewsApiClient;

const DEFAULT_CONFIG_PATH: &str = "newsdesk.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsdesk=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var("NEWSDESK_CONFIG").ok();
    let config = match config_path.as_deref() {
        Some(path) => Config::load(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH)?,
        None => {
            info!("No {} found, using defaults", DEFAULT_CONFIG_PATH);
            Config::default()
        }
    }
    .with_env_overrides();
    info!(
        "Loaded configuration with {} refresh categories",
        config.categories.len()
    );

    // Initialize database
    let db = Database::new(&config.database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    let db = Arc::new(db);

    let upstream = Arc::new(NewsApiClient::new(&config.upstream)?);
    let cache = Arc::new(ArticleFeedCache::new(
        db.clone(),
        upstream,
        config.cache.max_page_size,
        config.cache.concurrency,
    ));

    let refresher = Arc::new(Refresher::new(
        cache.clone(),
        config.categories.clone(),
        config.cache.default_page_size,
    ));

    // Start background refresh task
    if config.refresh_interval > 0 && refresher.has_categories() {
        let bg_refresher = refresher.clone();
        let refresh_interval = config.refresh_interval;
        tokio::spawn(async move {
            start_background_refresh(bg_refresher, refresh_interval).await;
        });
    } else {
        info!("Background refresh disabled");
    }

    let state = Arc::new(AppState {
        db,
        cache,
        refresher,
        identity_header: config.identity_header.clone(),
        default_page_size: config.cache.default_page_size,
    });

    let app = routes::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Server starting on http://{}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
