use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info};

use crate::cache::{ArticleFeedCache, PageRequest};

/// Periodically ingests the first page of each configured category.
pub struct Refresher {
    cache: Arc<ArticleFeedCache>,
    categories: Vec<String>,
    page_size: u32,
    refreshing: Arc<RwLock<bool>>,
}

impl Refresher {
    pub fn new(cache: Arc<ArticleFeedCache>, categories: Vec<String>, page_size: u32) -> Self {
        Self {
            cache,
            categories,
            page_size,
            refreshing: Arc::new(RwLock::new(false)),
        }
    }

    pub fn has_categories(&self) -> bool {
        !self.categories.is_empty()
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    pub async fn refresh_all(&self) {
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Refresh already in progress, skipping");
                return;
            }
            *refreshing = true;
        }

        info!("Refreshing {} categories", self.categories.len());
        for category in &self.categories {
            let request = PageRequest::new(category.clone(), 1, self.page_size);
            match self.cache.ingest(&request).await {
                Ok(articles) => info!("Category '{}' refreshed, {} articles", category, articles.len()),
                Err(e) => error!("Failed to refresh category '{}': {}", category, e),
            }
        }
        info!("Category refresh complete");

        *self.refreshing.write().await = false;
    }
}

/// Sleep between scheduled refreshes; huge intervals saturate instead of overflowing.
fn refresh_period(interval_minutes: u64) -> Duration {
    Duration::from_secs(interval_minutes.saturating_mul(60))
}

pub async fn start_background_refresh(refresher: Arc<Refresher>, interval_minutes: u64) {
    let interval = refresh_period(interval_minutes);

    info!("Starting initial category refresh");
    refresher.refresh_all().await;

    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled category refresh");
        refresher.refresh_all().await;
    }
}
