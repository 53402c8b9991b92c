//! Read-through article cache in front of the upstream news provider.
//!
//! A page is served from the store when it already holds a full page for the
//! category. Otherwise the provider is queried and every item not yet seen
//! (by source URL) is inserted. Stored rows are never rewritten: the first
//! write for a source URL wins.
//!
//! The cache is freshness-blind: a page that is full locally is never
//! re-polled. Newer upstream items reach the store through [`ArticleFeedCache::ingest`],
//! which the background refresher calls on an interval.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::db::{Article, NewArticle};
use crate::error::{FeedError, Result};
use crate::upstream::{Headline, UpstreamProvider};

pub const NO_TITLE: &str = "No Title";
pub const NO_CONTENT: &str = "No Content";
pub const NO_SUMMARY: &str = "No Summary";
pub const UNKNOWN_SOURCE: &str = "Unknown Source";

/// Persistence capability required by the cache.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Articles in `category`, most recently published first.
    async fn find_articles(&self, category: &str, limit: i64, offset: i64) -> Result<Vec<Article>>;

    async fn find_article_by_source_url(&self, source_url: &str) -> Result<Option<Article>>;

    /// Must fail with [`FeedError::Conflict`] when the source URL is already stored.
    async fn insert_article(&self, article: &NewArticle) -> Result<Article>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub category: String,
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(category: impl Into<String>, page: u32, page_size: u32) -> Self {
        Self {
            category: category.into(),
            page,
            page_size,
        }
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.page_size)
    }
}

pub struct ArticleFeedCache {
    store: Arc<dyn ArticleStore>,
    upstream: Arc<dyn UpstreamProvider>,
    max_page_size: u32,
    concurrency: usize,
}

impl ArticleFeedCache {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        upstream: Arc<dyn UpstreamProvider>,
        max_page_size: u32,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            upstream,
            max_page_size,
            concurrency: concurrency.max(1),
        }
    }

    pub fn validate(&self, request: &PageRequest) -> Result<()> {
        if request.category.trim().is_empty() {
            return Err(FeedError::Validation("category must not be empty".to_string()));
        }
        if request.page < 1 {
            return Err(FeedError::Validation("page must be at least 1".to_string()));
        }
        if request.page_size < 1 || request.page_size > self.max_page_size {
            return Err(FeedError::Validation(format!(
                "pageSize must be between 1 and {}",
                self.max_page_size
            )));
        }
        Ok(())
    }

    pub async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Article>> {
        self.validate(request)?;

        let local = self
            .store
            .find_articles(
                &request.category,
                i64::from(request.page_size),
                request.offset(),
            )
            .await?;

        if local.len() >= request.page_size as usize {
            debug!(
                "Serving '{}' page {} from store ({} articles)",
                request.category,
                request.page,
                local.len()
            );
            return Ok(local);
        }

        debug!(
            "Store has {} of {} articles for '{}' page {}, asking upstream",
            local.len(),
            request.page_size,
            request.category,
            request.page
        );
        self.ingest(request).await
    }

    /// Pulls one page from upstream and persists the items not yet stored.
    /// Returns the page in upstream order, existing rows included.
    pub async fn ingest(&self, request: &PageRequest) -> Result<Vec<Article>> {
        self.validate(request)?;

        let headlines = self
            .upstream
            .top_headlines(&request.category, request.page, request.page_size)
            .await?;
        let received = headlines.len();

        let resolved: Vec<Option<Article>> =
            stream::iter(headlines.into_iter().take(request.page_size as usize))
                .map(|headline| self.resolve(&request.category, headline))
                .buffered(self.concurrency)
                .try_collect()
                .await?;
        let articles: Vec<Article> = resolved.into_iter().flatten().collect();

        info!(
            "Ingested '{}' page {}: {} of {} upstream items kept",
            request.category,
            request.page,
            articles.len(),
            received
        );
        Ok(articles)
    }

    /// Existing row for the headline's source URL, or a newly inserted one.
    /// `None` when the headline is malformed.
    async fn resolve(&self, category: &str, headline: Headline) -> Result<Option<Article>> {
        let new_article = match new_article_from_headline(category, &headline) {
            Ok(article) => article,
            Err(reason) => {
                warn!("Skipping upstream item: {}", reason);
                return Ok(None);
            }
        };

        if let Some(existing) = self
            .store
            .find_article_by_source_url(&new_article.source_url)
            .await?
        {
            return Ok(Some(existing));
        }

        match self.store.insert_article(&new_article).await {
            Ok(article) => Ok(Some(article)),
            Err(e) if e.is_conflict() => {
                debug!("Lost insert race for {}, re-reading", new_article.source_url);
                let existing = self
                    .store
                    .find_article_by_source_url(&new_article.source_url)
                    .await?;
                if existing.is_none() {
                    warn!(
                        "Conflict on {} but no stored row found, skipping",
                        new_article.source_url
                    );
                }
                Ok(existing)
            }
            Err(e) => Err(e),
        }
    }
}

/// The value as sent upstream, unless it is missing or whitespace only.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Parses the ISO-8601 forms seen in upstream timestamps. Values without an
/// offset are read as UTC, bare dates as midnight UTC.
pub fn parse_published_at(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    let raw = raw.trim();
    let rfc3339_err = match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => return Ok(dt.with_timezone(&Utc)),
        Err(e) => e,
    };
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(rfc3339_err)
}

/// Builds the stored form of an upstream item, applying the field fallbacks.
/// Errors name why the item cannot be stored.
pub fn new_article_from_headline(
    category: &str,
    headline: &Headline,
) -> std::result::Result<NewArticle, String> {
    let source_url = non_empty(&headline.url)
        .ok_or_else(|| "item has no url".to_string())?
        .trim()
        .to_string();

    let published_raw = non_empty(&headline.published_at)
        .ok_or_else(|| format!("{} has no publishedAt", source_url))?;
    let published_at = parse_published_at(published_raw).map_err(|e| {
        format!("{} has invalid publishedAt '{}': {}", source_url, published_raw, e)
    })?;

    let title = non_empty(&headline.title).unwrap_or(NO_TITLE);
    let description = non_empty(&headline.description);
    let content = non_empty(&headline.content)
        .or(description)
        .unwrap_or(NO_CONTENT);

    Ok(NewArticle {
        title: title.to_string(),
        content: content.to_string(),
        summary: Some(description.unwrap_or(NO_SUMMARY).to_string()),
        image_url: non_empty(&headline.url_to_image).map(str::to_string),
        source_url,
        source_name: non_empty(&headline.source.name)
            .unwrap_or(UNKNOWN_SOURCE)
            .to_string(),
        published_at,
        category: category.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::HeadlineSource;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory store enforcing source URL uniqueness.
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<Article>>,
        // Source URLs whose next lookup pretends the row is absent
        hide_once: Mutex<HashMap<String, usize>>,
        // Source URLs whose insert reports a conflict without any row existing
        phantom_conflicts: HashSet<String>,
        fail: bool,
    }

    impl MemoryStore {
        fn len(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        fn seed(&self, category: &str, url: &str, hours_ago: i64) {
            let mut rows = self.rows.lock().unwrap();
            let id = rows.len() as i64 + 1;
            rows.push(Article {
                id,
                title: format!("Stored {}", url),
                content: "Stored content".to_string(),
                summary: None,
                image_url: None,
                source_url: url.to_string(),
                source_name: "Store".to_string(),
                published_at: Utc::now() - chrono::Duration::hours(hours_ago),
                category: category.to_string(),
                created_at: Utc::now(),
            });
        }
    }

    #[async_trait]
    impl ArticleStore for MemoryStore {
        async fn find_articles(&self, category: &str, limit: i64, offset: i64) -> Result<Vec<Article>> {
            if self.fail {
                return Err(FeedError::Persistence(sqlx::Error::PoolTimedOut));
            }
            let mut rows: Vec<Article> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.category == category)
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.published_at.cmp(&a.published_at).then(b.id.cmp(&a.id)));
            Ok(rows
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect())
        }

        async fn find_article_by_source_url(&self, source_url: &str) -> Result<Option<Article>> {
            if let Some(remaining) = self.hide_once.lock().unwrap().get_mut(source_url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok(None);
                }
            }
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.source_url == source_url)
                .cloned())
        }

        async fn insert_article(&self, article: &NewArticle) -> Result<Article> {
            if self.phantom_conflicts.contains(&article.source_url) {
                return Err(FeedError::Conflict(article.source_url.clone()));
            }
            let mut rows = self.rows.lock().unwrap();
            if rows.iter().any(|a| a.source_url == article.source_url) {
                return Err(FeedError::Conflict(article.source_url.clone()));
            }
            let stored = Article {
                id: rows.len() as i64 + 1,
                title: article.title.clone(),
                content: article.content.clone(),
                summary: article.summary.clone(),
                image_url: article.image_url.clone(),
                source_url: article.source_url.clone(),
                source_name: article.source_name.clone(),
                published_at: article.published_at,
                category: article.category.clone(),
                created_at: Utc::now(),
            };
            rows.push(stored.clone());
            Ok(stored)
        }
    }

    /// Upstream fake returning a fixed response and counting calls.
    struct FakeUpstream {
        response: std::result::Result<Vec<Headline>, String>,
        calls: AtomicUsize,
    }

    impl FakeUpstream {
        fn returning(headlines: Vec<Headline>) -> Self {
            Self {
                response: Ok(headlines),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                response: Err(message.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamProvider for FakeUpstream {
        async fn top_headlines(&self, _category: &str, _page: u32, _page_size: u32) -> Result<Vec<Headline>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone().map_err(FeedError::Upstream)
        }
    }

    fn headline(url: &str) -> Headline {
        Headline {
            source: HeadlineSource {
                id: None,
                name: Some("Wire".to_string()),
            },
            title: Some(format!("Headline {}", url)),
            description: Some("Description".to_string()),
            url: Some(url.to_string()),
            published_at: Some("2024-12-09T12:00:00Z".to_string()),
            content: Some("Content".to_string()),
            ..Default::default()
        }
    }

    fn cache_with(store: Arc<MemoryStore>, upstream: Arc<FakeUpstream>) -> ArticleFeedCache {
        ArticleFeedCache::new(store, upstream, 100, 4)
    }

    mod headline_conversion_tests {
        use super::*;

        #[test]
        fn test_content_falls_back_to_description() {
            let mut item = headline("https://a.com/1");
            item.content = None;
            item.description = Some("short desc".to_string());

            let article = new_article_from_headline("tech", &item).unwrap();
            assert_eq!(article.content, "short desc");
            assert_eq!(article.summary.as_deref(), Some("short desc"));
        }

        #[test]
        fn test_content_placeholder_when_nothing_available() {
            let mut item = headline("https://a.com/1");
            item.content = None;
            item.description = None;

            let article = new_article_from_headline("tech", &item).unwrap();
            assert_eq!(article.content, NO_CONTENT);
            assert_eq!(article.summary.as_deref(), Some(NO_SUMMARY));
        }

        #[test]
        fn test_placeholders_for_title_and_source() {
            let mut item = headline("https://a.com/1");
            item.title = Some(String::new());
            item.source.name = None;

            let article = new_article_from_headline("tech", &item).unwrap();
            assert_eq!(article.title, NO_TITLE);
            assert_eq!(article.source_name, UNKNOWN_SOURCE);
            assert!(article.image_url.is_none());
        }

        #[test]
        fn test_published_at_parsed_with_offset() {
            let mut item = headline("https://a.com/1");
            item.published_at = Some("2024-12-09T14:00:00+02:00".to_string());

            let article = new_article_from_headline("tech", &item).unwrap();
            assert_eq!(article.published_at.to_rfc3339(), "2024-12-09T12:00:00+00:00");
            assert_eq!(article.category, "tech");
        }

        #[test]
        fn test_published_at_without_offset_is_utc() {
            let mut item = headline("https://a.com/1");
            item.published_at = Some("2024-12-09T12:00:00".to_string());

            let article = new_article_from_headline("tech", &item).unwrap();
            assert_eq!(article.published_at.to_rfc3339(), "2024-12-09T12:00:00+00:00");
        }

        #[test]
        fn test_published_at_with_compact_offset() {
            let mut item = headline("https://a.com/1");
            item.published_at = Some("2024-12-09T12:00:00+0000".to_string());

            let article = new_article_from_headline("tech", &item).unwrap();
            assert_eq!(article.published_at.to_rfc3339(), "2024-12-09T12:00:00+00:00");

            item.published_at = Some("2024-12-09T14:30:00+0200".to_string());
            let article = new_article_from_headline("tech", &item).unwrap();
            assert_eq!(article.published_at.to_rfc3339(), "2024-12-09T12:30:00+00:00");
        }

        #[test]
        fn test_published_at_date_only_is_midnight_utc() {
            let mut item = headline("https://a.com/1");
            item.published_at = Some("2024-12-09".to_string());

            let article = new_article_from_headline("tech", &item).unwrap();
            assert_eq!(article.published_at.to_rfc3339(), "2024-12-09T00:00:00+00:00");
        }

        #[test]
        fn test_published_at_fractional_seconds_without_offset() {
            let parsed = parse_published_at("2024-12-09T12:00:00.250").unwrap();
            assert_eq!(parsed.timestamp_millis() % 1000, 250);
        }

        #[test]
        fn test_upstream_whitespace_is_preserved() {
            let mut item = headline(" https://a.com/1 ");
            item.title = Some("  Padded title ".to_string());
            item.content = Some("Line one\n".to_string());
            item.description = Some(" desc".to_string());
            item.source.name = Some("Wire ".to_string());

            let article = new_article_from_headline("tech", &item).unwrap();
            assert_eq!(article.title, "  Padded title ");
            assert_eq!(article.content, "Line one\n");
            assert_eq!(article.summary.as_deref(), Some(" desc"));
            assert_eq!(article.source_name, "Wire ");
            // The dedup key is normalized
            assert_eq!(article.source_url, "https://a.com/1");
        }

        #[test]
        fn test_whitespace_only_fields_use_fallbacks() {
            let mut item = headline("https://a.com/1");
            item.title = Some("   ".to_string());
            item.content = Some("\t".to_string());
            item.description = Some("fallback".to_string());

            let article = new_article_from_headline("tech", &item).unwrap();
            assert_eq!(article.title, NO_TITLE);
            assert_eq!(article.content, "fallback");
        }

        #[test]
        fn test_missing_url_is_rejected() {
            let mut item = headline("https://a.com/1");
            item.url = None;
            assert!(new_article_from_headline("tech", &item).is_err());
        }

        #[test]
        fn test_unparseable_date_is_rejected() {
            let mut item = headline("https://a.com/1");
            item.published_at = Some("yesterday".to_string());
            assert!(new_article_from_headline("tech", &item).is_err());

            item.published_at = None;
            assert!(new_article_from_headline("tech", &item).is_err());
        }
    }

    mod page_request_tests {
        use super::*;

        #[test]
        fn test_offset() {
            assert_eq!(PageRequest::new("tech", 1, 10).offset(), 0);
            assert_eq!(PageRequest::new("tech", 3, 10).offset(), 20);
        }

        #[test]
        fn test_validation() {
            let cache = cache_with(
                Arc::new(MemoryStore::default()),
                Arc::new(FakeUpstream::returning(vec![])),
            );

            assert!(cache.validate(&PageRequest::new("tech", 1, 10)).is_ok());
            assert!(cache.validate(&PageRequest::new("tech", 0, 10)).is_err());
            assert!(cache.validate(&PageRequest::new("tech", 1, 0)).is_err());
            assert!(cache.validate(&PageRequest::new("tech", 1, 101)).is_err());
            assert!(cache.validate(&PageRequest::new(" ", 1, 10)).is_err());
        }
    }

    mod fetch_page_tests {
        use super::*;

        #[tokio::test]
        async fn test_full_local_page_skips_upstream() {
            let store = Arc::new(MemoryStore::default());
            for i in 0..10 {
                store.seed("tech", &format!("https://local.com/{}", i), i);
            }
            let upstream = Arc::new(FakeUpstream::returning(vec![headline("https://new.com/1")]));
            let cache = cache_with(store.clone(), upstream.clone());

            let page = cache.fetch_page(&PageRequest::new("tech", 1, 10)).await.unwrap();

            assert_eq!(page.len(), 10);
            assert_eq!(page[0].source_url, "https://local.com/0");
            assert_eq!(upstream.calls(), 0);
            assert_eq!(store.len(), 10);
        }

        #[tokio::test]
        async fn test_partial_local_page_merges_upstream() {
            let store = Arc::new(MemoryStore::default());
            for i in 0..3 {
                store.seed("tech", &format!("https://shared.com/{}", i), i);
            }
            let mut items: Vec<Headline> = (0..3)
                .map(|i| headline(&format!("https://shared.com/{}", i)))
                .collect();
            items.extend((0..7).map(|i| headline(&format!("https://fresh.com/{}", i))));
            let upstream = Arc::new(FakeUpstream::returning(items));
            let cache = cache_with(store.clone(), upstream.clone());

            let page = cache.fetch_page(&PageRequest::new("tech", 1, 10)).await.unwrap();

            assert_eq!(page.len(), 10);
            assert_eq!(store.len(), 10);
            assert_eq!(upstream.calls(), 1);
            // Existing rows are kept as stored
            assert_eq!(page[0].title, "Stored https://shared.com/0");
            // Upstream order is preserved
            assert_eq!(page[3].source_url, "https://fresh.com/0");
            assert_eq!(page[9].source_url, "https://fresh.com/6");
        }

        #[tokio::test]
        async fn test_second_call_adds_nothing() {
            let store = Arc::new(MemoryStore::default());
            let items: Vec<Headline> = (0..5)
                .map(|i| headline(&format!("https://fresh.com/{}", i)))
                .collect();
            let upstream = Arc::new(FakeUpstream::returning(items));
            let cache = cache_with(store.clone(), upstream.clone());
            let request = PageRequest::new("tech", 1, 10);

            let first = cache.fetch_page(&request).await.unwrap();
            let second = cache.fetch_page(&request).await.unwrap();

            assert_eq!(store.len(), 5);
            assert_eq!(first, second);
            assert_eq!(upstream.calls(), 2);
        }

        #[tokio::test]
        async fn test_malformed_items_are_skipped() {
            let store = Arc::new(MemoryStore::default());
            let mut bad_date = headline("https://bad.com/date");
            bad_date.published_at = Some("not a date".to_string());
            let mut no_url = headline("https://bad.com/url");
            no_url.url = None;
            let upstream = Arc::new(FakeUpstream::returning(vec![
                headline("https://good.com/1"),
                bad_date,
                no_url,
                headline("https://good.com/2"),
            ]));
            let cache = cache_with(store.clone(), upstream);

            let page = cache.fetch_page(&PageRequest::new("tech", 1, 10)).await.unwrap();

            assert_eq!(page.len(), 2);
            assert_eq!(page[1].source_url, "https://good.com/2");
            assert_eq!(store.len(), 2);
        }

        #[tokio::test]
        async fn test_upstream_failure_fails_page() {
            let store = Arc::new(MemoryStore::default());
            store.seed("tech", "https://local.com/1", 1);
            let upstream = Arc::new(FakeUpstream::failing("HTTP 500"));
            let cache = cache_with(store.clone(), upstream);

            let result = cache.fetch_page(&PageRequest::new("tech", 1, 10)).await;

            assert!(matches!(result, Err(FeedError::Upstream(_))));
            assert_eq!(store.len(), 1);
        }

        #[tokio::test]
        async fn test_store_failure_fails_page() {
            let store = Arc::new(MemoryStore {
                fail: true,
                ..Default::default()
            });
            let upstream = Arc::new(FakeUpstream::returning(vec![]));
            let cache = cache_with(store, upstream.clone());

            let result = cache.fetch_page(&PageRequest::new("tech", 1, 10)).await;

            assert!(matches!(result, Err(FeedError::Persistence(_))));
            assert_eq!(upstream.calls(), 0);
        }

        #[tokio::test]
        async fn test_extra_upstream_items_are_ignored() {
            let store = Arc::new(MemoryStore::default());
            let items: Vec<Headline> = (0..8)
                .map(|i| headline(&format!("https://fresh.com/{}", i)))
                .collect();
            let cache = cache_with(store.clone(), Arc::new(FakeUpstream::returning(items)));

            let page = cache.fetch_page(&PageRequest::new("tech", 1, 5)).await.unwrap();

            assert_eq!(page.len(), 5);
            assert_eq!(store.len(), 5);
        }

        #[tokio::test]
        async fn test_invalid_request_does_not_touch_store_or_upstream() {
            let upstream = Arc::new(FakeUpstream::returning(vec![]));
            let cache = cache_with(Arc::new(MemoryStore::default()), upstream.clone());

            let result = cache.fetch_page(&PageRequest::new("tech", 0, 10)).await;

            assert!(matches!(result, Err(FeedError::Validation(_))));
            assert_eq!(upstream.calls(), 0);
        }
    }

    mod conflict_tests {
        use super::*;

        #[tokio::test]
        async fn test_lost_insert_race_rereads_existing_row() {
            let store = Arc::new(MemoryStore::default());
            store.seed("tech", "https://race.com/1", 1);
            // The existence check misses, as if another request inserted in between
            store
                .hide_once
                .lock()
                .unwrap()
                .insert("https://race.com/1".to_string(), 1);
            let upstream = Arc::new(FakeUpstream::returning(vec![headline("https://race.com/1")]));
            let cache = cache_with(store.clone(), upstream);

            let page = cache.fetch_page(&PageRequest::new("tech", 1, 10)).await.unwrap();

            assert_eq!(page.len(), 1);
            assert_eq!(page[0].title, "Stored https://race.com/1");
            assert_eq!(store.len(), 1);
        }

        #[tokio::test]
        async fn test_conflict_without_stored_row_skips_item() {
            let store = Arc::new(MemoryStore {
                phantom_conflicts: HashSet::from(["https://ghost.com/1".to_string()]),
                ..Default::default()
            });
            let upstream = Arc::new(FakeUpstream::returning(vec![
                headline("https://real.com/1"),
                headline("https://ghost.com/1"),
                headline("https://real.com/2"),
            ]));
            let cache = cache_with(store.clone(), upstream);

            let page = cache.fetch_page(&PageRequest::new("tech", 1, 10)).await.unwrap();

            let urls: Vec<&str> = page.iter().map(|a| a.source_url.as_str()).collect();
            assert_eq!(urls, vec!["https://real.com/1", "https://real.com/2"]);
            assert_eq!(store.len(), 2);
        }

        #[tokio::test]
        async fn test_duplicate_urls_in_one_batch() {
            let store = Arc::new(MemoryStore::default());
            let upstream = Arc::new(FakeUpstream::returning(vec![
                headline("https://dup.com/1"),
                headline("https://dup.com/1"),
                headline("https://dup.com/2"),
            ]));
            let cache = cache_with(store.clone(), upstream);

            let page = cache.fetch_page(&PageRequest::new("tech", 1, 10)).await.unwrap();

            assert_eq!(page.len(), 3);
            assert_eq!(page[0].id, page[1].id);
            assert_eq!(store.len(), 2);
        }

        #[tokio::test]
        async fn test_concurrent_fetches_never_duplicate() {
            let store = Arc::new(MemoryStore::default());
            let items: Vec<Headline> = (0..10)
                .map(|i| headline(&format!("https://shared.com/{}", i)))
                .collect();
            let cache = Arc::new(cache_with(
                store.clone(),
                Arc::new(FakeUpstream::returning(items)),
            ));
            let request = PageRequest::new("tech", 1, 10);

            let (a, b) = tokio::join!(cache.fetch_page(&request), cache.fetch_page(&request));

            assert_eq!(a.unwrap().len(), 10);
            assert_eq!(b.unwrap().len(), 10);
            assert_eq!(store.len(), 10);
        }
    }
}
