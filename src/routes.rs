use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Query, State},
    http::request::Parts,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::cache::{ArticleFeedCache, PageRequest};
use crate::db::Database;
use crate::error::{ApiError, FeedError};
use crate::refresher::Refresher;

pub const DEFAULT_CATEGORY: &str = "general";

pub struct AppState {
    pub db: Arc<Database>,
    pub cache: Arc<ArticleFeedCache>,
    pub refresher: Arc<Refresher>,
    pub identity_header: String,
    pub default_page_size: u32,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/news", get(news))
        .route(
            "/api/bookmarks",
            get(list_bookmarks).post(add_bookmark).delete(remove_bookmark),
        )
        .route(
            "/api/interests",
            get(list_interests).post(add_interest).delete(remove_interest),
        )
        .route("/refresh", post(refresh))
        .route("/refresh/status", get(refresh_status))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `Json` whose rejections render as `{"error": ..}`.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Query` whose rejections render as `{"error": ..}`.
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Identity forwarded by the authenticating proxy in front of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(state.identity_header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Principal(value.to_string()))
            .ok_or(ApiError::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsQuery {
    pub category: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl NewsQuery {
    pub fn into_request(self, default_page_size: u32) -> PageRequest {
        let category = self
            .category
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        PageRequest::new(
            category,
            self.page.unwrap_or(1),
            self.page_size.unwrap_or(default_page_size),
        )
    }
}

pub async fn news(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<NewsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let request = query.into_request(state.default_page_size);
    let articles = state
        .cache
        .fetch_page(&request)
        .await
        .map_err(|e| ApiError::failed("fetch news", e))?;
    Ok(Json(articles))
}

pub async fn list_bookmarks(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<impl IntoResponse, ApiError> {
    let bookmarks = state
        .db
        .get_bookmarks(&principal.0)
        .await
        .map_err(|e| ApiError::failed("fetch bookmarks", e))?;
    Ok(Json(bookmarks))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkBody {
    pub article_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkQuery {
    pub article_id: Option<i64>,
}

pub async fn add_bookmark(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    ApiJson(body): ApiJson<BookmarkBody>,
) -> Result<impl IntoResponse, ApiError> {
    let article_id = body
        .article_id
        .ok_or_else(|| ApiError::BadRequest("Article ID is required".to_string()))?;
    let failed = |e: FeedError| ApiError::failed("add bookmark", e);

    let article = state
        .db
        .get_article(article_id)
        .await
        .map_err(failed)?
        .ok_or_else(|| ApiError::NotFound("Article not found".to_string()))?;

    if state
        .db
        .find_bookmark(&principal.0, article_id)
        .await
        .map_err(failed)?
        .is_some()
    {
        return Err(ApiError::BadRequest("Article already bookmarked".to_string()));
    }

    match state.db.add_bookmark(&principal.0, article).await {
        Ok(bookmark) => Ok(Json(bookmark)),
        // Lost a race with a concurrent request for the same bookmark
        Err(e) if e.is_conflict() => Err(ApiError::BadRequest(
            "Article already bookmarked".to_string(),
        )),
        Err(e) => Err(failed(e)),
    }
}

pub async fn remove_bookmark(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    ApiQuery(query): ApiQuery<BookmarkQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let article_id = query
        .article_id
        .ok_or_else(|| ApiError::BadRequest("Article ID is required".to_string()))?;
    let failed = |e: FeedError| ApiError::failed("remove bookmark", e);

    let bookmark = state
        .db
        .find_bookmark(&principal.0, article_id)
        .await
        .map_err(failed)?
        .ok_or_else(|| ApiError::NotFound("Bookmark not found".to_string()))?;

    state.db.delete_bookmark(bookmark.id).await.map_err(failed)?;
    Ok(Json(json!({"success": true})))
}

pub async fn list_interests(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<impl IntoResponse, ApiError> {
    let interests = state
        .db
        .get_interests(&principal.0)
        .await
        .map_err(|e| ApiError::failed("fetch interests", e))?;
    Ok(Json(interests))
}

#[derive(Debug, Deserialize)]
pub struct InterestBody {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InterestQuery {
    pub id: Option<i64>,
}

pub async fn add_interest(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    ApiJson(body): ApiJson<InterestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let name = body
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Interest name is required".to_string()))?;
    let failed = |e: FeedError| ApiError::failed("add interest", e);

    let interest = state.db.find_or_create_interest(&name).await.map_err(failed)?;
    state
        .db
        .link_interest(&principal.0, interest.id)
        .await
        .map_err(failed)?;
    Ok(Json(interest))
}

pub async fn remove_interest(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    ApiQuery(query): ApiQuery<InterestQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let interest_id = query
        .id
        .ok_or_else(|| ApiError::BadRequest("Interest ID is required".to_string()))?;

    state
        .db
        .unlink_interest(&principal.0, interest_id)
        .await
        .map_err(|e| ApiError::failed("remove interest", e))?;
    Ok(Json(json!({"success": true})))
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refresher = state.refresher.clone();
    tokio::spawn(async move {
        refresher.refresh_all().await;
    });

    Json(json!({"refreshing": true}))
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refreshing = state.refresher.is_refreshing().await;
    Json(json!({"refreshing": refreshing}))
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
