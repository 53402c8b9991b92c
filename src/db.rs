use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

use crate::cache::ArticleStore;
use crate::error::{conflict_or_persistence, Result};

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    pub source_url: String,
    pub source_name: String,
    pub published_at: DateTime<Utc>,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// Fields of an article not yet stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    pub source_url: String,
    pub source_name: String,
    pub published_at: DateTime<Utc>,
    pub category: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Bookmark {
    pub id: i64,
    pub user_id: String,
    pub article_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkWithArticle {
    pub id: i64,
    pub user_id: String,
    pub article_id: i64,
    pub created_at: DateTime<Utc>,
    pub article: Article,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interest {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                summary TEXT,
                image_url TEXT,
                source_url TEXT NOT NULL UNIQUE,
                source_name TEXT NOT NULL,
                published_at TEXT NOT NULL,
                category TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_category_published
            ON articles(category, published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bookmarks (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                article_id INTEGER NOT NULL REFERENCES articles(id),
                created_at TEXT NOT NULL,
                UNIQUE(user_id, article_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interests (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_interests (
                user_id TEXT NOT NULL,
                interest_id INTEGER NOT NULL REFERENCES interests(id),
                PRIMARY KEY(user_id, interest_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_article(&self, article_id: i64) -> Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = ?")
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(article)
    }

    pub async fn count_articles(&self, category: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE category = ?")
            .bind(category)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    pub async fn get_bookmarks(&self, user_id: &str) -> Result<Vec<BookmarkWithArticle>> {
        let bookmarks = sqlx::query_as::<_, Bookmark>(
            r#"
            SELECT * FROM bookmarks
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut result = Vec::with_capacity(bookmarks.len());
        for bookmark in bookmarks {
            if let Some(article) = self.get_article(bookmark.article_id).await? {
                result.push(with_article(bookmark, article));
            }
        }
        Ok(result)
    }

    pub async fn find_bookmark(&self, user_id: &str, article_id: i64) -> Result<Option<Bookmark>> {
        let bookmark = sqlx::query_as::<_, Bookmark>(
            "SELECT * FROM bookmarks WHERE user_id = ? AND article_id = ?",
        )
        .bind(user_id)
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(bookmark)
    }

    /// Fails with `Conflict` when the article is already bookmarked by `user_id`.
    pub async fn add_bookmark(&self, user_id: &str, article: Article) -> Result<BookmarkWithArticle> {
        let bookmark = sqlx::query_as::<_, Bookmark>(
            r#"
            INSERT INTO bookmarks (user_id, article_id, created_at)
            VALUES (?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(article.id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_or_persistence(e, "article already bookmarked"))?;

        Ok(with_article(bookmark, article))
    }

    pub async fn delete_bookmark(&self, bookmark_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM bookmarks WHERE id = ?")
            .bind(bookmark_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_interests(&self, user_id: &str) -> Result<Vec<Interest>> {
        let interests = sqlx::query_as::<_, Interest>(
            r#"
            SELECT interests.* FROM interests
            JOIN user_interests ON user_interests.interest_id = interests.id
            WHERE user_interests.user_id = ?
            ORDER BY interests.name COLLATE NOCASE
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(interests)
    }

    /// Case-insensitive lookup, creating the interest on first use.
    pub async fn find_or_create_interest(&self, name: &str) -> Result<Interest> {
        sqlx::query(
            r#"
            INSERT INTO interests (name, created_at)
            VALUES (?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let interest = sqlx::query_as::<_, Interest>("SELECT * FROM interests WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(interest)
    }

    pub async fn link_interest(&self, user_id: &str, interest_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO user_interests (user_id, interest_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(interest_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn unlink_interest(&self, user_id: &str, interest_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM user_interests WHERE user_id = ? AND interest_id = ?")
            .bind(user_id)
            .bind(interest_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn with_article(bookmark: Bookmark, article: Article) -> BookmarkWithArticle {
    BookmarkWithArticle {
        id: bookmark.id,
        user_id: bookmark.user_id,
        article_id: bookmark.article_id,
        created_at: bookmark.created_at,
        article,
    }
}

#[async_trait]
impl ArticleStore for Database {
    async fn find_articles(&self, category: &str, limit: i64, offset: i64) -> Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            WHERE category = ?
            ORDER BY published_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(category)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    async fn find_article_by_source_url(&self, source_url: &str) -> Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE source_url = ?")
            .bind(source_url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(article)
    }

    async fn insert_article(&self, article: &NewArticle) -> Result<Article> {
        sqlx::query_as::<_, Article>(
            r#"
            INSERT INTO articles (
                title, content, summary, image_url, source_url,
                source_name, published_at, category, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&article.title)
        .bind(&article.content)
        .bind(&article.summary)
        .bind(&article.image_url)
        .bind(&article.source_url)
        .bind(&article.source_name)
        .bind(article.published_at)
        .bind(&article.category)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_or_persistence(e, &article.source_url))
    }
}
