use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::error::{FeedError, Result};

/// One article summary as reported by the upstream provider.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Headline {
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: HeadlineSource,
    pub author: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub url_to_image: Option<String>,
    pub published_at: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeadlineSource {
    pub id: Option<String>,
    pub name: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Items are kept as raw JSON so one malformed entry does not sink the page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    status: String,
    #[serde(default)]
    articles: Vec<serde_json::Value>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    code: Option<String>,
    message: Option<String>,
}

#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    async fn top_headlines(&self, category: &str, page: u32, page_size: u32)
        -> Result<Vec<Headline>>;
}

/// Client for the NewsAPI `top-headlines` endpoint.
pub struct NewsApiClient {
    client: Client,
    base_url: String,
    country: String,
    api_key: String,
}

impl NewsApiClient {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Newsdesk/1.0 (News Aggregator)")
            .build()?;

        if config.api_key.is_empty() {
            warn!("No upstream API key configured; set NEWS_API_KEY");
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            country: config.country.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl UpstreamProvider for NewsApiClient {
    async fn top_headlines(
        &self,
        category: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Headline>> {
        let url = format!("{}/v2/top-headlines", self.base_url);
        debug!(
            "Requesting top headlines: category={} page={} page_size={}",
            category, page, page_size
        );

        let page_size = page_size.to_string();
        let page = page.to_string();
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(&[
                ("country", self.country.as_str()),
                ("category", category),
                ("pageSize", page_size.as_str()),
                ("page", page.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Upstream(describe_failure(status.as_u16(), &body)));
        }

        let envelope: Envelope = response.json().await?;
        if envelope.status != "ok" {
            return Err(FeedError::Upstream(format!(
                "provider reported status '{}': {}",
                envelope.status,
                envelope.message.unwrap_or_default()
            )));
        }

        Ok(decode_headlines(envelope.articles))
    }
}

fn decode_headlines(items: Vec<serde_json::Value>) -> Vec<Headline> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<Headline>(item) {
            Ok(headline) => Some(headline),
            Err(e) => {
                warn!("Skipping undecodable upstream item #{}: {}", index, e);
                None
            }
        })
        .collect()
}

fn describe_failure(status: u16, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { code, message: Some(message) }) => match code {
            Some(code) => format!("HTTP {} ({}): {}", status, code, message),
            None => format!("HTTP {}: {}", status, message),
        },
        _ => format!("HTTP {}", status),
    }
}
