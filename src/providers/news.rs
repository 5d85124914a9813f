use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::article::{self, is_substantial};
use super::{resolve_key, NewsArticle, NewsProvider, ProviderError};
use crate::config::NewsProviderConfig;

const SUMMARY_SENTENCES: usize = 3;

/// NewsAPI v2 client. Category topics use top headlines; anything else is a
/// keyword search over the last day.
#[derive(Clone)]
pub struct NewsApiClient {
    http: Client,
    base_url: Url,
    cfg: NewsProviderConfig,
}

impl std::fmt::Debug for NewsApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    status: String,
    message: Option<String>,
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiArticle {
    url: String,
    title: Option<String>,
    author: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
}

impl NewsApiClient {
    pub fn new(cfg: NewsProviderConfig) -> Result<Self, ProviderError> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| ProviderError::Decode(format!("invalid news base_url: {e}")))?;
        let http = Client::builder()
            .user_agent(concat!("infostream-digest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.article_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url,
            cfg,
        })
    }

    fn is_category(&self, topic: &str) -> bool {
        self.cfg
            .categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(topic.trim()))
    }

    /// Build the listing request for `topic` as of `today`.
    pub fn build_request(
        &self,
        topic: &str,
        api_key: &str,
        today: NaiveDate,
    ) -> Result<reqwest::Request, ProviderError> {
        let topic = topic.trim();
        let request = if self.is_category(topic) {
            let endpoint = self
                .base_url
                .join("v2/top-headlines")
                .map_err(|e| ProviderError::Decode(e.to_string()))?;
            self.http.get(endpoint).query(&[
                ("category", topic.to_lowercase().as_str()),
                ("language", self.cfg.language.as_str()),
            ])
        } else {
            let endpoint = self
                .base_url
                .join("v2/everything")
                .map_err(|e| ProviderError::Decode(e.to_string()))?;
            let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
            self.http.get(endpoint).query(&[
                ("q", topic),
                ("language", self.cfg.language.as_str()),
                ("sortBy", self.cfg.sort_by.as_str()),
                ("from", yesterday.to_string().as_str()),
                ("to", today.to_string().as_str()),
            ])
        };
        Ok(request.header("X-Api-Key", api_key).build()?)
    }

    async fn fetch_article(&self, listed: &NewsApiArticle) -> Result<Option<NewsArticle>, ProviderError> {
        let res = self.http.get(&listed.url).send().await?;
        if !res.status().is_success() {
            return Err(ProviderError::Api(format!(
                "article fetch returned {}",
                res.status()
            )));
        }
        let html = res.text().await?;
        Ok(build_article(listed, &html, self.cfg.min_article_words))
    }
}

fn build_article(listed: &NewsApiArticle, html: &str, min_words: usize) -> Option<NewsArticle> {
    let extracted = article::extract(html);
    let summary = listed
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| article::summarize(&extracted.text, SUMMARY_SENTENCES));
    if !is_substantial(&extracted.text, &summary, min_words) {
        return None;
    }
    let title = listed
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or(extracted.title)
        .unwrap_or_else(|| listed.url.clone());
    Some(NewsArticle {
        url: listed.url.clone(),
        title,
        author: listed.author.clone().filter(|a| !a.trim().is_empty()).or(extracted.author),
        publish_date: listed
            .published_at
            .as_deref()
            .map(|d| d.chars().take(10).collect())
            .or(extracted.publish_date),
        summary,
        text: extracted.text,
    })
}

#[async_trait]
impl NewsProvider for NewsApiClient {
    async fn top_news(
        &self,
        topic: &str,
        api_key: Option<&str>,
    ) -> Result<Vec<NewsArticle>, ProviderError> {
        let key = resolve_key(api_key, self.cfg.default_api_key.as_deref(), "news")?;
        let request = self.build_request(topic, key, Local::now().date_naive())?;
        let res = self.http.execute(request).await?;
        let body: NewsApiResponse = res
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        if body.status != "ok" {
            return Err(ProviderError::Api(
                body.message
                    .unwrap_or_else(|| "Unknown error from NewsAPI".to_string()),
            ));
        }
        info!(topic, listed = body.articles.len(), "news listing fetched");

        let mut articles = Vec::new();
        for listed in &body.articles {
            if articles.len() == self.cfg.max_articles {
                break;
            }
            match self.fetch_article(listed).await {
                Ok(Some(article)) => articles.push(article),
                Ok(None) => debug!(url = %listed.url, "article too short; skipped"),
                Err(err) => warn!(url = %listed.url, %err, "failed to fetch article; skipped"),
            }
        }
        Ok(articles)
    }
}
