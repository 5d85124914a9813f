//! News, weather and market providers behind traits; `*Client` types hit the real APIs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod article;
pub mod news;
pub mod stock;
pub mod weather;

pub use news::NewsApiClient;
pub use stock::YahooStockClient;
pub use weather::OpenWeatherClient;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{0}")]
    Api(String),
    #[error("{0}")]
    Timeout(&'static str),
    #[error("no API key configured for {0}")]
    MissingKey(&'static str),
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("{0}")]
    Unavailable(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsArticle {
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub publish_date: Option<String>,
    pub summary: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherInfo {
    pub status: String,
    pub temp: f64,
    pub feels_like: f64,
    pub humidity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherReport {
    pub weather_info: WeatherInfo,
    pub weather_icon_url: String,
}

/// One market in the snapshot; figures are pre-formatted to two decimals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketQuote {
    pub name: String,
    pub latest_close: String,
    pub absolute_change: String,
    pub percent_change: String,
}

#[async_trait]
pub trait NewsProvider: Send + Sync {
    /// Top articles for `topic`. An empty list is a valid answer.
    async fn top_news(&self, topic: &str, api_key: Option<&str>)
        -> Result<Vec<NewsArticle>, ProviderError>;
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current_weather(
        &self,
        city: &str,
        api_key: Option<&str>,
    ) -> Result<WeatherReport, ProviderError>;
}

#[async_trait]
pub trait StockProvider: Send + Sync {
    async fn snapshot(&self) -> Result<Vec<MarketQuote>, ProviderError>;
}

/// Prefer the user's own key, fall back to the deployment-wide one.
pub(crate) fn resolve_key<'a>(
    user_key: Option<&'a str>,
    fallback: Option<&'a str>,
    provider: &'static str,
) -> Result<&'a str, ProviderError> {
    user_key
        .filter(|k| !k.trim().is_empty())
        .or_else(|| fallback.filter(|k| !k.trim().is_empty()))
        .ok_or(ProviderError::MissingKey(provider))
}
