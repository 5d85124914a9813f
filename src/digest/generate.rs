use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::providers::{NewsProvider, ProviderError, StockProvider, WeatherProvider};
use crate::render::{DigestRenderer, RenderError};

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("News API error: {0}")]
    News(#[source] ProviderError),
    #[error("No news articles available")]
    NoArticles,
    #[error("Weather API error: {0}")]
    Weather(#[source] ProviderError),
    #[error("Stock API error: {0}")]
    Stock(#[source] ProviderError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

pub struct DigestGenerator {
    news: Arc<dyn NewsProvider>,
    weather: Arc<dyn WeatherProvider>,
    stock: Arc<dyn StockProvider>,
    renderer: DigestRenderer,
}

impl DigestGenerator {
    pub fn new(
        news: Arc<dyn NewsProvider>,
        weather: Arc<dyn WeatherProvider>,
        stock: Arc<dyn StockProvider>,
        renderer: DigestRenderer,
    ) -> Self {
        Self {
            news,
            weather,
            stock,
            renderer,
        }
    }

    /// News, then weather, then markets, then render. The first failure wins
    /// and nothing partial is returned.
    pub async fn generate(
        &self,
        topic: &str,
        city: &str,
        news_api_key: Option<&str>,
        weather_api_key: Option<&str>,
    ) -> Result<String, DigestError> {
        debug!(topic, "fetching news");
        let articles = self
            .news
            .top_news(topic, news_api_key)
            .await
            .map_err(DigestError::News)?;
        if articles.is_empty() {
            warn!(topic, "no news articles found");
            return Err(DigestError::NoArticles);
        }

        debug!(city, "fetching weather");
        let weather = self
            .weather
            .current_weather(city, weather_api_key)
            .await
            .map_err(DigestError::Weather)?;

        let stocks = self.stock.snapshot().await.map_err(DigestError::Stock)?;

        Ok(self.renderer.render(&articles, &weather, &stocks).await?)
    }
}

impl std::fmt::Debug for DigestGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestGenerator")
            .field("renderer", &self.renderer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MarketQuote, NewsArticle, WeatherInfo, WeatherReport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FixedNews(Result<Vec<NewsArticle>, &'static str>);

    #[async_trait]
    impl NewsProvider for FixedNews {
        async fn top_news(
            &self,
            _topic: &str,
            _key: Option<&str>,
        ) -> Result<Vec<NewsArticle>, ProviderError> {
            self.0.clone().map_err(|m| ProviderError::Api(m.into()))
        }
    }

    #[derive(Default)]
    struct CountingWeather {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl WeatherProvider for CountingWeather {
        async fn current_weather(
            &self,
            _city: &str,
            _key: Option<&str>,
        ) -> Result<WeatherReport, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Api("city not found".into()));
            }
            Ok(WeatherReport {
                weather_info: WeatherInfo {
                    status: "haze".into(),
                    temp: 30.0,
                    feels_like: 33.0,
                    humidity: 60,
                },
                weather_icon_url: "http://icons.example/50d@2x.png".into(),
            })
        }
    }

    struct FixedStock(bool);

    #[async_trait]
    impl StockProvider for FixedStock {
        async fn snapshot(&self) -> Result<Vec<MarketQuote>, ProviderError> {
            if !self.0 {
                return Err(ProviderError::Unavailable(
                    "Stock data not available, Try again later.",
                ));
            }
            Ok(vec![MarketQuote {
                name: "SENSEX".into(),
                latest_close: "81000.00".into(),
                absolute_change: "120.00".into(),
                percent_change: "0.15".into(),
            }])
        }
    }

    fn article() -> NewsArticle {
        NewsArticle {
            url: "https://news.example/a".into(),
            title: "Headline".into(),
            author: Some("Reporter".into()),
            publish_date: None,
            summary: "Summary.".into(),
            text: "Body text.".into(),
        }
    }

    fn template() -> (TempDir, DigestRenderer) {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("digest.hbs");
        std::fs::write(
            &path,
            "{{#each data}}{{title}};{{/each}}{{weather_info.status}};{{#each stock_info}}{{name}}{{/each}}",
        )
        .unwrap();
        (td, DigestRenderer::new(path))
    }

    #[tokio::test]
    async fn renders_when_all_sources_succeed() {
        let (_td, renderer) = template();
        let gen = DigestGenerator::new(
            Arc::new(FixedNews(Ok(vec![article()]))),
            Arc::new(CountingWeather::default()),
            Arc::new(FixedStock(true)),
            renderer,
        );
        let html = gen.generate("sports", "Pune", Some("k"), None).await.unwrap();
        assert_eq!(html, "Headline;haze;SENSEX");
    }

    #[tokio::test]
    async fn news_failure_short_circuits() {
        let (_td, renderer) = template();
        let weather = Arc::new(CountingWeather::default());
        let gen = DigestGenerator::new(
            Arc::new(FixedNews(Err("Your API key is invalid."))),
            weather.clone(),
            Arc::new(FixedStock(true)),
            renderer,
        );
        let err = gen.generate("sports", "Pune", None, None).await.unwrap_err();
        assert_eq!(err.to_string(), "News API error: Your API key is invalid.");
        assert_eq!(weather.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_news_is_its_own_error() {
        let (_td, renderer) = template();
        let gen = DigestGenerator::new(
            Arc::new(FixedNews(Ok(Vec::new()))),
            Arc::new(CountingWeather::default()),
            Arc::new(FixedStock(true)),
            renderer,
        );
        let err = gen.generate("sports", "Pune", None, None).await.unwrap_err();
        assert_eq!(err.to_string(), "No news articles available");
    }

    #[tokio::test]
    async fn weather_and_stock_errors_are_prefixed() {
        let (_td, renderer) = template();
        let gen = DigestGenerator::new(
            Arc::new(FixedNews(Ok(vec![article()]))),
            Arc::new(CountingWeather {
                calls: AtomicUsize::new(0),
                fail: true,
            }),
            Arc::new(FixedStock(true)),
            renderer,
        );
        let err = gen.generate("sports", "Atlantis", None, None).await.unwrap_err();
        assert_eq!(err.to_string(), "Weather API error: city not found");

        let (_td, renderer) = template();
        let gen = DigestGenerator::new(
            Arc::new(FixedNews(Ok(vec![article()]))),
            Arc::new(CountingWeather::default()),
            Arc::new(FixedStock(false)),
            renderer,
        );
        let err = gen.generate("sports", "Pune", None, None).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Stock API error: Stock data not available, Try again later."
        );
    }

    #[tokio::test]
    async fn missing_template_is_distinct_from_provider_errors() {
        let td = tempfile::tempdir().unwrap();
        let gen = DigestGenerator::new(
            Arc::new(FixedNews(Ok(vec![article()]))),
            Arc::new(CountingWeather::default()),
            Arc::new(FixedStock(true)),
            DigestRenderer::new(td.path().join("missing.hbs")),
        );
        let err = gen.generate("sports", "Pune", None, None).await.unwrap_err();
        assert!(matches!(err, DigestError::Render(RenderError::TemplateNotFound(_))));
    }
}
