use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;

use super::{MarketQuote, ProviderError, StockProvider};
use crate::config::{Market, StockProviderConfig};

const UNAVAILABLE: &str = "Stock data not available, Try again later.";

/// Daily closes for a fixed basket of markets from the Yahoo chart API.
#[derive(Debug, Clone)]
pub struct YahooStockClient {
    http: Client,
    base_url: Url,
    range: String,
    markets: Vec<Market>,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Latest close, absolute change and percent change from the last two
/// non-null closes. `None` when fewer than two closes exist.
pub fn compute_change(closes: &[Option<f64>]) -> Option<(f64, f64, f64)> {
    let mut valid = closes.iter().rev().filter_map(|c| *c);
    let latest = valid.next()?;
    let previous = valid.next()?;
    if previous == 0.0 {
        return None;
    }
    let absolute = latest - previous;
    Some((latest, absolute, absolute / previous * 100.0))
}

fn quote_for(name: &str, closes: &[Option<f64>]) -> Option<MarketQuote> {
    let (latest, absolute, percent) = compute_change(closes)?;
    Some(MarketQuote {
        name: name.to_string(),
        latest_close: format!("{latest:.2}"),
        absolute_change: format!("{absolute:.2}"),
        percent_change: format!("{percent:.2}"),
    })
}

impl YahooStockClient {
    pub fn new(cfg: &StockProviderConfig) -> Result<Self, ProviderError> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| ProviderError::Decode(format!("invalid stock base_url: {e}")))?;
        let http = Client::builder()
            .user_agent(concat!("infostream-digest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url,
            range: cfg.range.clone(),
            markets: cfg.markets.clone(),
        })
    }

    pub fn build_request(&self, symbol: &str) -> Result<reqwest::Request, ProviderError> {
        let mut endpoint = self
            .base_url
            .join("v8/finance/chart/")
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        endpoint
            .path_segments_mut()
            .map_err(|_| ProviderError::Decode("stock base_url cannot be a base".into()))?
            .pop_if_empty()
            .push(symbol);
        Ok(self
            .http
            .get(endpoint)
            .query(&[("range", self.range.as_str()), ("interval", "1d")])
            .build()?)
    }

    async fn closes(&self, symbol: &str) -> Result<Vec<Option<f64>>, ProviderError> {
        let request = self.build_request(symbol)?;
        let res = self.http.execute(request).await?;
        if !res.status().is_success() {
            return Ok(Vec::new());
        }
        let body: ChartResponse = res
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(body
            .chart
            .result
            .and_then(|mut r| (!r.is_empty()).then(|| r.swap_remove(0)))
            .and_then(|r| r.indicators.quote.into_iter().next())
            .map(|q| q.close)
            .unwrap_or_default())
    }
}

#[async_trait]
impl StockProvider for YahooStockClient {
    async fn snapshot(&self) -> Result<Vec<MarketQuote>, ProviderError> {
        let series = try_join_all(self.markets.iter().map(|m| self.closes(&m.symbol))).await?;
        self.markets
            .iter()
            .zip(series)
            .map(|(market, closes)| {
                quote_for(&market.name, &closes).ok_or(ProviderError::Unavailable(UNAVAILABLE))
            })
            .collect()
    }
}
