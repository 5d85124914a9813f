use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;

use super::{resolve_key, ProviderError, WeatherInfo, WeatherProvider, WeatherReport};
use crate::config::WeatherProviderConfig;

const TIMEOUT_MESSAGE: &str = "Weather API request timed out. Try again later.";

/// OpenWeatherMap current-weather client (metric units).
#[derive(Clone)]
pub struct OpenWeatherClient {
    http: Client,
    base_url: Url,
    icon_base_url: String,
    default_api_key: Option<String>,
}

impl std::fmt::Debug for OpenWeatherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenWeatherClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenWeatherClient {
    pub fn new(cfg: &WeatherProviderConfig) -> Result<Self, ProviderError> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| ProviderError::Decode(format!("invalid weather base_url: {e}")))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url,
            icon_base_url: cfg.icon_base_url.clone(),
            default_api_key: cfg.default_api_key.clone(),
        })
    }

    pub fn build_request(&self, city: &str, api_key: &str) -> Result<reqwest::Request, ProviderError> {
        let endpoint = self
            .base_url
            .join("data/2.5/weather")
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(self
            .http
            .get(endpoint)
            .query(&[("q", city.trim()), ("appid", api_key), ("units", "metric")])
            .build()?)
    }
}

fn cod_is_ok(body: &Value) -> bool {
    match body.get("cod") {
        Some(Value::Number(n)) => n.as_i64() == Some(200),
        Some(Value::String(s)) => s == "200",
        _ => false,
    }
}

/// Map an OpenWeatherMap payload into a report, or the provider's own error message.
pub fn parse_weather(body: &Value, icon_base_url: &str) -> Result<WeatherReport, ProviderError> {
    if !cod_is_ok(body) {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error from weather API");
        return Err(ProviderError::Api(message.to_string()));
    }

    let missing = |field: &str| ProviderError::Decode(format!("weather payload missing {field}"));
    let condition = body
        .get("weather")
        .and_then(|w| w.get(0))
        .ok_or_else(|| missing("weather[0]"))?;
    let main = body.get("main").ok_or_else(|| missing("main"))?;

    let status = condition
        .get("description")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("weather[0].description"))?;
    let icon = condition
        .get("icon")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("weather[0].icon"))?;
    let temp = main
        .get("temp")
        .and_then(Value::as_f64)
        .ok_or_else(|| missing("main.temp"))?;
    let feels_like = main
        .get("feels_like")
        .and_then(Value::as_f64)
        .ok_or_else(|| missing("main.feels_like"))?;
    let humidity = main
        .get("humidity")
        .and_then(Value::as_i64)
        .ok_or_else(|| missing("main.humidity"))?;

    Ok(WeatherReport {
        weather_info: WeatherInfo {
            status: status.to_string(),
            temp,
            feels_like,
            humidity,
        },
        weather_icon_url: format!("{}/{}@2x.png", icon_base_url.trim_end_matches('/'), icon),
    })
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn current_weather(
        &self,
        city: &str,
        api_key: Option<&str>,
    ) -> Result<WeatherReport, ProviderError> {
        let key = resolve_key(api_key, self.default_api_key.as_deref(), "weather")?;
        let request = self.build_request(city, key)?;
        let res = match self.http.execute(request).await {
            Ok(res) => res,
            Err(err) if err.is_timeout() => return Err(ProviderError::Timeout(TIMEOUT_MESSAGE)),
            Err(err) => return Err(err.into()),
        };
        let body: Value = match res.json().await {
            Ok(body) => body,
            Err(err) if err.is_timeout() => return Err(ProviderError::Timeout(TIMEOUT_MESSAGE)),
            Err(err) => return Err(ProviderError::Decode(err.to_string())),
        };
        parse_weather(&body, &self.icon_base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ICONS: &str = "http://openweathermap.org/img/wn/";

    #[test]
    fn parses_successful_payload() {
        let body = json!({
            "weather": [{"description": "light rain", "icon": "10d"}],
            "main": {"temp": 24.5, "feels_like": 25.1, "humidity": 83},
            "cod": 200
        });
        let report = parse_weather(&body, ICONS).unwrap();
        assert_eq!(report.weather_info.status, "light rain");
        assert_eq!(report.weather_info.humidity, 83);
        assert_eq!(
            report.weather_icon_url,
            "http://openweathermap.org/img/wn/10d@2x.png"
        );
    }

    #[test]
    fn provider_error_message_is_surfaced() {
        let body = json!({"cod": "404", "message": "city not found"});
        let err = parse_weather(&body, ICONS).unwrap_err();
        assert_eq!(err.to_string(), "city not found");
    }

    #[test]
    fn incomplete_payload_is_a_decode_error() {
        let body = json!({"cod": 200, "weather": [], "main": {}});
        let err = parse_weather(&body, ICONS).unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[test]
    fn request_uses_metric_units() {
        let cfg: crate::config::Config =
            serde_yaml::from_str(crate::config::example()).unwrap();
        let client = OpenWeatherClient::new(&cfg.providers.weather).unwrap();
        let req = client.build_request(" Mumbai ", "abc").unwrap();
        assert_eq!(req.url().path(), "/data/2.5/weather");
        let q: Vec<(String, String)> = req
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(q.contains(&("q".into(), "Mumbai".into())));
        assert!(q.contains(&("units".into(), "metric".into())));
    }
}
