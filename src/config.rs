//! Configuration loader and validator for the digest service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::model::is_valid_delivery_time;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub scheduler: Scheduler,
    pub providers: Providers,
    #[serde(default)]
    pub template: Template,
    pub email: Email,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Http {
    pub bind: String,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".into(),
        }
    }
}

/// Trigger source settings: daily slots plus the immediate polling interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scheduler {
    pub slots: Vec<String>,
    pub immediate_interval_secs: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            slots: ["11:00", "14:00", "17:00", "19:00", "21:00", "23:00"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            immediate_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Providers {
    pub news: NewsProviderConfig,
    pub weather: WeatherProviderConfig,
    #[serde(default)]
    pub stock: StockProviderConfig,
}

/// NewsAPI settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsProviderConfig {
    #[serde(default = "default_news_base_url")]
    pub base_url: String,
    #[serde(default = "default_news_language")]
    pub language: String,
    #[serde(default = "default_news_sort_by")]
    pub sort_by: String,
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
    #[serde(default = "default_min_article_words")]
    pub min_article_words: usize,
    #[serde(default = "default_news_categories")]
    pub categories: Vec<String>,
    #[serde(default)]
    pub default_api_key: Option<String>,
    #[serde(default = "default_article_timeout_secs")]
    pub article_timeout_secs: u64,
}

/// OpenWeatherMap settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeatherProviderConfig {
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,
    #[serde(default = "default_weather_icon_base_url")]
    pub icon_base_url: String,
    #[serde(default = "default_weather_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub default_api_key: Option<String>,
}

/// Market snapshot settings. `markets` keeps the order they appear in the digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockProviderConfig {
    pub base_url: String,
    pub range: String,
    pub markets: Vec<Market>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Market {
    pub name: String,
    pub symbol: String,
}

impl Default for StockProviderConfig {
    fn default() -> Self {
        let markets = [
            ("NIFTY 50", "^NSEI"),
            ("SENSEX", "^BSESN"),
            ("GOLD", "GC=F"),
            ("SILVER", "SI=F"),
            ("USD/INR", "USDINR=X"),
        ]
        .iter()
        .map(|(name, symbol)| Market {
            name: name.to_string(),
            symbol: symbol.to_string(),
        })
        .collect();
        Self {
            base_url: "https://query1.finance.yahoo.com/".into(),
            range: "5d".into(),
            markets,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Template {
    pub dir: String,
    pub name: String,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            dir: "templates".into(),
            name: "digest.hbs".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmailBackend {
    Smtp,
    Sendgrid,
}

/// Outgoing mail settings. Secrets may be left empty and supplied via env.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Email {
    pub backend: EmailBackend,
    pub from: String,
    #[serde(default)]
    pub smtp: Option<Smtp>,
    #[serde(default)]
    pub sendgrid: Option<SendGrid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Smtp {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendGrid {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_sendgrid_base_url")]
    pub base_url: String,
}

fn default_news_base_url() -> String {
    "https://newsapi.org/".into()
}
fn default_news_language() -> String {
    "en".into()
}
fn default_news_sort_by() -> String {
    "relevancy".into()
}
fn default_max_articles() -> usize {
    10
}
fn default_min_article_words() -> usize {
    50
}
fn default_news_categories() -> Vec<String> {
    [
        "general",
        "business",
        "entertainment",
        "health",
        "science",
        "sports",
        "technology",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_article_timeout_secs() -> u64 {
    15
}
fn default_weather_base_url() -> String {
    "https://api.openweathermap.org/".into()
}
fn default_weather_icon_base_url() -> String {
    "http://openweathermap.org/img/wn/".into()
}
fn default_weather_timeout_secs() -> u64 {
    5
}
fn default_sendgrid_base_url() -> String {
    "https://api.sendgrid.com/".into()
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Database URL: `DATABASE_URL` wins, then `app.database_url`, then a file in `data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.app.database_url.clone())
            .unwrap_or_else(|| format!("sqlite://{}/infostream.db", self.app.data_dir))
    }

    /// Full path of the digest template.
    pub fn template_path(&self) -> std::path::PathBuf {
        Path::new(&self.template.dir).join(&self.template.name)
    }

    /// Apply secret overrides. `lookup` is usually `std::env::var(..).ok()`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(from) = lookup("FROM_EMAIL").filter(|s| !s.trim().is_empty()) {
            self.email.from = from;
        }
        if let Some(key) = lookup("SENDGRID_API_KEY").filter(|s| !s.trim().is_empty()) {
            self.email
                .sendgrid
                .get_or_insert_with(|| SendGrid {
                    api_key: None,
                    base_url: default_sendgrid_base_url(),
                })
                .api_key = Some(key);
        }
        if let Some(password) = lookup("SMTP_PASSWORD").filter(|s| !s.trim().is_empty()) {
            if let Some(smtp) = self.email.smtp.as_mut() {
                smtp.password = Some(password);
            }
        }
    }
}

/// Load configuration from a YAML file, apply env overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_overrides(|name| std::env::var(name).ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.http.bind.trim().is_empty() {
        return Err(ConfigError::Invalid("http.bind must be non-empty"));
    }

    if cfg.scheduler.slots.is_empty() {
        return Err(ConfigError::Invalid("scheduler.slots must list at least one HH:MM time"));
    }
    if !cfg.scheduler.slots.iter().all(|s| is_valid_delivery_time(s)) {
        return Err(ConfigError::Invalid("scheduler.slots entries must be HH:MM"));
    }
    if cfg.scheduler.immediate_interval_secs == 0 {
        return Err(ConfigError::Invalid("scheduler.immediate_interval_secs must be > 0"));
    }

    let news = &cfg.providers.news;
    if news.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("providers.news.base_url must be non-empty"));
    }
    if news.max_articles == 0 {
        return Err(ConfigError::Invalid("providers.news.max_articles must be > 0"));
    }
    if cfg.providers.weather.timeout_secs == 0 {
        return Err(ConfigError::Invalid("providers.weather.timeout_secs must be > 0"));
    }
    if cfg.providers.stock.markets.is_empty() {
        return Err(ConfigError::Invalid("providers.stock.markets must be non-empty"));
    }
    if cfg.providers.stock.range.trim().is_empty() {
        return Err(ConfigError::Invalid("providers.stock.range must be non-empty"));
    }

    if cfg.template.dir.trim().is_empty() || cfg.template.name.trim().is_empty() {
        return Err(ConfigError::Invalid("template.dir and template.name must be non-empty"));
    }

    if cfg.email.from.trim().is_empty() {
        return Err(ConfigError::Invalid("email.from must be non-empty"));
    }
    match cfg.email.backend {
        EmailBackend::Smtp => match &cfg.email.smtp {
            Some(smtp) if !smtp.host.trim().is_empty() => {}
            _ => return Err(ConfigError::Invalid("email.smtp.host is required for the smtp backend")),
        },
        EmailBackend::Sendgrid => {
            if cfg.email.sendgrid.is_none() {
                return Err(ConfigError::Invalid(
                    "email.sendgrid section is required for the sendgrid backend",
                ));
            }
        }
    }

    Ok(())
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

http:
  bind: "0.0.0.0:8000"

scheduler:
  slots: ["11:00", "14:00", "17:00", "19:00", "21:00", "23:00"]
  immediate_interval_secs: 60

providers:
  news:
    base_url: "https://newsapi.org/"
    language: "en"
    sort_by: "relevancy"
    max_articles: 10
    min_article_words: 50
  weather:
    base_url: "https://api.openweathermap.org/"
    timeout_secs: 5
  stock:
    base_url: "https://query1.finance.yahoo.com/"
    range: "5d"
    markets:
      - { name: "NIFTY 50", symbol: "^NSEI" }
      - { name: "SENSEX", symbol: "^BSESN" }
      - { name: "GOLD", symbol: "GC=F" }
      - { name: "SILVER", symbol: "SI=F" }
      - { name: "USD/INR", symbol: "USDINR=X" }

template:
  dir: "templates"
  name: "digest.hbs"

email:
  backend: sendgrid
  from: "noreply@example.com"
  sendgrid:
    api_key: ""
"#
}
