use handlebars::{Handlebars, RenderErrorReason};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

use crate::providers::{MarketQuote, NewsArticle, WeatherInfo, WeatherReport};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template file not found: {0}")]
    TemplateNotFound(String),
    #[error("Missing required data field: {0}")]
    MissingField(String),
    #[error("Error generating HTML: {0}")]
    Template(String),
}

#[derive(Debug, Serialize)]
struct DigestContext<'a> {
    data: &'a [NewsArticle],
    weather_info: &'a WeatherInfo,
    weather_icon_url: &'a str,
    stock_info: &'a [MarketQuote],
}

/// Renders the digest template in strict mode. The template is read on every
/// call so a missing or edited file is picked up without a restart.
pub struct DigestRenderer {
    template_path: PathBuf,
    handlebars: Handlebars<'static>,
}

impl DigestRenderer {
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        Self {
            template_path: template_path.into(),
            handlebars,
        }
    }

    pub async fn render(
        &self,
        articles: &[NewsArticle],
        weather: &WeatherReport,
        stocks: &[MarketQuote],
    ) -> Result<String, RenderError> {
        let source = tokio::fs::read_to_string(&self.template_path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    RenderError::TemplateNotFound(self.template_path.display().to_string())
                }
                _ => RenderError::Template(format!("{}: {e}", self.template_path.display())),
            })?;

        let ctx = DigestContext {
            data: articles,
            weather_info: &weather.weather_info,
            weather_icon_url: &weather.weather_icon_url,
            stock_info: stocks,
        };

        self.handlebars
            .render_template(&source, &ctx)
            .map_err(|err| match err.reason() {
                RenderErrorReason::MissingVariable(Some(name)) => {
                    RenderError::MissingField(name.clone())
                }
                RenderErrorReason::MissingVariable(None) => {
                    RenderError::MissingField(err.to_string())
                }
                _ => RenderError::Template(err.to_string()),
            })
    }
}

impl std::fmt::Debug for DigestRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestRenderer")
            .field("template_path", &self.template_path)
            .finish()
    }
}
