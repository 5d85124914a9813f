//! The scheduled path never writes. The immediate path clears `is_immediate`
//! for delivered rows once, after every send of the run.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{self, Pool};
use crate::model::{
    digest_subject, BatchStatus, BatchSummary, DeliveryFailure, TriggerKind,
};
use crate::notifier::{self, NotifyError, Notifier};
use crate::providers::{NewsApiClient, OpenWeatherClient, YahooStockClient};
use crate::render::DigestRenderer;

pub mod generate;
pub mod selection;

pub use generate::{DigestError, DigestGenerator};
pub use selection::{group_rows, DigestTarget, TopicEntry};

pub const NO_USERS_MESSAGE: &str = "No users to notify";
pub const NO_IMMEDIATE_MESSAGE: &str = "User not found or not configured for immediate emails";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Generate(#[from] DigestError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// What a trigger source drives. Implemented by [`Orchestrator`].
#[async_trait]
pub trait BatchRunner: Send + Sync {
    async fn run_scheduled(&self, target_time: Option<&str>) -> BatchSummary;
    async fn run_immediate(&self) -> BatchSummary;
}

pub struct Orchestrator {
    pool: Pool,
    generator: DigestGenerator,
    notifier: Arc<dyn Notifier>,
    // One run per trigger kind at a time, whichever caller starts it.
    scheduled_lock: Mutex<()>,
    immediate_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(pool: Pool, generator: DigestGenerator, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            pool,
            generator,
            notifier,
            scheduled_lock: Mutex::new(()),
            immediate_lock: Mutex::new(()),
        }
    }

    /// Wire the real HTTP providers, template and configured mail backend.
    pub fn from_config(cfg: &Config, pool: Pool) -> anyhow::Result<Self> {
        let template_path = cfg.template_path();
        if !template_path.exists() {
            warn!(path = %template_path.display(), "digest template not found; every digest will fail until it exists");
        }
        let generator = DigestGenerator::new(
            Arc::new(NewsApiClient::new(cfg.providers.news.clone())?),
            Arc::new(OpenWeatherClient::new(&cfg.providers.weather)?),
            Arc::new(YahooStockClient::new(&cfg.providers.stock)?),
            DigestRenderer::new(template_path),
        );
        let notifier = notifier::from_config(&cfg.email)?;
        Ok(Self::new(pool, generator, notifier))
    }

    /// Generate and send one digest. Generation failures never reach the notifier.
    pub async fn send_to_user(
        &self,
        email: &str,
        topic: &str,
        city: &str,
        news_api_key: Option<&str>,
        weather_api_key: Option<&str>,
    ) -> Result<String, DeliveryError> {
        let html = self
            .generator
            .generate(topic, city, news_api_key, weather_api_key)
            .await?;
        let message = self
            .notifier
            .send_html(email, &digest_subject(topic), &html)
            .await?;
        Ok(message)
    }

    /// One pair; a failure comes back as its display text.
    async fn deliver(&self, target: &DigestTarget, topic: &TopicEntry) -> Result<(), String> {
        match self
            .send_to_user(
                &target.email,
                &topic.news_topic,
                &target.city,
                target.news_api_key.as_deref(),
                target.weather_api_key.as_deref(),
            )
            .await
        {
            Ok(_) => {
                info!(user_id = target.user_id, topic = %topic.news_topic, "digest delivered");
                Ok(())
            }
            Err(err) => {
                warn!(user_id = target.user_id, topic = %topic.news_topic, %err, "digest failed");
                Err(err.to_string())
            }
        }
    }

    /// Deliver every subscription due at `target_time`. No row state changes.
    pub async fn run_scheduled(&self, target_time: Option<&str>) -> BatchSummary {
        let _guard = self.scheduled_lock.lock().await;
        let span = info_span!(
            "digest_run",
            run_id = %Uuid::new_v4(),
            kind = TriggerKind::Scheduled.as_str(),
            target_time = target_time.unwrap_or("*"),
        );
        self.scheduled_inner(target_time).instrument(span).await
    }

    async fn scheduled_inner(&self, target_time: Option<&str>) -> BatchSummary {
        info!("starting scheduled digest run");
        let targets = match selection::users_to_notify(&self.pool, target_time).await {
            Ok(targets) => targets,
            Err(err) => {
                error!(?err, "failed to select users");
                return BatchSummary::error(format!("Database error while fetching users: {err}"));
            }
        };
        if targets.is_empty() {
            info!("no users to notify");
            return BatchSummary {
                status: BatchStatus::Success,
                message: Some(NO_USERS_MESSAGE.to_string()),
                total_users: 0,
                emails_sent: 0,
                emails_failed: 0,
                errors: Vec::new(),
            };
        }

        let mut sent = 0;
        let mut errors = Vec::new();
        for target in &targets {
            for topic in &target.topics {
                match self.deliver(target, topic).await {
                    Ok(()) => sent += 1,
                    Err(error) => errors.push(DeliveryFailure {
                        user_email: target.email.clone(),
                        news_topic: topic.news_topic.clone(),
                        error,
                    }),
                }
            }
        }

        let failed = errors.len();
        info!(sent, failed, total_users = targets.len(), "scheduled digest run complete");
        BatchSummary {
            status: if failed == 0 {
                BatchStatus::Success
            } else {
                BatchStatus::PartialSuccess
            },
            message: None,
            total_users: targets.len(),
            emails_sent: sent,
            emails_failed: failed,
            errors,
        }
    }

    /// Deliver every pending immediate request, then clear the flag on the
    /// delivered rows only.
    pub async fn run_immediate(&self) -> BatchSummary {
        let _guard = self.immediate_lock.lock().await;
        let span = info_span!(
            "digest_run",
            run_id = %Uuid::new_v4(),
            kind = TriggerKind::Immediate.as_str(),
        );
        self.immediate_inner().instrument(span).await
    }

    async fn immediate_inner(&self) -> BatchSummary {
        let targets = match selection::users_for_immediate(&self.pool).await {
            Ok(targets) => targets,
            Err(err) => {
                error!(?err, "failed to select immediate requests");
                return BatchSummary::error(format!("Error sending immediate emails: {err}"));
            }
        };
        if targets.is_empty() {
            return BatchSummary::error(NO_IMMEDIATE_MESSAGE);
        }
        info!(users = targets.len(), "starting immediate digest run");

        let mut delivered_ids = Vec::new();
        let mut errors = Vec::new();
        for target in &targets {
            for topic in &target.topics {
                match self.deliver(target, topic).await {
                    Ok(()) => delivered_ids.push(topic.schedule_id),
                    Err(error) => errors.push(DeliveryFailure {
                        user_email: target.email.clone(),
                        news_topic: topic.news_topic.clone(),
                        error,
                    }),
                }
            }
        }

        let sent = delivered_ids.len();
        let failed = errors.len();
        let mut message = format!(
            "Processed {} user(s): sent {sent} email(s), {failed} failed",
            targets.len()
        );
        let mut status = if failed == 0 {
            BatchStatus::Success
        } else if sent > 0 {
            BatchStatus::PartialSuccess
        } else {
            BatchStatus::Error
        };

        match db::clear_immediate_flags(&self.pool, &delivered_ids).await {
            Ok(0) => {}
            Ok(cleared) => info!(cleared, "reset immediate flags"),
            Err(err) => {
                error!(?err, ids = ?delivered_ids, "failed to reset immediate flags");
                status = BatchStatus::Error;
                message.push_str(&format!("; failed to reset immediate flags: {err}"));
            }
        }

        info!(sent, failed, status = status.as_str(), "immediate digest run complete");
        BatchSummary {
            status,
            message: Some(message),
            total_users: targets.len(),
            emails_sent: sent,
            emails_failed: failed,
            errors,
        }
    }
}

#[async_trait]
impl BatchRunner for Orchestrator {
    async fn run_scheduled(&self, target_time: Option<&str>) -> BatchSummary {
        Orchestrator::run_scheduled(self, target_time).await
    }

    async fn run_immediate(&self) -> BatchSummary {
        Orchestrator::run_immediate(self).await
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("generator", &self.generator)
            .finish_non_exhaustive()
    }
}
