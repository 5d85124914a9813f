use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::{Client, Url};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::{Email, EmailBackend};

const SENT: &str = "Email sent successfully";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("{0} not configured")]
    NotConfigured(&'static str),
    #[error("Invalid email address {0}")]
    InvalidAddress(String),
    #[error("Failed to build email: {0}")]
    Message(String),
    #[error("Failed to send email: {0}")]
    Transport(String),
    #[error("Failed to send email: provider returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Sends one rendered HTML document to one recipient.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<String, NotifyError>;
}

/// Build the notifier selected by `email.backend`. Missing secrets are not an
/// error here; they surface per send as `NotConfigured`.
pub fn from_config(cfg: &Email) -> Result<Arc<dyn Notifier>, NotifyError> {
    match cfg.backend {
        EmailBackend::Sendgrid => {
            let sg = cfg
                .sendgrid
                .as_ref()
                .ok_or(NotifyError::NotConfigured("email.sendgrid"))?;
            Ok(Arc::new(SendGridNotifier::new(
                &sg.base_url,
                sg.api_key.clone(),
                &cfg.from,
            )?))
        }
        EmailBackend::Smtp => {
            let smtp = cfg
                .smtp
                .as_ref()
                .ok_or(NotifyError::NotConfigured("email.smtp"))?;
            Ok(Arc::new(SmtpNotifier {
                host: smtp.host.clone(),
                port: smtp.port,
                username: smtp.username.clone(),
                password: smtp.password.clone(),
                from: cfg.from.clone(),
            }))
        }
    }
}

/// SMTP relay with STARTTLS and login credentials.
pub struct SmtpNotifier {
    host: String,
    port: u16,
    username: String,
    password: Option<String>,
    from: String,
}

impl SmtpNotifier {
    fn build_message(&self, to: &str, subject: &str, html: &str) -> Result<Message, NotifyError> {
        let from: Mailbox = self
            .from
            .parse()
            .map_err(|_| NotifyError::InvalidAddress(self.from.clone()))?;
        let to_box: Mailbox = to
            .parse()
            .map_err(|_| NotifyError::InvalidAddress(to.to_string()))?;
        Message::builder()
            .from(from)
            .to(to_box)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| NotifyError::Message(e.to_string()))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<String, NotifyError> {
        let password = self
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(NotifyError::NotConfigured("SMTP_PASSWORD"))?;
        let email = self.build_message(to, subject, html)?;

        let creds = Credentials::new(self.username.clone(), password.to_string());
        let mailer: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
                .map_err(|e| NotifyError::Transport(e.to_string()))?
                .port(self.port)
                .credentials(creds)
                .build();

        mailer
            .send(email)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        info!(to, subject, "email sent via smtp");
        Ok(SENT.to_string())
    }
}

/// SendGrid v3 mail-send API.
pub struct SendGridNotifier {
    http: Client,
    endpoint: Url,
    api_key: Option<String>,
    from: String,
}

impl SendGridNotifier {
    pub fn new(base_url: &str, api_key: Option<String>, from: &str) -> Result<Self, NotifyError> {
        let endpoint = Url::parse(base_url)
            .and_then(|u| u.join("v3/mail/send"))
            .map_err(|e| NotifyError::Transport(format!("invalid sendgrid base_url: {e}")))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            api_key,
            from: from.to_string(),
        })
    }

    pub fn build_request(
        &self,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<reqwest::Request, NotifyError> {
        let key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(NotifyError::NotConfigured("SENDGRID_API_KEY"))?;
        let body = json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": self.from },
            "subject": subject,
            "content": [{ "type": "text/html", "value": html }],
        });
        self.http
            .post(self.endpoint.clone())
            .bearer_auth(key)
            .json(&body)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Notifier for SendGridNotifier {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<String, NotifyError> {
        let request = self.build_request(to, subject, html)?;
        let res = self
            .http
            .execute(request)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        info!(to, status = status.as_u16(), "email sent via sendgrid");
        Ok(SENT.to_string())
    }
}
