use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DELIVERY_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]$").expect("valid delivery time regex"));

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Delivery times are stored and matched as zero-padded `HH:MM` strings.
pub fn is_valid_delivery_time(value: &str) -> bool {
    DELIVERY_TIME_RE.is_match(value)
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

/// `"world news"` -> `"World News"`.
pub fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn digest_subject(topic: &str) -> String {
    format!("Your {} News Digest", title_case(topic))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Success,
    PartialSuccess,
    Error,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Success => "success",
            BatchStatus::PartialSuccess => "partial_success",
            BatchStatus::Error => "error",
        }
    }
}

/// Which trigger produced a batch run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Scheduled,
    Immediate,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Immediate => "immediate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub user_email: String,
    pub news_topic: String,
    pub error: String,
}

/// Aggregated result of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub total_users: usize,
    pub emails_sent: usize,
    pub emails_failed: usize,
    pub errors: Vec<DeliveryFailure>,
}

impl BatchSummary {
    /// A run that never got past user selection.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: BatchStatus::Error,
            message: Some(message.into()),
            total_users: 0,
            emails_sent: 0,
            emails_failed: 0,
            errors: Vec::new(),
        }
    }
}
