//! Row types returned by `repo`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub full_name: Option<String>,
    pub email: String,
}

/// One-to-one with a user. Its absence means the user is not configured yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSetting {
    pub id: i64,
    pub user_id: i64,
    pub country: String,
    pub city: String,
    pub news_api_key: Option<String>,
    pub weather_api_key: Option<String>,
}

/// Partial settings; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub country: Option<String>,
    pub city: Option<String>,
    #[serde(rename = "newsApi", alias = "news_api_key")]
    pub news_api_key: Option<String>,
    #[serde(rename = "weatherApi", alias = "weather_api_key")]
    pub weather_api_key: Option<String>,
}

/// One subscription row: a topic delivered at `delivery_time`, plus the
/// one-shot `is_immediate` request flag.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TopicSchedule {
    pub id: i64,
    pub user_id: i64,
    pub news_topic: String,
    pub is_custom_topic: bool,
    pub delivery_time: String,
    pub is_immediate: bool,
    pub is_scheduled: bool,
}

#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub news_topic: String,
    pub is_custom_topic: bool,
    pub delivery_time: String,
    pub is_immediate: bool,
    pub is_scheduled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePatch {
    pub news_topic: Option<String>,
    pub is_custom_topic: Option<bool>,
    pub delivery_time: Option<String>,
    pub is_immediate: Option<bool>,
    pub is_scheduled: Option<bool>,
}

/// Row-level join of user × settings × schedule, as returned by the due-set
/// queries. One row per (user, topic) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueRow {
    pub user_id: i64,
    pub email: String,
    pub city: String,
    pub news_api_key: Option<String>,
    pub weather_api_key: Option<String>,
    pub schedule_id: i64,
    pub news_topic: String,
}
