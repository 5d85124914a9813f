use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::db::{
    self, NewSchedule, NewUser, Pool, SchedulePatch, SettingsPatch, TopicSchedule, User,
    UserSetting,
};
use crate::digest::BatchRunner;
use crate::model::{is_valid_delivery_time, is_valid_email, BatchSummary};
use crate::scheduler::Scheduler;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(err) => {
                error!(?err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub scheduler: Arc<Scheduler>,
    pub runner: Arc<dyn BatchRunner>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/users", post(create_user))
        .route("/users/{id}", get(get_user))
        .route(
            "/settings/{user_id}",
            post(create_settings)
                .get(get_settings)
                .put(update_settings)
                .delete(delete_settings),
        )
        .route(
            "/news-preferences/{id}",
            post(create_preference)
                .get(list_preferences)
                .put(update_preference)
                .delete(delete_preference),
        )
        .route("/digest/run", post(run_digest))
        .route("/digest/immediate", post(run_immediate))
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "InfoStream Digest API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "users": {
                "create": "POST /users",
                "get": "GET /users/{id}"
            },
            "user_settings": {
                "create": "POST /settings/{user_id}",
                "get": "GET /settings/{user_id}",
                "update": "PUT /settings/{user_id}",
                "delete": "DELETE /settings/{user_id}"
            },
            "news_preferences": {
                "create": "POST /news-preferences/{user_id}",
                "get": "GET /news-preferences/{user_id}",
                "update": "PUT /news-preferences/{preference_id}",
                "delete": "DELETE /news-preferences/{preference_id}"
            },
            "digest": {
                "run": "POST /digest/run?time=HH:MM",
                "immediate": "POST /digest/immediate"
            }
        }
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "scheduler_running": state.scheduler.is_running(),
    }))
}

// ---- users ----

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    #[serde(alias = "firstName")]
    first_name: String,
    #[serde(alias = "lastName")]
    last_name: String,
    #[serde(default, alias = "fullName")]
    full_name: Option<String>,
    email: String,
}

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let email = req.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::BadRequest("A valid email is required".into()));
    }
    if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
        return Err(ApiError::BadRequest("First and last name are required".into()));
    }
    if db::find_user_by_email(&state.pool, &email).await?.is_some() {
        return Err(ApiError::BadRequest("Email already registered".into()));
    }
    let user = db::create_user(
        &state.pool,
        &NewUser {
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            full_name: req.full_name,
            email,
        },
    )
    .await?;
    info!(user_id = user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<User>> {
    db::get_user(&state.pool, id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("User not found"))
}

// ---- settings ----

/// Settings as returned over HTTP; provider keys are never echoed back.
#[derive(Debug, Serialize)]
struct SettingsView {
    id: i64,
    user_id: i64,
    country: String,
    city: String,
    has_news_api_key: bool,
    has_weather_api_key: bool,
}

impl From<UserSetting> for SettingsView {
    fn from(s: UserSetting) -> Self {
        Self {
            id: s.id,
            user_id: s.user_id,
            country: s.country,
            city: s.city,
            has_news_api_key: s.news_api_key.is_some_and(|k| !k.is_empty()),
            has_weather_api_key: s.weather_api_key.is_some_and(|k| !k.is_empty()),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

async fn create_settings(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<SettingsPatch>,
) -> ApiResult<(StatusCode, Json<SettingsView>)> {
    if db::get_user(&state.pool, user_id).await?.is_none() {
        return Err(ApiError::NotFound("User not found"));
    }
    if db::get_settings(&state.pool, user_id).await?.is_some() {
        return Err(ApiError::BadRequest(format!(
            "Settings already exist. Use PUT /settings/{user_id} to update."
        )));
    }
    let (Some(country), Some(city)) = (non_blank(req.country.as_deref()), non_blank(req.city.as_deref()))
    else {
        return Err(ApiError::BadRequest("Country and city are required".into()));
    };
    let settings = db::create_settings(
        &state.pool,
        user_id,
        country,
        city,
        non_blank(req.news_api_key.as_deref()),
        non_blank(req.weather_api_key.as_deref()),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(settings.into())))
}

async fn get_settings(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<SettingsView>> {
    db::get_settings(&state.pool, user_id)
        .await?
        .map(|s| Json(s.into()))
        .ok_or(ApiError::NotFound("Settings not found"))
}

async fn update_settings(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(patch): Json<SettingsPatch>,
) -> ApiResult<Json<SettingsView>> {
    let patch = SettingsPatch {
        country: non_blank(patch.country.as_deref()).map(str::to_string),
        city: non_blank(patch.city.as_deref()).map(str::to_string),
        news_api_key: non_blank(patch.news_api_key.as_deref()).map(str::to_string),
        weather_api_key: non_blank(patch.weather_api_key.as_deref()).map(str::to_string),
    };
    db::update_settings(&state.pool, user_id, &patch)
        .await?
        .map(|s| Json(s.into()))
        .ok_or(ApiError::NotFound("Settings not found"))
}

async fn delete_settings(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    if !db::delete_settings(&state.pool, user_id).await? {
        return Err(ApiError::NotFound("Settings not found"));
    }
    Ok(Json(json!({ "message": "Settings deleted successfully", "user_id": user_id })))
}

// ---- news preferences ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePreferenceRequest {
    news_topic: Option<String>,
    #[serde(default)]
    is_custom_topic: bool,
    delivery_time: Option<String>,
    #[serde(default)]
    is_immediate: bool,
    #[serde(default = "default_true")]
    is_scheduled: bool,
}

fn default_true() -> bool {
    true
}

async fn create_preference(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<CreatePreferenceRequest>,
) -> ApiResult<(StatusCode, Json<TopicSchedule>)> {
    if db::get_user(&state.pool, user_id).await?.is_none() {
        return Err(ApiError::NotFound("User not found"));
    }
    let topic = non_blank(req.news_topic.as_deref())
        .ok_or_else(|| ApiError::BadRequest("News topic is required".into()))?;
    let time = non_blank(req.delivery_time.as_deref())
        .ok_or_else(|| ApiError::BadRequest("Delivery time is required".into()))?;
    if !is_valid_delivery_time(time) {
        return Err(ApiError::BadRequest("Delivery time must be HH:MM".into()));
    }
    let schedule = db::create_schedule(
        &state.pool,
        user_id,
        &NewSchedule {
            news_topic: topic.to_string(),
            is_custom_topic: req.is_custom_topic,
            delivery_time: time.to_string(),
            is_immediate: req.is_immediate,
            is_scheduled: req.is_scheduled,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

async fn list_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let preferences = db::list_schedules(&state.pool, user_id).await?;
    Ok(Json(json!({ "user_id": user_id, "preferences": preferences })))
}

async fn update_preference(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<SchedulePatch>,
) -> ApiResult<Json<TopicSchedule>> {
    if let Some(time) = patch.delivery_time.as_deref() {
        if !is_valid_delivery_time(time) {
            return Err(ApiError::BadRequest("Delivery time must be HH:MM".into()));
        }
    }
    if patch.news_topic.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::BadRequest("News topic cannot be empty".into()));
    }
    db::update_schedule(&state.pool, id, &patch)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Preference not found"))
}

async fn delete_preference(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let deleted = db::delete_schedule(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("Preference not found"))?;
    Ok(Json(json!({
        "message": "Preference deleted successfully",
        "deleted_preference": deleted,
    })))
}

// ---- manual triggers ----

#[derive(Debug, Deserialize)]
struct RunQuery {
    time: Option<String>,
}

async fn run_digest(
    State(state): State<AppState>,
    Query(q): Query<RunQuery>,
) -> ApiResult<Json<BatchSummary>> {
    let time = non_blank(q.time.as_deref());
    if let Some(t) = time {
        if !is_valid_delivery_time(t) {
            return Err(ApiError::BadRequest("time must be HH:MM".into()));
        }
    }
    Ok(Json(state.runner.run_scheduled(time).await))
}

async fn run_immediate(State(state): State<AppState>) -> Json<BatchSummary> {
    Json(state.runner.run_immediate().await)
}
