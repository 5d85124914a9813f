use super::model::{
    DueRow, NewSchedule, NewUser, SchedulePatch, SettingsPatch, TopicSchedule, User, UserSetting,
};
use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // WAL keeps API reads from blocking behind the flag-clear commit.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded_path}");
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        created_at: row.try_get("created_at")?,
    })
}

fn setting_from_row(row: &SqliteRow) -> Result<UserSetting> {
    Ok(UserSetting {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        country: row.try_get("country")?,
        city: row.try_get("city")?,
        news_api_key: row.try_get("news_api_key")?,
        weather_api_key: row.try_get("weather_api_key")?,
    })
}

fn schedule_from_row(row: &SqliteRow) -> Result<TopicSchedule> {
    Ok(TopicSchedule {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        news_topic: row.try_get("news_topic")?,
        is_custom_topic: row.try_get("is_custom_topic")?,
        delivery_time: row.try_get("delivery_time")?,
        is_immediate: row.try_get("is_immediate")?,
        is_scheduled: row.try_get("is_scheduled")?,
    })
}

fn due_row_from_row(row: &SqliteRow) -> Result<DueRow> {
    Ok(DueRow {
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        city: row.try_get("city")?,
        news_api_key: row.try_get("news_api_key")?,
        weather_api_key: row.try_get("weather_api_key")?,
        schedule_id: row.try_get("schedule_id")?,
        news_topic: row.try_get("news_topic")?,
    })
}

const USER_COLUMNS: &str = "id, first_name, last_name, full_name, email, created_at";
const SETTING_COLUMNS: &str = "id, user_id, country, city, news_api_key, weather_api_key";
const SCHEDULE_COLUMNS: &str =
    "id, user_id, news_topic, is_custom_topic, delivery_time, is_immediate, is_scheduled";

// Inner joins drop users with no settings row: "not configured yet" is not an error.
const DUE_SELECT: &str = "SELECT u.id AS user_id, u.email, s.city, s.news_api_key, s.weather_api_key, \
            t.id AS schedule_id, t.news_topic \
     FROM users u \
     JOIN user_settings s ON s.user_id = u.id \
     JOIN topic_schedules t ON t.user_id = u.id";

#[instrument(skip_all)]
pub async fn find_user_by_email(pool: &Pool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
        .bind(email)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(user_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn get_user(pool: &Pool, user_id: i64) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(user_from_row).transpose()
}

/// Insert a user. Fails if the email is already registered.
#[instrument(skip_all)]
pub async fn create_user(pool: &Pool, new_user: &NewUser) -> Result<User> {
    let mut tx = pool.begin().await?;
    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE email = ?")
        .bind(&new_user.email)
        .fetch_optional(&mut *tx)
        .await?;
    if existing.is_some() {
        return Err(anyhow!("email already registered"));
    }
    let full_name = new_user
        .full_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("{} {}", new_user.first_name, new_user.last_name));
    let row = sqlx::query(&format!(
        "INSERT INTO users (first_name, last_name, full_name, email) VALUES (?, ?, ?, ?) RETURNING {USER_COLUMNS}"
    ))
    .bind(&new_user.first_name)
    .bind(&new_user.last_name)
    .bind(full_name)
    .bind(&new_user.email)
    .fetch_one(&mut *tx)
    .await?;
    let user = user_from_row(&row)?;
    tx.commit().await?;
    Ok(user)
}

#[instrument(skip_all)]
pub async fn get_settings(pool: &Pool, user_id: i64) -> Result<Option<UserSetting>> {
    let row = sqlx::query(&format!(
        "SELECT {SETTING_COLUMNS} FROM user_settings WHERE user_id = ?"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(setting_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn create_settings(
    pool: &Pool,
    user_id: i64,
    country: &str,
    city: &str,
    news_api_key: Option<&str>,
    weather_api_key: Option<&str>,
) -> Result<UserSetting> {
    let row = sqlx::query(&format!(
        "INSERT INTO user_settings (user_id, country, city, news_api_key, weather_api_key) \
         VALUES (?, ?, ?, ?, ?) RETURNING {SETTING_COLUMNS}"
    ))
    .bind(user_id)
    .bind(country)
    .bind(city)
    .bind(news_api_key)
    .bind(weather_api_key)
    .fetch_one(pool)
    .await
    .context("failed to insert user settings")?;
    setting_from_row(&row)
}

/// Apply a partial update. Returns `None` when the user has no settings row.
#[instrument(skip_all)]
pub async fn update_settings(
    pool: &Pool,
    user_id: i64,
    patch: &SettingsPatch,
) -> Result<Option<UserSetting>> {
    let row = sqlx::query(&format!(
        "UPDATE user_settings SET \
            country = COALESCE(?, country), \
            city = COALESCE(?, city), \
            news_api_key = COALESCE(?, news_api_key), \
            weather_api_key = COALESCE(?, weather_api_key) \
         WHERE user_id = ? RETURNING {SETTING_COLUMNS}"
    ))
    .bind(patch.country.as_deref())
    .bind(patch.city.as_deref())
    .bind(patch.news_api_key.as_deref())
    .bind(patch.weather_api_key.as_deref())
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(setting_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn delete_settings(pool: &Pool, user_id: i64) -> Result<bool> {
    let res = sqlx::query("DELETE FROM user_settings WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn create_schedule(
    pool: &Pool,
    user_id: i64,
    schedule: &NewSchedule,
) -> Result<TopicSchedule> {
    let row = sqlx::query(&format!(
        "INSERT INTO topic_schedules (user_id, news_topic, is_custom_topic, delivery_time, is_immediate, is_scheduled) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING {SCHEDULE_COLUMNS}"
    ))
    .bind(user_id)
    .bind(&schedule.news_topic)
    .bind(schedule.is_custom_topic)
    .bind(&schedule.delivery_time)
    .bind(schedule.is_immediate)
    .bind(schedule.is_scheduled)
    .fetch_one(pool)
    .await
    .context("failed to insert topic schedule")?;
    schedule_from_row(&row)
}

#[instrument(skip_all)]
pub async fn get_schedule(pool: &Pool, schedule_id: i64) -> Result<Option<TopicSchedule>> {
    let row = sqlx::query(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM topic_schedules WHERE id = ?"
    ))
    .bind(schedule_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(schedule_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn list_schedules(pool: &Pool, user_id: i64) -> Result<Vec<TopicSchedule>> {
    let rows = sqlx::query(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM topic_schedules WHERE user_id = ? ORDER BY id"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(schedule_from_row).collect()
}

#[instrument(skip_all)]
pub async fn update_schedule(
    pool: &Pool,
    schedule_id: i64,
    patch: &SchedulePatch,
) -> Result<Option<TopicSchedule>> {
    let row = sqlx::query(&format!(
        "UPDATE topic_schedules SET \
            news_topic = COALESCE(?, news_topic), \
            is_custom_topic = COALESCE(?, is_custom_topic), \
            delivery_time = COALESCE(?, delivery_time), \
            is_immediate = COALESCE(?, is_immediate), \
            is_scheduled = COALESCE(?, is_scheduled) \
         WHERE id = ? RETURNING {SCHEDULE_COLUMNS}"
    ))
    .bind(patch.news_topic.as_deref())
    .bind(patch.is_custom_topic)
    .bind(patch.delivery_time.as_deref())
    .bind(patch.is_immediate)
    .bind(patch.is_scheduled)
    .bind(schedule_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(schedule_from_row).transpose()
}

/// Delete a subscription, returning the removed row.
#[instrument(skip_all)]
pub async fn delete_schedule(pool: &Pool, schedule_id: i64) -> Result<Option<TopicSchedule>> {
    let row = sqlx::query(&format!(
        "DELETE FROM topic_schedules WHERE id = ? RETURNING {SCHEDULE_COLUMNS}"
    ))
    .bind(schedule_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(schedule_from_row).transpose()
}

/// Rows due at `target_time`, or every subscription row when no time is given.
/// `is_immediate` and `is_scheduled` are not consulted.
#[instrument(skip(pool))]
pub async fn select_due_rows(pool: &Pool, target_time: Option<&str>) -> Result<Vec<DueRow>> {
    let rows = match target_time {
        Some(time) => {
            sqlx::query(&format!(
                "{DUE_SELECT} WHERE t.delivery_time = ? ORDER BY u.id, t.id"
            ))
            .bind(time)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!("{DUE_SELECT} ORDER BY u.id, t.id"))
                .fetch_all(pool)
                .await?
        }
    };
    rows.iter().map(due_row_from_row).collect()
}

/// Rows carrying a pending immediate-send request, across all users.
#[instrument(skip_all)]
pub async fn select_immediate_rows(pool: &Pool) -> Result<Vec<DueRow>> {
    let rows = sqlx::query(&format!(
        "{DUE_SELECT} WHERE t.is_immediate = 1 ORDER BY u.id, t.id"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(due_row_from_row).collect()
}

/// Clear `is_immediate` for every id in one statement and one commit.
#[instrument(skip_all, fields(count = schedule_ids.len()))]
pub async fn clear_immediate_flags(pool: &Pool, schedule_ids: &[i64]) -> Result<u64> {
    if schedule_ids.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await?;
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("UPDATE topic_schedules SET is_immediate = 0 WHERE id IN (");
    let mut ids = qb.separated(", ");
    for id in schedule_ids {
        ids.push_bind(*id);
    }
    ids.push_unseparated(")");
    let res = qb.build().execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(res.rows_affected())
}
