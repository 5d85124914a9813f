use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

use infostream_digest::db::{self, NewSchedule, NewUser, Pool};
use infostream_digest::digest::{DigestGenerator, Orchestrator};
use infostream_digest::model::BatchStatus;
use infostream_digest::notifier::{Notifier, NotifyError};
use infostream_digest::providers::{
    MarketQuote, NewsArticle, NewsProvider, ProviderError, StockProvider, WeatherInfo,
    WeatherProvider, WeatherReport,
};
use infostream_digest::render::DigestRenderer;

const BROKEN_TOPIC: &str = "broken";

async fn setup_pool() -> Pool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[derive(Clone, Default)]
struct StubNews {
    calls: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

#[async_trait]
impl NewsProvider for StubNews {
    async fn top_news(
        &self,
        topic: &str,
        api_key: Option<&str>,
    ) -> Result<Vec<NewsArticle>, ProviderError> {
        self.calls
            .lock()
            .await
            .push((topic.to_string(), api_key.map(str::to_string)));
        if topic == BROKEN_TOPIC {
            return Err(ProviderError::Api("rate limited".into()));
        }
        Ok(vec![NewsArticle {
            url: format!("https://news.example/{topic}"),
            title: format!("Top {topic} story"),
            author: None,
            publish_date: Some("2026-10-16".into()),
            summary: "Summary.".into(),
            text: "Body.".into(),
        }])
    }
}

struct StubWeather;

#[async_trait]
impl WeatherProvider for StubWeather {
    async fn current_weather(
        &self,
        _city: &str,
        _api_key: Option<&str>,
    ) -> Result<WeatherReport, ProviderError> {
        Ok(WeatherReport {
            weather_info: WeatherInfo {
                status: "clear sky".into(),
                temp: 25.0,
                feels_like: 26.0,
                humidity: 50,
            },
            weather_icon_url: "http://icons.example/01d@2x.png".into(),
        })
    }
}

struct StubStock;

#[async_trait]
impl StockProvider for StubStock {
    async fn snapshot(&self) -> Result<Vec<MarketQuote>, ProviderError> {
        Ok(vec![MarketQuote {
            name: "NIFTY 50".into(),
            latest_close: "25000.00".into(),
            absolute_change: "-50.00".into(),
            percent_change: "-0.20".into(),
        }])
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    responses: Arc<Mutex<VecDeque<Result<String, NotifyError>>>>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingNotifier {
    fn with_responses(responses: Vec<Result<String, NotifyError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<String, NotifyError> {
        assert!(html.contains("clear sky"));
        self.sent
            .lock()
            .await
            .push((to.to_string(), subject.to_string()));
        let mut guard = self.responses.lock().await;
        guard
            .pop_front()
            .unwrap_or_else(|| Ok("Email sent successfully".into()))
    }
}

struct Harness {
    pool: Pool,
    news: StubNews,
    notifier: RecordingNotifier,
    orchestrator: Orchestrator,
    template_dir: TempDir,
}

async fn harness(notifier: RecordingNotifier) -> Harness {
    let pool = setup_pool().await;
    let template_dir = tempfile::tempdir().unwrap();
    let template = template_dir.path().join("digest.hbs");
    std::fs::write(
        &template,
        "<h1>{{weather_info.status}}</h1>{{#each data}}<a href=\"{{url}}\">{{title}}</a>{{/each}}\
         {{#each stock_info}}{{name}} {{percent_change}}{{/each}}",
    )
    .unwrap();

    let news = StubNews::default();
    let generator = DigestGenerator::new(
        Arc::new(news.clone()),
        Arc::new(StubWeather),
        Arc::new(StubStock),
        DigestRenderer::new(template),
    );
    let orchestrator = Orchestrator::new(pool.clone(), generator, Arc::new(notifier.clone()));
    Harness {
        pool,
        news,
        notifier,
        orchestrator,
        template_dir,
    }
}

async fn add_user(pool: &Pool, email: &str, city: Option<&str>) -> i64 {
    let user = db::create_user(
        pool,
        &NewUser {
            first_name: "Test".into(),
            last_name: "User".into(),
            full_name: None,
            email: email.into(),
        },
    )
    .await
    .unwrap();
    if let Some(city) = city {
        db::create_settings(pool, user.id, "India", city, Some("news-key"), Some("weather-key"))
            .await
            .unwrap();
    }
    user.id
}

async fn subscribe(pool: &Pool, user_id: i64, topic: &str, time: &str, immediate: bool) -> i64 {
    db::create_schedule(
        pool,
        user_id,
        &NewSchedule {
            news_topic: topic.into(),
            is_custom_topic: false,
            delivery_time: time.into(),
            is_immediate: immediate,
            is_scheduled: true,
        },
    )
    .await
    .unwrap()
    .id
}

async fn is_immediate(pool: &Pool, schedule_id: i64) -> bool {
    db::get_schedule(pool, schedule_id)
        .await
        .unwrap()
        .unwrap()
        .is_immediate
}

#[tokio::test]
async fn scheduled_run_counts_each_pair() {
    let h = harness(RecordingNotifier::default()).await;
    let alice = add_user(&h.pool, "alice@example.com", Some("Pune")).await;
    let bob = add_user(&h.pool, "bob@example.com", Some("Delhi")).await;
    let carol = add_user(&h.pool, "carol@example.com", Some("Goa")).await;
    let no_settings = add_user(&h.pool, "dave@example.com", None).await;

    subscribe(&h.pool, alice, "sports", "11:00", false).await;
    subscribe(&h.pool, alice, BROKEN_TOPIC, "11:00", false).await;
    subscribe(&h.pool, bob, "science", "11:00", false).await;
    subscribe(&h.pool, carol, "sports", "14:00", false).await;
    subscribe(&h.pool, no_settings, "sports", "11:00", false).await;

    let summary = h.orchestrator.run_scheduled(Some("11:00")).await;
    assert_eq!(summary.status, BatchStatus::PartialSuccess);
    assert_eq!(summary.total_users, 2);
    assert_eq!(summary.emails_sent, 2);
    assert_eq!(summary.emails_failed, 1);
    assert!(summary.message.is_none());
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].user_email, "alice@example.com");
    assert_eq!(summary.errors[0].news_topic, BROKEN_TOPIC);
    assert_eq!(summary.errors[0].error, "News API error: rate limited");

    let sent = h.notifier.sent().await;
    assert_eq!(
        sent,
        vec![
            ("alice@example.com".to_string(), "Your Sports News Digest".to_string()),
            ("bob@example.com".to_string(), "Your Science News Digest".to_string()),
        ]
    );
    let calls = h.news.calls.lock().await.clone();
    assert!(calls.iter().all(|(_, key)| key.as_deref() == Some("news-key")));
}

#[tokio::test]
async fn scheduled_run_with_no_due_rows_is_success() {
    let h = harness(RecordingNotifier::default()).await;
    let alice = add_user(&h.pool, "alice@example.com", Some("Pune")).await;
    subscribe(&h.pool, alice, "sports", "11:00", false).await;

    let summary = h.orchestrator.run_scheduled(Some("21:00")).await;
    assert_eq!(summary.status, BatchStatus::Success);
    assert_eq!(summary.message.as_deref(), Some("No users to notify"));
    assert_eq!(
        (summary.total_users, summary.emails_sent, summary.emails_failed),
        (0, 0, 0)
    );
    assert!(h.notifier.sent().await.is_empty());
}

#[tokio::test]
async fn scheduled_run_leaves_immediate_flags_alone() {
    let h = harness(RecordingNotifier::default()).await;
    let alice = add_user(&h.pool, "alice@example.com", Some("Pune")).await;
    let row = subscribe(&h.pool, alice, "sports", "11:00", true).await;

    let summary = h.orchestrator.run_scheduled(Some("11:00")).await;
    assert_eq!(summary.status, BatchStatus::Success);
    assert_eq!(summary.emails_sent, 1);
    assert!(is_immediate(&h.pool, row).await);
}

#[tokio::test]
async fn scheduled_runs_are_repeatable() {
    let h = harness(RecordingNotifier::default()).await;
    let alice = add_user(&h.pool, "alice@example.com", Some("Pune")).await;
    subscribe(&h.pool, alice, "sports", "17:00", false).await;
    subscribe(&h.pool, alice, "business", "17:00", false).await;

    let first = h.orchestrator.run_scheduled(Some("17:00")).await;
    let second = h.orchestrator.run_scheduled(Some("17:00")).await;
    assert_eq!(first, second);
    assert_eq!(first.emails_sent, 2);
    assert_eq!(h.notifier.sent().await.len(), 4);
}

#[tokio::test]
async fn immediate_run_with_nothing_pending_is_error() {
    let h = harness(RecordingNotifier::default()).await;
    let alice = add_user(&h.pool, "alice@example.com", Some("Pune")).await;
    subscribe(&h.pool, alice, "sports", "11:00", false).await;

    let summary = h.orchestrator.run_immediate().await;
    assert_eq!(summary.status, BatchStatus::Error);
    assert_eq!(
        summary.message.as_deref(),
        Some("User not found or not configured for immediate emails")
    );
    assert_eq!(
        (summary.total_users, summary.emails_sent, summary.emails_failed),
        (0, 0, 0)
    );
}

#[tokio::test]
async fn immediate_run_clears_only_delivered_rows() {
    let h = harness(RecordingNotifier::default()).await;
    let alice = add_user(&h.pool, "alice@example.com", Some("Pune")).await;
    let good = subscribe(&h.pool, alice, "sports", "11:00", true).await;
    let bad = subscribe(&h.pool, alice, BROKEN_TOPIC, "11:00", true).await;

    let summary = h.orchestrator.run_immediate().await;
    assert_eq!(summary.status, BatchStatus::PartialSuccess);
    assert_eq!(
        summary.message.as_deref(),
        Some("Processed 1 user(s): sent 1 email(s), 1 failed")
    );
    assert!(!is_immediate(&h.pool, good).await);
    assert!(is_immediate(&h.pool, bad).await);

    // The failed row is retried on the next tick; it still fails.
    let retry = h.orchestrator.run_immediate().await;
    assert_eq!(retry.status, BatchStatus::Error);
    assert_eq!((retry.emails_sent, retry.emails_failed), (0, 1));
    assert!(is_immediate(&h.pool, bad).await);
    assert_eq!(h.notifier.sent().await.len(), 1);
}

#[tokio::test]
async fn provider_failure_never_reaches_notifier() {
    let h = harness(RecordingNotifier::default()).await;
    let alice = add_user(&h.pool, "alice@example.com", Some("Pune")).await;
    subscribe(&h.pool, alice, BROKEN_TOPIC, "19:00", false).await;

    let summary = h.orchestrator.run_scheduled(Some("19:00")).await;
    assert_eq!(summary.status, BatchStatus::PartialSuccess);
    assert_eq!((summary.emails_sent, summary.emails_failed), (0, 1));
    assert!(h.notifier.sent().await.is_empty());
}

#[tokio::test]
async fn notifier_failure_keeps_the_immediate_flag() {
    let notifier = RecordingNotifier::with_responses(vec![
        Err(NotifyError::Rejected {
            status: 401,
            body: "unauthorized".into(),
        }),
        Ok("Email sent successfully".into()),
    ]);
    let h = harness(notifier).await;
    let alice = add_user(&h.pool, "alice@example.com", Some("Pune")).await;
    let bob = add_user(&h.pool, "bob@example.com", Some("Delhi")).await;
    let first = subscribe(&h.pool, alice, "sports", "11:00", true).await;
    let second = subscribe(&h.pool, bob, "health", "23:00", true).await;

    let summary = h.orchestrator.run_immediate().await;
    assert_eq!(summary.status, BatchStatus::PartialSuccess);
    assert_eq!(summary.total_users, 2);
    assert_eq!(summary.errors[0].user_email, "alice@example.com");
    assert!(summary.errors[0].error.contains("401"));
    assert!(is_immediate(&h.pool, first).await);
    assert!(!is_immediate(&h.pool, second).await);
}

#[tokio::test]
async fn missing_template_is_reported_per_pair() {
    let h = harness(RecordingNotifier::default()).await;
    let alice = add_user(&h.pool, "alice@example.com", Some("Pune")).await;
    subscribe(&h.pool, alice, "sports", "11:00", false).await;
    std::fs::remove_file(h.template_dir.path().join("digest.hbs")).unwrap();

    let summary = h.orchestrator.run_scheduled(Some("11:00")).await;
    assert_eq!(summary.emails_failed, 1);
    assert!(summary.errors[0].error.starts_with("Template file not found: "));
    assert!(h.notifier.sent().await.is_empty());
}

#[tokio::test]
async fn selection_failure_is_an_error_summary() {
    let h = harness(RecordingNotifier::default()).await;
    let alice = add_user(&h.pool, "alice@example.com", Some("Pune")).await;
    subscribe(&h.pool, alice, "sports", "11:00", true).await;
    sqlx::query("DROP TABLE topic_schedules")
        .execute(&h.pool)
        .await
        .unwrap();

    let scheduled = h.orchestrator.run_scheduled(Some("11:00")).await;
    assert_eq!(scheduled.status, BatchStatus::Error);
    let message = scheduled.message.clone().unwrap();
    assert!(message.starts_with("Database error while fetching users: "));
    assert!(message.contains("topic_schedules"));
    assert_eq!(
        (scheduled.total_users, scheduled.emails_sent, scheduled.emails_failed),
        (0, 0, 0)
    );

    let immediate = h.orchestrator.run_immediate().await;
    assert_eq!(immediate.status, BatchStatus::Error);
    assert!(immediate
        .message
        .as_deref()
        .unwrap()
        .starts_with("Error sending immediate emails: "));
    assert_eq!(
        (immediate.total_users, immediate.emails_sent, immediate.emails_failed),
        (0, 0, 0)
    );
    assert!(h.notifier.sent().await.is_empty());
}

#[tokio::test]
async fn failed_flag_reset_keeps_counts_and_flags() {
    let h = harness(RecordingNotifier::default()).await;
    let alice = add_user(&h.pool, "alice@example.com", Some("Pune")).await;
    let row = subscribe(&h.pool, alice, "sports", "11:00", true).await;
    sqlx::query(
        "CREATE TRIGGER lock_immediate BEFORE UPDATE OF is_immediate ON topic_schedules \
         BEGIN SELECT RAISE(ABORT, 'immediate flags locked'); END",
    )
    .execute(&h.pool)
    .await
    .unwrap();

    let summary = h.orchestrator.run_immediate().await;
    assert_eq!(summary.status, BatchStatus::Error);
    assert_eq!(
        (summary.total_users, summary.emails_sent, summary.emails_failed),
        (1, 1, 0)
    );
    let message = summary.message.unwrap();
    assert!(message.starts_with(
        "Processed 1 user(s): sent 1 email(s), 0 failed; failed to reset immediate flags: "
    ));
    assert!(message.contains("immediate flags locked"));
    assert!(is_immediate(&h.pool, row).await);
    assert_eq!(h.notifier.sent().await.len(), 1);
}
