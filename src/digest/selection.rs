use anyhow::Result;
use std::collections::HashMap;

use crate::db::{self, DueRow, Pool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicEntry {
    pub schedule_id: i64,
    pub news_topic: String,
}

/// One user with everything needed to build their digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestTarget {
    pub user_id: i64,
    pub email: String,
    pub city: String,
    pub news_api_key: Option<String>,
    pub weather_api_key: Option<String>,
    pub topics: Vec<TopicEntry>,
}

/// Regroup row-level join output by user. Users keep the order they first
/// appear in; topics keep row order within a user.
pub fn group_rows(rows: Vec<DueRow>) -> Vec<DigestTarget> {
    let mut index: HashMap<i64, usize> = HashMap::new();
    let mut targets: Vec<DigestTarget> = Vec::new();

    for row in rows {
        let topic = TopicEntry {
            schedule_id: row.schedule_id,
            news_topic: row.news_topic,
        };
        match index.get(&row.user_id) {
            Some(&pos) => targets[pos].topics.push(topic),
            None => {
                index.insert(row.user_id, targets.len());
                targets.push(DigestTarget {
                    user_id: row.user_id,
                    email: row.email,
                    city: row.city,
                    news_api_key: row.news_api_key,
                    weather_api_key: row.weather_api_key,
                    topics: vec![topic],
                });
            }
        }
    }
    targets
}

/// Users with a subscription at `target_time` (all subscriptions when `None`).
pub async fn users_to_notify(pool: &Pool, target_time: Option<&str>) -> Result<Vec<DigestTarget>> {
    Ok(group_rows(db::select_due_rows(pool, target_time).await?))
}

/// Users with at least one pending immediate-send request.
pub async fn users_for_immediate(pool: &Pool) -> Result<Vec<DigestTarget>> {
    Ok(group_rows(db::select_immediate_rows(pool).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user_id: i64, schedule_id: i64, topic: &str) -> DueRow {
        DueRow {
            user_id,
            email: format!("user{user_id}@example.com"),
            city: "Pune".into(),
            news_api_key: Some(format!("news-{user_id}")),
            weather_api_key: None,
            schedule_id,
            news_topic: topic.into(),
        }
    }

    #[test]
    fn groups_by_user_preserving_order() {
        let rows = vec![
            row(7, 1, "sports"),
            row(3, 2, "science"),
            row(7, 5, "business"),
            row(3, 9, "health"),
        ];
        let targets = group_rows(rows);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].user_id, 7);
        assert_eq!(targets[1].user_id, 3);
        let topics: Vec<_> = targets[0].topics.iter().map(|t| t.news_topic.as_str()).collect();
        assert_eq!(topics, ["sports", "business"]);
        assert_eq!(targets[0].topics[1].schedule_id, 5);
        assert_eq!(targets[0].news_api_key.as_deref(), Some("news-7"));
    }

    #[test]
    fn empty_rows_give_no_targets() {
        assert!(group_rows(Vec::new()).is_empty());
    }
}
