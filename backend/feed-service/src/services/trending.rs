//! Trending vocabulary and topic extraction from recent public content.
//!
//! Tokenizes content bodies inside a sliding recency window, accumulates
//! frequency counts, and classifies items into fixed topic buckets by keyword
//! containment and content kind. Popularity is a bounded-linear scale,
//! `min(count / norm, 1.0)`, not a significance test.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use regex::Regex;
use tracing::{debug, error, warn};

use crate::config::TrendingConfig;
use crate::db::{ContentFilter, DataStore};
use crate::error::{AppError, Result};
use crate::models::{ContentItem, ContentKind, TrendingContent, TrendingKind, Visibility};

static WORD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-zA-Z]+\b").expect("valid word regex"));

/// Fixed topic buckets matched by keyword containment in the body text.
const TOPIC_KEYWORDS: [(&str, &str); 5] = [
    ("grammar", "Grammar"),
    ("vocabulary", "Vocabulary"),
    ("pronunciation", "Pronunciation"),
    ("conversation", "Speaking"),
    ("speaking", "Speaking"),
];

fn topic_for_kind(kind: ContentKind) -> Option<&'static str> {
    match kind {
        ContentKind::LearningTip => Some("Learning Tips"),
        ContentKind::Achievement => Some("Achievements"),
        ContentKind::Conversation => Some("Conversations"),
        ContentKind::Milestone => Some("Milestones"),
        ContentKind::Challenge => Some("Challenges"),
        ContentKind::LevelUp | ContentKind::Streak => None,
    }
}

/// Lower-cased alphabetic tokens longer than the noise threshold.
pub fn tokenize(text: &str, min_len: usize) -> Vec<String> {
    WORD_REGEX
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|token| token.len() >= min_len)
        .collect()
}

/// Word frequencies across a content window. BTreeMap keeps ranking ties
/// deterministic (alphabetical).
pub fn word_counts(items: &[ContentItem], min_len: usize) -> BTreeMap<String, i64> {
    let mut counts = BTreeMap::new();
    for item in items {
        for token in tokenize(&item.body, min_len) {
            *counts.entry(token).or_insert(0) += 1;
        }
    }
    counts
}

/// Topic frequencies from keyword containment plus the item's kind bucket.
pub fn topic_counts(items: &[ContentItem]) -> BTreeMap<String, i64> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for item in items {
        let body = item.body.to_lowercase();
        let mut matched: Vec<&str> = TOPIC_KEYWORDS
            .iter()
            .filter(|(keyword, _)| body.contains(keyword))
            .map(|(_, topic)| *topic)
            .collect();
        if let Some(topic) = topic_for_kind(item.kind) {
            matched.push(topic);
        }
        matched.sort_unstable();
        matched.dedup();
        for topic in matched {
            *counts.entry(topic.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

fn top_k(counts: BTreeMap<String, i64>, k: usize) -> Vec<(String, i64)> {
    let mut ranked: Vec<(String, i64)> = counts.into_iter().collect();
    // Count descending; the BTreeMap origin makes equal counts alphabetical.
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(k);
    ranked
}

pub struct TrendingExtractor<S: DataStore + ?Sized> {
    store: Arc<S>,
    redis: Option<ConnectionManager>,
    cfg: TrendingConfig,
}

impl<S: DataStore + ?Sized> TrendingExtractor<S> {
    pub fn new(store: Arc<S>, redis: Option<ConnectionManager>, cfg: TrendingConfig) -> Self {
        Self { store, redis, cfg }
    }

    /// Ranked trending words and topics for a language, computed from public
    /// content created inside the recency window.
    pub async fn extract(&self, language: &str) -> Result<Vec<TrendingContent>> {
        let cache_key = format!("feed:trending:{}", language);

        if let Some(redis) = &self.redis {
            if let Ok(cached) = self.get_from_cache(redis, &cache_key).await {
                debug!(language, "trending cache hit");
                return Ok(cached);
            }
        }

        let window_start = Utc::now() - Duration::days(self.cfg.window_days);
        let items = self
            .store
            .query_content(&ContentFilter {
                author_ids: None,
                kinds: None,
                visibility: vec![Visibility::Public],
                created_after: Some(window_start),
                limit: None,
            })
            .await?;

        let now = Utc::now();
        let mut trending = Vec::new();
        for (word, count) in top_k(word_counts(&items, self.cfg.min_token_len), self.cfg.word_limit)
        {
            trending.push(TrendingContent {
                kind: TrendingKind::Word,
                content: word,
                language: language.to_string(),
                level: None,
                popularity_score: (count as f64 / self.cfg.word_norm).min(1.0),
                usage_count: count,
                trend: None,
                last_updated: now,
            });
        }
        for (topic, count) in top_k(topic_counts(&items), self.cfg.topic_limit) {
            trending.push(TrendingContent {
                kind: TrendingKind::Topic,
                content: topic,
                language: language.to_string(),
                level: None,
                popularity_score: (count as f64 / self.cfg.topic_norm).min(1.0),
                usage_count: count,
                trend: None,
                last_updated: now,
            });
        }

        if let Some(redis) = &self.redis {
            if let Err(err) = self.cache_response(redis, &cache_key, &trending).await {
                warn!(language, error = %err, "failed to cache trending response");
            }
        }

        Ok(trending)
    }

    async fn get_from_cache(
        &self,
        redis: &ConnectionManager,
        key: &str,
    ) -> Result<Vec<TrendingContent>> {
        let mut conn = redis.clone();
        let cached: Option<String> = conn.get(key).await.map_err(|e| {
            error!("redis GET failed: {}", e);
            AppError::Cache("cache read failed".to_string())
        })?;

        match cached {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                error!("failed to deserialize cached trending: {}", e);
                AppError::Cache("cache deserialization failed".to_string())
            }),
            None => Err(AppError::NotFound("cache miss".to_string())),
        }
    }

    async fn cache_response(
        &self,
        redis: &ConnectionManager,
        key: &str,
        response: &[TrendingContent],
    ) -> Result<()> {
        let mut conn = redis.clone();
        let json = serde_json::to_string(response)
            .map_err(|e| AppError::Internal(format!("serialization failed: {}", e)))?;
        let _: () = conn
            .set_ex(key, json, self.cfg.cache_ttl_secs)
            .await
            .map_err(|e| {
                error!("redis SET failed: {}", e);
                AppError::Cache("cache write failed".to_string())
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EngagementCounts;
    use uuid::Uuid;

    fn item(kind: ContentKind, body: &str) -> ContentItem {
        ContentItem {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            kind,
            visibility: Visibility::Public,
            title: String::new(),
            body: body.to_string(),
            engagement: EngagementCounts::default(),
            deleted: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_tokenize_drops_short_and_non_alphabetic() {
        let tokens = tokenize("I am learning Spanish! Hola x2 to everyone", 4);
        assert_eq!(tokens, vec!["learning", "spanish", "hola", "everyone"]);
    }

    #[test]
    fn test_word_counts_accumulate_across_items() {
        let items = vec![
            item(ContentKind::Conversation, "hola amigos"),
            item(ContentKind::Conversation, "Hola otra vez"),
        ];
        let counts = word_counts(&items, 4);
        assert_eq!(counts.get("hola"), Some(&2));
        assert_eq!(counts.get("amigos"), Some(&1));
        // "vez" is under the noise threshold.
        assert_eq!(counts.get("vez"), None);
    }

    #[test]
    fn test_topic_buckets_from_keywords_and_kind() {
        let items = vec![
            item(ContentKind::LearningTip, "a grammar trick for verbs"),
            item(ContentKind::Conversation, "practiced pronunciation today"),
        ];
        let counts = topic_counts(&items);
        assert_eq!(counts.get("Grammar"), Some(&1));
        assert_eq!(counts.get("Learning Tips"), Some(&1));
        assert_eq!(counts.get("Pronunciation"), Some(&1));
        assert_eq!(counts.get("Conversations"), Some(&1));
    }

    #[test]
    fn test_kind_buckets_use_fixed_topic_names() {
        let kinds = [
            (ContentKind::LearningTip, "Learning Tips"),
            (ContentKind::Achievement, "Achievements"),
            (ContentKind::Conversation, "Conversations"),
            (ContentKind::Milestone, "Milestones"),
            (ContentKind::Challenge, "Challenges"),
        ];
        let items: Vec<ContentItem> = kinds.iter().map(|(kind, _)| item(*kind, "")).collect();
        let counts = topic_counts(&items);
        for (_, topic) in kinds {
            assert_eq!(counts.get(topic), Some(&1), "missing bucket for {}", topic);
        }
        // Level-ups and streaks have no topic bucket of their own.
        let counts = topic_counts(&[item(ContentKind::LevelUp, ""), item(ContentKind::Streak, "")]);
        assert!(counts.is_empty());
    }

    #[test]
    fn test_kind_and_keyword_buckets_both_count() {
        // The kind bucket is distinct from the keyword bucket, so one
        // conversation post contributes to both; duplicate keyword hits for
        // the same topic still count once.
        let items = vec![item(
            ContentKind::Conversation,
            "conversation and speaking practice",
        )];
        let counts = topic_counts(&items);
        assert_eq!(counts.get("Conversations"), Some(&1));
        assert_eq!(counts.get("Speaking"), Some(&1));
    }

    #[test]
    fn test_top_k_orders_by_count_then_alphabetically() {
        let mut counts = BTreeMap::new();
        counts.insert("beta".to_string(), 3);
        counts.insert("alpha".to_string(), 3);
        counts.insert("gamma".to_string(), 5);
        let ranked = top_k(counts, 2);
        assert_eq!(ranked[0].0, "gamma");
        assert_eq!(ranked[1].0, "alpha");
    }

    #[test]
    fn test_popularity_score_is_bounded() {
        let score = |count: i64, norm: f64| (count as f64 / norm).min(1.0);
        assert!((score(5, 10.0) - 0.5).abs() < 1e-9);
        assert!((score(25, 10.0) - 1.0).abs() < 1e-9);
    }
}
