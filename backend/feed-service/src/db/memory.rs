//! In-memory `DataStore` used by tests and local tooling.
//!
//! Word-analytics and leaderboard writes go through dashmap's entry API, so
//! concurrent writers to the same key are serialized per key and the
//! lost-update race of a read-modify-write cycle cannot occur. This mirrors
//! the atomic-increment contract the Postgres store gets from single-statement
//! upserts.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::config::AnalyticsConfig;
use crate::db::{classify_trend, AnalyticsDelta, ContentFilter, DataStore};
use crate::error::Result;
use crate::models::{
    level_for_points, CefrLevel, ContentItem, GlobalWordAnalytics, InteractionHistory,
    LeaderboardCounters, PrivacySettings, Trend, UserProfile, WordStudyEvent,
};

const DEFAULT_QUERY_LIMIT: usize = 1000;

#[derive(Default)]
pub struct MemoryStore {
    profiles: DashMap<Uuid, UserProfile>,
    privacy: DashMap<Uuid, PrivacySettings>,
    /// follower -> set of followees
    follows: DashMap<Uuid, HashSet<Uuid>>,
    content: DashMap<Uuid, ContentItem>,
    likes: DashMap<Uuid, HashSet<Uuid>>,
    comments: DashMap<Uuid, HashSet<Uuid>>,
    events: Mutex<Vec<WordStudyEvent>>,
    analytics: DashMap<(String, String), GlobalWordAnalytics>,
    points: DashMap<Uuid, LeaderboardCounters>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- Seed helpers (test fixtures and local tooling) ----

    pub fn insert_profile(&self, profile: UserProfile) {
        self.profiles.insert(profile.user_id, profile);
    }

    pub fn insert_privacy(&self, settings: PrivacySettings) {
        self.privacy.insert(settings.user_id, settings);
    }

    pub fn insert_content(&self, item: ContentItem) {
        self.content.insert(item.id, item);
    }

    pub fn follow(&self, follower: Uuid, followee: Uuid) {
        self.follows.entry(follower).or_default().insert(followee);
    }

    pub fn like(&self, user_id: Uuid, content_id: Uuid) {
        self.likes.entry(user_id).or_default().insert(content_id);
        if let Some(mut item) = self.content.get_mut(&content_id) {
            item.engagement.likes += 1;
        }
    }

    pub fn comment(&self, user_id: Uuid, content_id: Uuid) {
        self.comments.entry(user_id).or_default().insert(content_id);
        if let Some(mut item) = self.content.get_mut(&content_id) {
            item.engagement.comments += 1;
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }
}

fn first_row(
    word: &str,
    language: &str,
    delta: &AnalyticsDelta,
) -> GlobalWordAnalytics {
    let mut level_breakdown = BTreeMap::new();
    level_breakdown.insert(delta.level, 1);
    let mut study_type_breakdown = BTreeMap::new();
    study_type_breakdown.insert(delta.study_type, 1);
    GlobalWordAnalytics {
        word: word.to_string(),
        language: language.to_string(),
        total_count: 1,
        today_count: 1,
        week_count: 1,
        level_breakdown,
        study_type_breakdown,
        avg_difficulty: delta.difficulty.unwrap_or(0.0),
        difficulty_samples: if delta.difficulty.is_some() { 1 } else { 0 },
        // A freshly created row always starts stable; the trend is only
        // recomputed on subsequent increments.
        trend: Trend::Stable,
        last_updated: delta.occurred_at,
    }
}

fn apply_delta(row: &mut GlobalWordAnalytics, delta: &AnalyticsDelta, rule: &AnalyticsConfig) {
    row.total_count += 1;
    row.today_count += 1;
    row.week_count += 1;
    *row.level_breakdown.entry(delta.level).or_insert(0) += 1;
    *row.study_type_breakdown.entry(delta.study_type).or_insert(0) += 1;
    if let Some(difficulty) = delta.difficulty {
        let samples = row.difficulty_samples as f64;
        row.avg_difficulty = (row.avg_difficulty * samples + difficulty) / (samples + 1.0);
        row.difficulty_samples += 1;
    }
    row.trend = classify_trend(row.today_count, row.week_count, rule);
    row.last_updated = delta.occurred_at;
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get_user_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        Ok(self.profiles.get(&user_id).map(|p| p.clone()))
    }

    async fn get_privacy_settings(&self, user_id: Uuid) -> Result<PrivacySettings> {
        let entry = self
            .privacy
            .entry(user_id)
            .or_insert_with(|| PrivacySettings::default_for(user_id));
        Ok(entry.clone())
    }

    async fn upsert_privacy_settings(&self, settings: &PrivacySettings) -> Result<()> {
        self.privacy.insert(settings.user_id, settings.clone());
        Ok(())
    }

    async fn list_profiles_by_level(&self, level: CefrLevel) -> Result<Vec<Uuid>> {
        Ok(self
            .profiles
            .iter()
            .filter(|p| p.level == level)
            .map(|p| p.user_id)
            .collect())
    }

    async fn list_profiles_by_language(&self, language: &str) -> Result<Vec<Uuid>> {
        Ok(self
            .profiles
            .iter()
            .filter(|p| p.target_language == language)
            .map(|p| p.user_id)
            .collect())
    }

    async fn list_following(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .follows
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn list_followers(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .follows
            .iter()
            .filter(|entry| entry.value().contains(&user_id))
            .map(|entry| *entry.key())
            .collect())
    }

    async fn query_content(&self, filter: &ContentFilter) -> Result<Vec<ContentItem>> {
        let mut items: Vec<ContentItem> = self
            .content
            .iter()
            .filter(|item| !item.deleted)
            .filter(|item| {
                filter
                    .author_ids
                    .as_ref()
                    .map(|ids| ids.contains(&item.author_id))
                    .unwrap_or(true)
            })
            .filter(|item| {
                filter
                    .kinds
                    .as_ref()
                    .map(|kinds| kinds.contains(&item.kind))
                    .unwrap_or(true)
            })
            .filter(|item| filter.visibility.contains(&item.visibility))
            .filter(|item| {
                filter
                    .created_after
                    .map(|bound| item.created_at >= bound)
                    .unwrap_or(true)
            })
            .map(|item| item.clone())
            .collect();

        // Newest first; id as a deterministic secondary key.
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let limit = filter.limit.map(|l| l as usize).unwrap_or(DEFAULT_QUERY_LIMIT);
        items.truncate(limit);
        Ok(items)
    }

    async fn list_interactions(&self, user_id: Uuid) -> Result<InteractionHistory> {
        Ok(InteractionHistory {
            liked: self
                .likes
                .get(&user_id)
                .map(|set| set.clone())
                .unwrap_or_default(),
            commented: self
                .comments
                .get(&user_id)
                .map(|set| set.clone())
                .unwrap_or_default(),
        })
    }

    async fn append_study_event(&self, event: &WordStudyEvent) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| crate::error::AppError::Internal("event log poisoned".to_string()))?;
        events.push(event.clone());
        Ok(())
    }

    async fn list_study_events(
        &self,
        word: &str,
        language: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WordStudyEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| crate::error::AppError::Internal("event log poisoned".to_string()))?;
        Ok(events
            .iter()
            .filter(|e| e.word == word && e.language == language)
            .filter(|e| since.map(|bound| e.created_at >= bound).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn upsert_word_analytics(
        &self,
        word: &str,
        language: &str,
        delta: &AnalyticsDelta,
        rule: &AnalyticsConfig,
    ) -> Result<()> {
        let key = (word.to_string(), language.to_string());
        match self.analytics.entry(key) {
            Entry::Occupied(mut occupied) => apply_delta(occupied.get_mut(), delta, rule),
            Entry::Vacant(vacant) => {
                vacant.insert(first_row(word, language, delta));
            }
        }
        Ok(())
    }

    async fn get_word_analytics(
        &self,
        word: &str,
        language: &str,
    ) -> Result<Option<GlobalWordAnalytics>> {
        let key = (word.to_string(), language.to_string());
        Ok(self.analytics.get(&key).map(|row| row.clone()))
    }

    async fn top_words_by_today(
        &self,
        language: &str,
        level: Option<CefrLevel>,
        limit: u32,
    ) -> Result<Vec<GlobalWordAnalytics>> {
        let mut rows: Vec<GlobalWordAnalytics> = self
            .analytics
            .iter()
            .filter(|row| row.language == language)
            .filter(|row| {
                level
                    .map(|l| row.level_breakdown.get(&l).copied().unwrap_or(0) > 0)
                    .unwrap_or(true)
            })
            .map(|row| row.clone())
            .collect();
        rows.sort_by(|a, b| {
            b.today_count
                .cmp(&a.today_count)
                .then_with(|| a.word.cmp(&b.word))
        });
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn list_tracked_words(&self, language: Option<&str>) -> Result<Vec<(String, String)>> {
        Ok(self
            .analytics
            .iter()
            .filter(|row| language.map(|l| row.language == l).unwrap_or(true))
            .map(|row| (row.word.clone(), row.language.clone()))
            .collect())
    }

    async fn reset_today_counts(&self) -> Result<u64> {
        let mut touched = 0u64;
        for mut row in self.analytics.iter_mut() {
            row.today_count = 0;
            // With today at zero the trend can only be decreasing (week still
            // has activity) or stable (week empty too).
            row.trend = if row.week_count > 0 {
                Trend::Decreasing
            } else {
                Trend::Stable
            };
            touched += 1;
        }
        Ok(touched)
    }

    async fn replace_week_count(
        &self,
        word: &str,
        language: &str,
        week_count: i64,
        rule: &AnalyticsConfig,
    ) -> Result<()> {
        let key = (word.to_string(), language.to_string());
        if let Some(mut row) = self.analytics.get_mut(&key) {
            row.week_count = week_count;
            row.trend = classify_trend(row.today_count, week_count, rule);
        }
        Ok(())
    }

    async fn replace_word_analytics(&self, row: &GlobalWordAnalytics) -> Result<()> {
        let key = (row.word.clone(), row.language.clone());
        self.analytics.insert(key, row.clone());
        Ok(())
    }

    async fn get_user_points(&self, user_id: Uuid) -> Result<Option<LeaderboardCounters>> {
        Ok(self.points.get(&user_id).map(|row| row.clone()))
    }

    async fn add_points(&self, user_id: Uuid, points: i64) -> Result<LeaderboardCounters> {
        let mut entry = self.points.entry(user_id).or_insert_with(|| {
            LeaderboardCounters {
                user_id,
                total_points: 0,
                level: 1,
                badges: Vec::new(),
            }
        });
        entry.total_points += points;
        entry.level = level_for_points(entry.total_points);
        Ok(entry.clone())
    }

    async fn top_users_by_points(&self, limit: u32) -> Result<Vec<LeaderboardCounters>> {
        let mut rows: Vec<LeaderboardCounters> =
            self.points.iter().map(|row| row.clone()).collect();
        rows.sort_by(|a, b| {
            b.total_points
                .cmp(&a.total_points)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn count_users_with_points_above(&self, points: i64) -> Result<i64> {
        Ok(self
            .points
            .iter()
            .filter(|row| row.total_points > points)
            .count() as i64)
    }

    async fn count_users(&self) -> Result<i64> {
        Ok(self.points.len() as i64)
    }
}
