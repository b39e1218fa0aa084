/// Data store seam for the ranking and analytics engine.
///
/// The engine is a stateless computation layer: every durable read and write
/// goes through this trait. Two implementations are provided, a Postgres
/// store for production and a dashmap-backed in-memory store used by tests
/// and local tooling.
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::models::{
    CefrLevel, ContentItem, ContentKind, GlobalWordAnalytics, InteractionHistory,
    LeaderboardCounters, PrivacySettings, StudyType, UserProfile, Visibility, WordStudyEvent,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Filter for content queries. Results are always ordered newest-first and
/// never include soft-deleted items.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    /// Restrict to these authors; `None` means any author.
    pub author_ids: Option<Vec<Uuid>>,
    /// Restrict to these content kinds; `None` means any kind.
    pub kinds: Option<Vec<ContentKind>>,
    /// Visibility tiers the caller may see. Must be non-empty.
    pub visibility: Vec<Visibility>,
    /// Lower bound on creation time.
    pub created_after: Option<DateTime<Utc>>,
    /// Upper bound on result size; `None` falls back to the store default.
    pub limit: Option<u32>,
}

/// The contribution of one study event to a word's analytics row.
///
/// Applied atomically at the store: concurrent deltas for the same
/// (word, language) key must never lose an update.
#[derive(Debug, Clone, Copy)]
pub struct AnalyticsDelta {
    pub level: CefrLevel,
    pub study_type: StudyType,
    pub difficulty: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait DataStore: Send + Sync {
    // ---- Profiles and privacy ----

    async fn get_user_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>>;

    /// Returns the stored settings, creating the default row on first access
    /// (upsert semantics: exactly one active row per user).
    async fn get_privacy_settings(&self, user_id: Uuid) -> Result<PrivacySettings>;

    async fn upsert_privacy_settings(&self, settings: &PrivacySettings) -> Result<()>;

    async fn list_profiles_by_level(&self, level: CefrLevel) -> Result<Vec<Uuid>>;

    async fn list_profiles_by_language(&self, language: &str) -> Result<Vec<Uuid>>;

    // ---- Follow graph ----

    /// Users that `user_id` follows.
    async fn list_following(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    /// Users that follow `user_id`.
    async fn list_followers(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    // ---- Content ----

    async fn query_content(&self, filter: &ContentFilter) -> Result<Vec<ContentItem>>;

    async fn list_interactions(&self, user_id: Uuid) -> Result<InteractionHistory>;

    // ---- Study event log (source of truth) ----

    /// Append-only; a failure here must propagate, never be swallowed.
    async fn append_study_event(&self, event: &WordStudyEvent) -> Result<()>;

    async fn list_study_events(
        &self,
        word: &str,
        language: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WordStudyEvent>>;

    // ---- Word analytics (derived, materialized) ----

    /// Atomically fold one event into the (word, language) row, creating it
    /// when absent, and refresh the trend classification in the same step.
    async fn upsert_word_analytics(
        &self,
        word: &str,
        language: &str,
        delta: &AnalyticsDelta,
        rule: &AnalyticsConfig,
    ) -> Result<()>;

    async fn get_word_analytics(
        &self,
        word: &str,
        language: &str,
    ) -> Result<Option<GlobalWordAnalytics>>;

    /// Words for a language ordered by today's study count, optionally
    /// restricted to words with activity at `level`.
    async fn top_words_by_today(
        &self,
        language: &str,
        level: Option<CefrLevel>,
        limit: u32,
    ) -> Result<Vec<GlobalWordAnalytics>>;

    /// All (word, language) keys with an analytics row.
    async fn list_tracked_words(&self, language: Option<&str>) -> Result<Vec<(String, String)>>;

    /// Zero every `today_count` at a day boundary. Returns rows touched.
    async fn reset_today_counts(&self) -> Result<u64>;

    /// Replace a row's rolling week count with a value recomputed from the
    /// raw event log, refreshing its trend.
    async fn replace_week_count(
        &self,
        word: &str,
        language: &str,
        week_count: i64,
        rule: &AnalyticsConfig,
    ) -> Result<()>;

    /// Overwrite a full analytics row (reconciliation/rebuild path).
    async fn replace_word_analytics(&self, row: &GlobalWordAnalytics) -> Result<()>;

    // ---- Leaderboard counters ----

    async fn get_user_points(&self, user_id: Uuid) -> Result<Option<LeaderboardCounters>>;

    /// Atomic `total_points += points` with level recompute; creates the row
    /// when absent. Returns the updated counters.
    async fn add_points(&self, user_id: Uuid, points: i64) -> Result<LeaderboardCounters>;

    /// Top users ordered by points descending, then user id ascending.
    async fn top_users_by_points(&self, limit: u32) -> Result<Vec<LeaderboardCounters>>;

    async fn count_users_with_points_above(&self, points: i64) -> Result<i64>;

    async fn count_users(&self) -> Result<i64>;
}

/// Trend classification shared by both store implementations and the
/// rebuild path: compares today's activity against the rolling week.
pub fn classify_trend(today: i64, week: i64, rule: &AnalyticsConfig) -> crate::models::Trend {
    use crate::models::Trend;
    let today = today as f64;
    let week = week as f64;
    if today > rule.rising_ratio * week {
        Trend::Increasing
    } else if today < rule.falling_ratio * week {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}
