//! Postgres-backed `DataStore`.
//!
//! Counter writes are single-statement upserts (`ON CONFLICT .. DO UPDATE`)
//! so concurrent events for the same word never lose increments. The JSONB
//! breakdown columns are updated inside the same statement via `jsonb_set`,
//! and the trend label is recomputed from the post-increment counters in a
//! `CASE` mirroring `classify_trend`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::config::AnalyticsConfig;
use crate::db::{AnalyticsDelta, ContentFilter, DataStore};
use crate::error::{AppError, Result};
use crate::models::{
    level_for_points, CefrLevel, ContentItem, ContentKind, EngagementCounts, GlobalWordAnalytics,
    InteractionHistory, LeaderboardCounters, PrivacySettings, StudyType, Trend, UserProfile,
    Visibility, WordStudyEvent,
};

const DEFAULT_QUERY_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

type AnalyticsRow = (
    String,         // word
    String,         // language
    i64,            // total_count
    i64,            // today_count
    i64,            // week_count
    Value,          // level_breakdown
    Value,          // study_type_breakdown
    f64,            // avg_difficulty
    i64,            // difficulty_samples
    String,         // trend
    DateTime<Utc>,  // last_updated
);

const ANALYTICS_COLUMNS: &str = "word, language, total_count, today_count, week_count, \
     level_breakdown, study_type_breakdown, avg_difficulty, difficulty_samples, trend, \
     last_updated";

fn parse_breakdown<K: Ord>(value: &Value, parse_key: impl Fn(&str) -> Option<K>) -> Option<BTreeMap<K, i64>> {
    let map = value.as_object()?;
    let mut out = BTreeMap::new();
    for (key, count) in map {
        out.insert(parse_key(key)?, count.as_i64()?);
    }
    Some(out)
}

fn analytics_from_row(row: AnalyticsRow) -> Option<GlobalWordAnalytics> {
    let (
        word,
        language,
        total_count,
        today_count,
        week_count,
        level_json,
        study_json,
        avg_difficulty,
        difficulty_samples,
        trend,
        last_updated,
    ) = row;
    let level_breakdown = parse_breakdown(&level_json, CefrLevel::parse)?;
    let study_type_breakdown = parse_breakdown(&study_json, StudyType::parse)?;
    let trend = Trend::parse(&trend)?;
    Some(GlobalWordAnalytics {
        word,
        language,
        total_count,
        today_count,
        week_count,
        level_breakdown,
        study_type_breakdown,
        avg_difficulty,
        difficulty_samples,
        trend,
        last_updated,
    })
}

type ContentRow = (
    Uuid,
    Uuid,
    String, // kind
    String, // visibility
    String, // title
    String, // body
    i64,    // likes
    i64,    // comments
    i64,    // shares
    bool,   // deleted
    DateTime<Utc>,
);

fn content_from_row(row: ContentRow) -> Option<ContentItem> {
    let (id, author_id, kind, visibility, title, body, likes, comments, shares, deleted, created_at) =
        row;
    Some(ContentItem {
        id,
        author_id,
        kind: ContentKind::parse(&kind)?,
        visibility: Visibility::parse(&visibility)?,
        title,
        body,
        engagement: EngagementCounts {
            likes,
            comments,
            shares,
        },
        deleted,
        created_at,
    })
}

#[async_trait]
impl DataStore for PgStore {
    async fn get_user_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        let row = sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT user_id, level, target_language FROM user_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((user_id, level, target_language)) => {
                let level = CefrLevel::parse(&level).ok_or_else(|| {
                    AppError::Internal(format!("unknown CEFR level '{}' for user {}", level, user_id))
                })?;
                Ok(Some(UserProfile {
                    user_id,
                    level,
                    target_language,
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_privacy_settings(&self, user_id: Uuid) -> Result<PrivacySettings> {
        // Lazily materializes the default row on first access.
        let defaults = PrivacySettings::default_for(user_id);
        let row = sqlx::query_as::<_, (Uuid, String, bool, bool, bool, bool)>(
            r#"
            INSERT INTO privacy_settings (
                user_id, visibility_scope, allow_level_filtering,
                study_group_visible, show_achievements, show_learning_progress
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET user_id = privacy_settings.user_id
            RETURNING user_id, visibility_scope, allow_level_filtering,
                      study_group_visible, show_achievements, show_learning_progress
            "#,
        )
        .bind(user_id)
        .bind(defaults.visibility_scope.as_str())
        .bind(defaults.allow_level_filtering)
        .bind(defaults.study_group_visible)
        .bind(defaults.show_achievements)
        .bind(defaults.show_learning_progress)
        .fetch_one(&self.pool)
        .await?;

        let (user_id, scope, allow_level_filtering, study_group_visible, show_achievements, show_learning_progress) =
            row;
        let visibility_scope = crate::models::VisibilityScope::parse(&scope).ok_or_else(|| {
            AppError::Internal(format!("unknown visibility scope '{}' for user {}", scope, user_id))
        })?;
        Ok(PrivacySettings {
            user_id,
            visibility_scope,
            allow_level_filtering,
            study_group_visible,
            show_achievements,
            show_learning_progress,
        })
    }

    async fn upsert_privacy_settings(&self, settings: &PrivacySettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO privacy_settings (
                user_id, visibility_scope, allow_level_filtering,
                study_group_visible, show_achievements, show_learning_progress
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                visibility_scope = EXCLUDED.visibility_scope,
                allow_level_filtering = EXCLUDED.allow_level_filtering,
                study_group_visible = EXCLUDED.study_group_visible,
                show_achievements = EXCLUDED.show_achievements,
                show_learning_progress = EXCLUDED.show_learning_progress
            "#,
        )
        .bind(settings.user_id)
        .bind(settings.visibility_scope.as_str())
        .bind(settings.allow_level_filtering)
        .bind(settings.study_group_visible)
        .bind(settings.show_achievements)
        .bind(settings.show_learning_progress)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_profiles_by_level(&self, level: CefrLevel) -> Result<Vec<Uuid>> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            "SELECT user_id FROM user_profiles WHERE level = $1",
        )
        .bind(level.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn list_profiles_by_language(&self, language: &str) -> Result<Vec<Uuid>> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            "SELECT user_id FROM user_profiles WHERE target_language = $1",
        )
        .bind(language)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn list_following(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            "SELECT followee_id FROM follows WHERE follower_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn list_followers(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            "SELECT follower_id FROM follows WHERE followee_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn query_content(&self, filter: &ContentFilter) -> Result<Vec<ContentItem>> {
        let kinds: Option<Vec<String>> = filter
            .kinds
            .as_ref()
            .map(|kinds| kinds.iter().map(|k| k.as_str().to_string()).collect());
        let visibility: Vec<String> = filter
            .visibility
            .iter()
            .map(|v| v.as_str().to_string())
            .collect();

        let rows = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT id, author_id, kind, visibility, title, body,
                   likes, comments, shares, deleted, created_at
            FROM content_items
            WHERE deleted = FALSE
              AND ($1::uuid[] IS NULL OR author_id = ANY($1))
              AND ($2::text[] IS NULL OR kind = ANY($2))
              AND visibility = ANY($3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
            ORDER BY created_at DESC, id DESC
            LIMIT $5
            "#,
        )
        .bind(&filter.author_ids)
        .bind(&kinds)
        .bind(&visibility)
        .bind(filter.created_after)
        .bind(filter.limit.map(i64::from).unwrap_or(DEFAULT_QUERY_LIMIT))
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.0;
            match content_from_row(row) {
                Some(item) => items.push(item),
                None => warn!(content_id = %id, "skipping content row with unknown kind or visibility"),
            }
        }
        Ok(items)
    }

    async fn list_interactions(&self, user_id: Uuid) -> Result<InteractionHistory> {
        let liked = sqlx::query_as::<_, (Uuid,)>(
            "SELECT content_id FROM content_likes WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let commented = sqlx::query_as::<_, (Uuid,)>(
            "SELECT DISTINCT content_id FROM content_comments WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(InteractionHistory {
            liked: liked.into_iter().map(|(id,)| id).collect(),
            commented: commented.into_iter().map(|(id,)| id).collect(),
        })
    }

    async fn append_study_event(&self, event: &WordStudyEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO word_study_events (
                id, user_id, word, language, level, study_type,
                context, difficulty_score, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(&event.word)
        .bind(&event.language)
        .bind(event.level.as_str())
        .bind(event.study_type.as_str())
        .bind(&event.context)
        .bind(event.difficulty_score)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_study_events(
        &self,
        word: &str,
        language: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WordStudyEvent>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, String, String, String, Option<String>, Option<f64>, DateTime<Utc>)>(
            r#"
            SELECT id, user_id, word, language, level, study_type,
                   context, difficulty_score, created_at
            FROM word_study_events
            WHERE word = $1 AND language = $2
              AND ($3::timestamptz IS NULL OR created_at >= $3)
            ORDER BY created_at ASC
            "#,
        )
        .bind(word)
        .bind(language)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for (id, user_id, word, language, level, study_type, context, difficulty_score, created_at) in rows {
            let level = CefrLevel::parse(&level).ok_or_else(|| {
                AppError::Internal(format!("unknown CEFR level '{}' in event {}", level, id))
            })?;
            let study_type = StudyType::parse(&study_type).ok_or_else(|| {
                AppError::Internal(format!("unknown study type '{}' in event {}", study_type, id))
            })?;
            events.push(WordStudyEvent {
                id,
                user_id,
                word,
                language,
                level,
                study_type,
                context,
                difficulty_score,
                created_at,
            });
        }
        Ok(events)
    }

    async fn upsert_word_analytics(
        &self,
        word: &str,
        language: &str,
        delta: &AnalyticsDelta,
        rule: &AnalyticsConfig,
    ) -> Result<()> {
        // A freshly inserted row starts stable; only the increment branch
        // reclassifies, from the post-increment counters.
        sqlx::query(
            r#"
            INSERT INTO word_analytics (
                word, language, total_count, today_count, week_count,
                level_breakdown, study_type_breakdown,
                avg_difficulty, difficulty_samples, trend, last_updated
            ) VALUES (
                $1, $2, 1, 1, 1,
                jsonb_build_object($3::text, 1),
                jsonb_build_object($4::text, 1),
                COALESCE($5, 0),
                CASE WHEN $5::float8 IS NULL THEN 0 ELSE 1 END,
                'stable', $6
            )
            ON CONFLICT (word, language) DO UPDATE SET
                total_count = word_analytics.total_count + 1,
                today_count = word_analytics.today_count + 1,
                week_count = word_analytics.week_count + 1,
                level_breakdown = jsonb_set(
                    word_analytics.level_breakdown,
                    ARRAY[$3::text],
                    to_jsonb(COALESCE((word_analytics.level_breakdown ->> $3)::bigint, 0) + 1)
                ),
                study_type_breakdown = jsonb_set(
                    word_analytics.study_type_breakdown,
                    ARRAY[$4::text],
                    to_jsonb(COALESCE((word_analytics.study_type_breakdown ->> $4)::bigint, 0) + 1)
                ),
                avg_difficulty = CASE
                    WHEN $5::float8 IS NULL THEN word_analytics.avg_difficulty
                    ELSE (word_analytics.avg_difficulty * word_analytics.difficulty_samples + $5)
                         / (word_analytics.difficulty_samples + 1)
                END,
                difficulty_samples = word_analytics.difficulty_samples
                    + CASE WHEN $5::float8 IS NULL THEN 0 ELSE 1 END,
                trend = CASE
                    WHEN (word_analytics.today_count + 1)::float8
                         > $7 * (word_analytics.week_count + 1)::float8 THEN 'increasing'
                    WHEN (word_analytics.today_count + 1)::float8
                         < $8 * (word_analytics.week_count + 1)::float8 THEN 'decreasing'
                    ELSE 'stable'
                END,
                last_updated = $6
            "#,
        )
        .bind(word)
        .bind(language)
        .bind(delta.level.as_str())
        .bind(delta.study_type.as_str())
        .bind(delta.difficulty)
        .bind(delta.occurred_at)
        .bind(rule.rising_ratio)
        .bind(rule.falling_ratio)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_word_analytics(
        &self,
        word: &str,
        language: &str,
    ) -> Result<Option<GlobalWordAnalytics>> {
        let row = sqlx::query_as::<_, AnalyticsRow>(&format!(
            "SELECT {} FROM word_analytics WHERE word = $1 AND language = $2",
            ANALYTICS_COLUMNS
        ))
        .bind(word)
        .bind(language)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => match analytics_from_row(row) {
                Some(analytics) => Ok(Some(analytics)),
                None => {
                    // Treat an unparseable row as missing; the next event or
                    // rebuild rewrites it.
                    warn!(word, language, "discarding corrupt analytics row");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn top_words_by_today(
        &self,
        language: &str,
        level: Option<CefrLevel>,
        limit: u32,
    ) -> Result<Vec<GlobalWordAnalytics>> {
        let rows = sqlx::query_as::<_, AnalyticsRow>(&format!(
            r#"
            SELECT {}
            FROM word_analytics
            WHERE language = $1
              AND ($2::text IS NULL OR COALESCE((level_breakdown ->> $2)::bigint, 0) > 0)
            ORDER BY today_count DESC, word ASC
            LIMIT $3
            "#,
            ANALYTICS_COLUMNS
        ))
        .bind(language)
        .bind(level.map(|l| l.as_str()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let word = row.0.clone();
            match analytics_from_row(row) {
                Some(analytics) => out.push(analytics),
                None => warn!(word, language, "skipping corrupt analytics row"),
            }
        }
        Ok(out)
    }

    async fn list_tracked_words(&self, language: Option<&str>) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT word, language FROM word_analytics WHERE $1::text IS NULL OR language = $1",
        )
        .bind(language)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn reset_today_counts(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE word_analytics SET
                today_count = 0,
                trend = CASE WHEN week_count > 0 THEN 'decreasing' ELSE 'stable' END
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn replace_week_count(
        &self,
        word: &str,
        language: &str,
        week_count: i64,
        rule: &AnalyticsConfig,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE word_analytics SET
                week_count = $3,
                trend = CASE
                    WHEN today_count::float8 > $4 * $3::float8 THEN 'increasing'
                    WHEN today_count::float8 < $5 * $3::float8 THEN 'decreasing'
                    ELSE 'stable'
                END
            WHERE word = $1 AND language = $2
            "#,
        )
        .bind(word)
        .bind(language)
        .bind(week_count)
        .bind(rule.rising_ratio)
        .bind(rule.falling_ratio)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_word_analytics(&self, row: &GlobalWordAnalytics) -> Result<()> {
        let level_breakdown: BTreeMap<&str, i64> = row
            .level_breakdown
            .iter()
            .map(|(level, count)| (level.as_str(), *count))
            .collect();
        let study_type_breakdown: BTreeMap<&str, i64> = row
            .study_type_breakdown
            .iter()
            .map(|(ty, count)| (ty.as_str(), *count))
            .collect();

        sqlx::query(
            r#"
            INSERT INTO word_analytics (
                word, language, total_count, today_count, week_count,
                level_breakdown, study_type_breakdown,
                avg_difficulty, difficulty_samples, trend, last_updated
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (word, language) DO UPDATE SET
                total_count = EXCLUDED.total_count,
                today_count = EXCLUDED.today_count,
                week_count = EXCLUDED.week_count,
                level_breakdown = EXCLUDED.level_breakdown,
                study_type_breakdown = EXCLUDED.study_type_breakdown,
                avg_difficulty = EXCLUDED.avg_difficulty,
                difficulty_samples = EXCLUDED.difficulty_samples,
                trend = EXCLUDED.trend,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(&row.word)
        .bind(&row.language)
        .bind(row.total_count)
        .bind(row.today_count)
        .bind(row.week_count)
        .bind(serde_json::to_value(level_breakdown).map_err(|e| AppError::Internal(e.to_string()))?)
        .bind(
            serde_json::to_value(study_type_breakdown)
                .map_err(|e| AppError::Internal(e.to_string()))?,
        )
        .bind(row.avg_difficulty)
        .bind(row.difficulty_samples)
        .bind(row.trend.as_str())
        .bind(row.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user_points(&self, user_id: Uuid) -> Result<Option<LeaderboardCounters>> {
        let row = sqlx::query_as::<_, (Uuid, i64, i32, Vec<String>)>(
            "SELECT user_id, total_points, level, badges FROM leaderboard WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_id, total_points, level, badges)| LeaderboardCounters {
            user_id,
            total_points,
            level,
            badges,
        }))
    }

    async fn add_points(&self, user_id: Uuid, points: i64) -> Result<LeaderboardCounters> {
        let (total_points, badges) = sqlx::query_as::<_, (i64, Vec<String>)>(
            r#"
            INSERT INTO leaderboard (user_id, total_points, level, badges)
            VALUES ($1, $2, 1, '{}')
            ON CONFLICT (user_id) DO UPDATE SET
                total_points = leaderboard.total_points + $2
            RETURNING total_points, badges
            "#,
        )
        .bind(user_id)
        .bind(points)
        .fetch_one(&self.pool)
        .await?;

        // Level is derived from the new total; a concurrent award recomputes
        // it from an equal-or-larger total, so the stored level never lags.
        let level = level_for_points(total_points);
        sqlx::query("UPDATE leaderboard SET level = $2 WHERE user_id = $1 AND level < $2")
            .bind(user_id)
            .bind(level)
            .execute(&self.pool)
            .await?;

        Ok(LeaderboardCounters {
            user_id,
            total_points,
            level,
            badges,
        })
    }

    async fn top_users_by_points(&self, limit: u32) -> Result<Vec<LeaderboardCounters>> {
        let rows = sqlx::query_as::<_, (Uuid, i64, i32, Vec<String>)>(
            r#"
            SELECT user_id, total_points, level, badges
            FROM leaderboard
            ORDER BY total_points DESC, user_id ASC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, total_points, level, badges)| LeaderboardCounters {
                user_id,
                total_points,
                level,
                badges,
            })
            .collect())
    }

    async fn count_users_with_points_above(&self, points: i64) -> Result<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM leaderboard WHERE total_points > $1",
        )
        .bind(points)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_users(&self) -> Result<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM leaderboard")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
