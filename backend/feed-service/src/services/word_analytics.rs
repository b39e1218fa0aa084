//! Keeps per-word global counters consistent with the study-event stream.
//!
//! The append-only event log is authoritative. Counter maintenance is
//! best-effort derived state: an analytics failure never fails the event
//! write, and `rebuild` reconstructs a row from the log when the incremental
//! state is lost or corrupt.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::config::{AnalyticsConfig, TrendingConfig};
use crate::db::{classify_trend, AnalyticsDelta, DataStore};
use crate::error::{AppError, Result};
use crate::models::{
    normalize_word, CefrLevel, GlobalWordAnalytics, StudyType, Trend, TrendingContent,
    TrendingKind, WordStudyEvent,
};

pub struct WordAnalyticsAggregator<S: DataStore + ?Sized> {
    store: Arc<S>,
    rule: AnalyticsConfig,
    trending: TrendingConfig,
}

impl<S: DataStore + ?Sized> WordAnalyticsAggregator<S> {
    pub fn new(store: Arc<S>, rule: AnalyticsConfig, trending: TrendingConfig) -> Self {
        Self {
            store,
            rule,
            trending,
        }
    }

    /// Records one study event and updates the derived counters.
    ///
    /// The event append is the write that matters; its errors propagate. The
    /// counter upsert only logs on failure, since the row is reconstructible.
    pub async fn record(
        &self,
        user_id: Uuid,
        word: &str,
        language: &str,
        level: CefrLevel,
        study_type: StudyType,
        context: Option<String>,
        difficulty_score: Option<f64>,
    ) -> Result<WordStudyEvent> {
        let word = normalize_word(word);
        if word.is_empty() {
            return Err(AppError::Validation("word must not be empty".to_string()));
        }
        let language = language.trim().to_lowercase();
        if language.is_empty() {
            return Err(AppError::Validation(
                "language must not be empty".to_string(),
            ));
        }
        if let Some(difficulty) = difficulty_score {
            if !(0.0..=1.0).contains(&difficulty) {
                return Err(AppError::Validation(format!(
                    "difficulty score {} outside [0, 1]",
                    difficulty
                )));
            }
        }

        let event = WordStudyEvent {
            id: Uuid::new_v4(),
            user_id,
            word,
            language,
            level,
            study_type,
            context,
            difficulty_score,
            created_at: Utc::now(),
        };
        self.store.append_study_event(&event).await?;

        let delta = AnalyticsDelta {
            level: event.level,
            study_type: event.study_type,
            difficulty: event.difficulty_score,
            occurred_at: event.created_at,
        };
        if let Err(err) = self
            .store
            .upsert_word_analytics(&event.word, &event.language, &delta, &self.rule)
            .await
        {
            warn!(
                word = %event.word,
                language = %event.language,
                error = %err,
                "analytics update failed; event log remains authoritative"
            );
        }

        Ok(event)
    }

    pub async fn word_analytics(
        &self,
        word: &str,
        language: &str,
    ) -> Result<Option<GlobalWordAnalytics>> {
        self.store
            .get_word_analytics(&normalize_word(word), &language.trim().to_lowercase())
            .await
    }

    /// Most-studied words today for a language, optionally narrowed to words
    /// with activity at a given level.
    pub async fn trending_words(
        &self,
        language: &str,
        level: Option<CefrLevel>,
        limit: u32,
    ) -> Result<Vec<TrendingContent>> {
        let rows = self
            .store
            .top_words_by_today(&language.trim().to_lowercase(), level, limit)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| TrendingContent {
                kind: TrendingKind::Word,
                content: row.word,
                language: row.language,
                level,
                popularity_score: (row.today_count as f64 / self.trending.word_norm).min(1.0),
                usage_count: row.today_count,
                trend: Some(row.trend),
                last_updated: row.last_updated,
            })
            .collect())
    }

    /// Reconstructs the counters row for a word from the full event log and
    /// writes it back, replacing whatever incremental state was there.
    pub async fn rebuild(&self, word: &str, language: &str) -> Result<GlobalWordAnalytics> {
        let word = normalize_word(word);
        let language = language.trim().to_lowercase();
        let events = self.store.list_study_events(&word, &language, None).await?;
        let row = fold_events(&word, &language, &events, &self.rule, Utc::now());
        self.store.replace_word_analytics(&row).await?;
        Ok(row)
    }
}

/// Folds an event log into a counters row. Order-independent: any permutation
/// of the same events produces the same row.
pub fn fold_events(
    word: &str,
    language: &str,
    events: &[WordStudyEvent],
    rule: &AnalyticsConfig,
    now: DateTime<Utc>,
) -> GlobalWordAnalytics {
    let today = now.date_naive();
    let week_start = now - chrono::Duration::days(7);

    let mut total_count = 0i64;
    let mut today_count = 0i64;
    let mut week_count = 0i64;
    let mut level_breakdown: BTreeMap<CefrLevel, i64> = BTreeMap::new();
    let mut study_type_breakdown: BTreeMap<StudyType, i64> = BTreeMap::new();
    let mut difficulty_sum = 0.0f64;
    let mut difficulty_samples = 0i64;
    let mut last_event: Option<DateTime<Utc>> = None;

    for event in events {
        total_count += 1;
        if event.created_at.date_naive() == today {
            today_count += 1;
        }
        if event.created_at >= week_start {
            week_count += 1;
        }
        *level_breakdown.entry(event.level).or_insert(0) += 1;
        *study_type_breakdown.entry(event.study_type).or_insert(0) += 1;
        if let Some(difficulty) = event.difficulty_score {
            difficulty_sum += difficulty;
            difficulty_samples += 1;
        }
        last_event = Some(last_event.map_or(event.created_at, |t| t.max(event.created_at)));
    }

    let trend = if total_count == 0 {
        Trend::Stable
    } else {
        classify_trend(today_count, week_count, rule)
    };

    GlobalWordAnalytics {
        word: word.to_string(),
        language: language.to_string(),
        total_count,
        today_count,
        week_count,
        level_breakdown,
        study_type_breakdown,
        avg_difficulty: if difficulty_samples > 0 {
            difficulty_sum / difficulty_samples as f64
        } else {
            0.0
        },
        difficulty_samples,
        trend,
        last_updated: last_event.unwrap_or(now),
    }
}
