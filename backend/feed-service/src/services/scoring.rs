//! Personalized relevance scoring for feed items.
//!
//! Score = base(1.0) + kind boost (tips and achievements) + recency boost
//! (under a day, under a week), multiplied by the caller's personalization
//! strength. Items sort descending by final score with a stable sort, so
//! equal scores keep recency order.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::ScoringConfig;
use crate::models::{ContentItem, ContentKind};

/// Relevance of one item at `now`, before the strength multiplier.
pub fn relevance_score(item: &ContentItem, now: DateTime<Utc>, cfg: &ScoringConfig) -> f64 {
    let mut score = 1.0;

    if matches!(item.kind, ContentKind::LearningTip | ContentKind::Achievement) {
        score += cfg.kind_boost;
    }

    let age = now - item.created_at;
    if age < chrono::Duration::days(1) {
        score += cfg.day_boost;
    } else if age < chrono::Duration::days(7) {
        score += cfg.week_boost;
    }

    score
}

/// Reorders `items` in place by descending personalized score.
///
/// `strength <= 0` is an explicit no-op: the incoming recency order is kept
/// untouched rather than sorting on a uniformly zero score.
pub fn apply_personalization(
    items: &mut [ContentItem],
    strength: f64,
    now: DateTime<Utc>,
    cfg: &ScoringConfig,
) -> bool {
    if strength <= 0.0 {
        return false;
    }

    let mut scored: Vec<(usize, f64)> = items
        .iter()
        .enumerate()
        .map(|(idx, item)| (idx, relevance_score(item, now, cfg) * strength))
        .collect();
    // Stable sort; ties keep original positions and therefore recency order.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let reordered: Vec<ContentItem> = scored
        .iter()
        .map(|(idx, _)| items[*idx].clone())
        .collect();
    items.clone_from_slice(&reordered);

    debug!(count = items.len(), strength, "personalized ranking applied");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EngagementCounts, Visibility};
    use uuid::Uuid;

    fn item(kind: ContentKind, age_hours: i64, now: DateTime<Utc>) -> ContentItem {
        ContentItem {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            kind,
            visibility: Visibility::Public,
            title: String::new(),
            body: String::new(),
            engagement: EngagementCounts::default(),
            deleted: false,
            created_at: now - chrono::Duration::hours(age_hours),
        }
    }

    #[test]
    fn test_kind_and_recency_boosts() {
        let cfg = ScoringConfig::default();
        let now = Utc::now();
        let fresh_tip = item(ContentKind::LearningTip, 2, now);
        let old_conversation = item(ContentKind::Conversation, 24 * 30, now);
        let midweek_streak = item(ContentKind::Streak, 24 * 3, now);

        assert!((relevance_score(&fresh_tip, now, &cfg) - 1.5).abs() < 1e-9);
        assert!((relevance_score(&old_conversation, now, &cfg) - 1.0).abs() < 1e-9);
        assert!((relevance_score(&midweek_streak, now, &cfg) - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_zero_strength_keeps_recency_order() {
        let cfg = ScoringConfig::default();
        let now = Utc::now();
        // Recency order, but the old tip would outscore the fresh conversation
        // only through the kind boost under a nonzero strength.
        let mut items = vec![
            item(ContentKind::Conversation, 1, now),
            item(ContentKind::Conversation, 48, now),
            item(ContentKind::LearningTip, 72, now),
        ];
        let original: Vec<Uuid> = items.iter().map(|i| i.id).collect();

        let applied = apply_personalization(&mut items, 0.0, now, &cfg);
        assert!(!applied);
        let after: Vec<Uuid> = items.iter().map(|i| i.id).collect();
        assert_eq!(original, after);
    }

    #[test]
    fn test_personalized_order_prefers_boosted_items() {
        let cfg = ScoringConfig::default();
        let now = Utc::now();
        let fresh_tip = item(ContentKind::LearningTip, 1, now);
        let fresh_conversation = item(ContentKind::Conversation, 2, now);
        let tip_id = fresh_tip.id;

        let mut items = vec![fresh_conversation, fresh_tip];
        let applied = apply_personalization(&mut items, 0.7, now, &cfg);
        assert!(applied);
        assert_eq!(items[0].id, tip_id);
    }

    #[test]
    fn test_ties_are_stable() {
        let cfg = ScoringConfig::default();
        let now = Utc::now();
        let first = item(ContentKind::Conversation, 1, now);
        let second = item(ContentKind::Conversation, 2, now);
        let ids = (first.id, second.id);

        let mut items = vec![first, second];
        apply_personalization(&mut items, 1.0, now, &cfg);
        assert_eq!(items[0].id, ids.0);
        assert_eq!(items[1].id, ids.1);
    }
}
