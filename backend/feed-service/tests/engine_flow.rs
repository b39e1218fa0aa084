//! End-to-end engine tests over the in-memory store: event recording and
//! counter consistency under concurrency, window maintenance, feed assembly
//! with privacy rules, personalization, pagination, and leaderboard ranking.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use feed_service::config::{AnalyticsConfig, ScoringConfig, TrendingConfig};
use feed_service::db::{DataStore, MemoryStore};
use feed_service::jobs::run_sweep;
use feed_service::models::{
    CefrLevel, ContentItem, ContentKind, EngagementCounts, FeedRequest, PrivacySettings,
    StudyType, Trend, UserProfile, Visibility, VisibilityScope,
};
use feed_service::{FeedAssembler, LeaderboardRanker, WordAnalyticsAggregator};

fn profile(user_id: Uuid, level: CefrLevel, language: &str) -> UserProfile {
    UserProfile {
        user_id,
        level,
        target_language: language.to_string(),
    }
}

fn post(author: Uuid, kind: ContentKind, visibility: Visibility, age_hours: i64) -> ContentItem {
    ContentItem {
        id: Uuid::new_v4(),
        author_id: author,
        kind,
        visibility,
        title: "post".to_string(),
        body: "language practice notes".to_string(),
        engagement: EngagementCounts::default(),
        deleted: false,
        created_at: Utc::now() - Duration::hours(age_hours),
    }
}

fn aggregator(store: Arc<MemoryStore>) -> WordAnalyticsAggregator<MemoryStore> {
    WordAnalyticsAggregator::new(store, AnalyticsConfig::default(), TrendingConfig::default())
}

fn assembler(store: Arc<MemoryStore>) -> FeedAssembler<MemoryStore> {
    FeedAssembler::new(
        store,
        None,
        TrendingConfig::default(),
        ScoringConfig::default(),
    )
}

fn feed_request() -> FeedRequest {
    FeedRequest {
        page: 1,
        limit: 20,
        kinds: None,
        level_filter: None,
        language_filter: None,
        include_trending: false,
        personalization_strength: 0.7,
    }
}

#[tokio::test]
async fn concurrent_study_events_lose_no_updates() {
    let store = Arc::new(MemoryStore::new());
    let agg = Arc::new(aggregator(store.clone()));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let agg = agg.clone();
        handles.push(tokio::spawn(async move {
            agg.record(
                Uuid::new_v4(),
                "hola",
                "es",
                CefrLevel::A1,
                StudyType::Conversation,
                None,
                None,
            )
            .await
            .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let row = agg.word_analytics("hola", "es").await.unwrap().unwrap();
    assert_eq!(row.total_count, 2, "lost update under concurrent appends");
    assert_eq!(row.level_breakdown.get(&CefrLevel::A1), Some(&2));
    assert_eq!(store.event_count(), 2);
}

#[tokio::test]
async fn total_count_matches_event_log_after_many_writers() {
    let store = Arc::new(MemoryStore::new());
    let agg = Arc::new(aggregator(store.clone()));

    let mut handles = Vec::new();
    for i in 0..50 {
        let agg = agg.clone();
        let level = if i % 2 == 0 { CefrLevel::A1 } else { CefrLevel::B2 };
        handles.push(tokio::spawn(async move {
            agg.record(
                Uuid::new_v4(),
                "amigo",
                "es",
                level,
                StudyType::Flashcard,
                None,
                None,
            )
            .await
            .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let row = agg.word_analytics("amigo", "es").await.unwrap().unwrap();
    assert_eq!(row.total_count as usize, store.event_count());
    assert_eq!(row.level_breakdown.get(&CefrLevel::A1), Some(&25));
    assert_eq!(row.level_breakdown.get(&CefrLevel::B2), Some(&25));
}

#[tokio::test]
async fn rebuild_from_log_matches_incremental_state() {
    let store = Arc::new(MemoryStore::new());
    let agg = aggregator(store.clone());
    let user = Uuid::new_v4();

    for (word, level) in [("hola", CefrLevel::A1), ("hola", CefrLevel::A2), ("hola", CefrLevel::A1)]
    {
        agg.record(user, word, "es", level, StudyType::Exercise, None, Some(0.4))
            .await
            .unwrap();
    }

    let incremental = agg.word_analytics("hola", "es").await.unwrap().unwrap();
    let rebuilt = agg.rebuild("hola", "es").await.unwrap();

    assert_eq!(rebuilt.total_count, incremental.total_count);
    assert_eq!(rebuilt.level_breakdown, incremental.level_breakdown);
    assert_eq!(rebuilt.study_type_breakdown, incremental.study_type_breakdown);

    // A second rebuild is idempotent.
    let again = agg.rebuild("hola", "es").await.unwrap();
    assert_eq!(again.total_count, rebuilt.total_count);
    assert_eq!(again.level_breakdown, rebuilt.level_breakdown);
}

#[tokio::test]
async fn trend_is_increasing_when_today_dominates_week() {
    let store = Arc::new(MemoryStore::new());
    let agg = aggregator(store.clone());

    // 8 of the word's 10 weekly occurrences happen today: 8 > 0.2 * 10.
    let older = Utc::now() - Duration::days(3);
    for _ in 0..2 {
        let event = feed_service::models::WordStudyEvent {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            word: "hola".to_string(),
            language: "es".to_string(),
            level: CefrLevel::A1,
            study_type: StudyType::Conversation,
            context: None,
            difficulty_score: None,
            created_at: older,
        };
        store.append_study_event(&event).await.unwrap();
    }
    for _ in 0..8 {
        agg.record(
            Uuid::new_v4(),
            "hola",
            "es",
            CefrLevel::A1,
            StudyType::Conversation,
            None,
            None,
        )
        .await
        .unwrap();
    }

    let row = agg.rebuild("hola", "es").await.unwrap();
    assert_eq!(row.week_count, 10);
    assert_eq!(row.today_count, 8);
    assert_eq!(row.trend, Trend::Increasing);

    let trending = agg
        .trending_words("es", Some(CefrLevel::A1), 5)
        .await
        .unwrap();
    assert_eq!(trending[0].content, "hola");
    assert_eq!(trending[0].trend, Some(Trend::Increasing));
}

#[tokio::test]
async fn sweep_zeroes_today_and_preserves_totals() {
    let store = Arc::new(MemoryStore::new());
    let agg = aggregator(store.clone());

    for _ in 0..4 {
        agg.record(
            Uuid::new_v4(),
            "perro",
            "es",
            CefrLevel::B1,
            StudyType::Reading,
            None,
            None,
        )
        .await
        .unwrap();
    }

    let rule = AnalyticsConfig::default();
    let summary = run_sweep(&store, &rule).await.unwrap();
    assert_eq!(summary.words_failed, 0);

    let row = store.get_word_analytics("perro", "es").await.unwrap().unwrap();
    assert_eq!(row.today_count, 0);
    assert_eq!(row.week_count, 4);
    assert_eq!(row.total_count, 4);
}

#[tokio::test]
async fn private_author_is_invisible_to_strangers() {
    let store = Arc::new(MemoryStore::new());
    let viewer = Uuid::new_v4();
    let recluse = Uuid::new_v4();
    store.insert_profile(profile(viewer, CefrLevel::A1, "es"));
    store.insert_profile(profile(recluse, CefrLevel::A1, "es"));
    let mut settings = PrivacySettings::default_for(recluse);
    settings.visibility_scope = VisibilityScope::Friends;
    store.insert_privacy(settings);
    store.insert_content(post(recluse, ContentKind::Achievement, Visibility::Public, 1));

    let feed = assembler(store.clone());
    let response = feed.get_smart_feed(viewer, &feed_request()).await.unwrap();
    assert!(response.items.is_empty());

    // Mutual follow flips visibility on.
    store.follow(viewer, recluse);
    store.follow(recluse, viewer);
    let response = feed.get_smart_feed(viewer, &feed_request()).await.unwrap();
    assert_eq!(response.items.len(), 1);
}

#[tokio::test]
async fn zero_strength_feed_is_pure_recency() {
    let store = Arc::new(MemoryStore::new());
    let viewer = Uuid::new_v4();
    let author = Uuid::new_v4();
    store.insert_profile(profile(viewer, CefrLevel::B1, "es"));
    store.insert_profile(profile(author, CefrLevel::B1, "es"));

    // The tip would jump ahead of newer conversations under personalization.
    store.insert_content(post(author, ContentKind::Conversation, Visibility::Public, 1));
    store.insert_content(post(author, ContentKind::Conversation, Visibility::Public, 2));
    store.insert_content(post(author, ContentKind::LearningTip, Visibility::Public, 3));

    let feed = assembler(store);
    let mut req = feed_request();
    req.personalization_strength = 0.0;
    let response = feed.get_smart_feed(viewer, &req).await.unwrap();

    assert!(!response.personalization_applied);
    let ages: Vec<_> = response
        .items
        .iter()
        .map(|item| item.content.created_at)
        .collect();
    let mut sorted = ages.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(ages, sorted, "zero strength must keep recency order");

    let mut req = feed_request();
    req.personalization_strength = 1.0;
    let response = feed.get_smart_feed(viewer, &req).await.unwrap();
    assert!(response.personalization_applied);
    assert_eq!(response.items[0].content.kind, ContentKind::LearningTip);
}

#[tokio::test]
async fn pagination_partitions_without_gaps_or_overlap() {
    let store = Arc::new(MemoryStore::new());
    let viewer = Uuid::new_v4();
    let author = Uuid::new_v4();
    store.insert_profile(profile(viewer, CefrLevel::C1, "fr"));
    store.insert_profile(profile(author, CefrLevel::C1, "fr"));
    for age in 0..11 {
        store.insert_content(post(author, ContentKind::Milestone, Visibility::Public, age));
    }

    let feed = assembler(store);
    let mut req = feed_request();
    req.limit = 4;

    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut page = 1;
    loop {
        req.page = page;
        let response = feed.get_smart_feed(viewer, &req).await.unwrap();
        for item in &response.items {
            assert!(seen.insert(item.content.id), "item repeated across pages");
        }
        if !response.pagination.has_next {
            assert!(response.items.len() <= 4);
            break;
        }
        assert_eq!(response.items.len(), 4);
        page += 1;
    }
    assert_eq!(seen.len(), 11);
    assert_eq!(page, 3);
}

#[tokio::test]
async fn leaderboard_rank_is_one_plus_users_above() {
    let store = Arc::new(MemoryStore::new());
    let ranker = LeaderboardRanker::new(store.clone());
    let me = Uuid::new_v4();

    ranker.award_points(me, 150).await.unwrap();
    for points in [151, 500, 1000] {
        ranker.award_points(Uuid::new_v4(), points).await.unwrap();
    }
    // Same points as me; not "above", so my rank is unaffected.
    ranker.award_points(Uuid::new_v4(), 150).await.unwrap();

    let response = ranker.leaderboard(me, 10).await.unwrap();
    assert_eq!(response.user_rank, Some(4));
    assert_eq!(response.total_users, 5);

    let tied: Vec<_> = response
        .entries
        .iter()
        .filter(|e| e.total_points == 150)
        .collect();
    assert_eq!(tied.len(), 2);
    assert_eq!(tied[0].rank, tied[1].rank);
}

#[tokio::test]
async fn study_event_survives_normalization_round_trip() {
    let store = Arc::new(MemoryStore::new());
    let agg = aggregator(store.clone());

    let event = agg
        .record(
            Uuid::new_v4(),
            "  GRACIAS  ",
            "ES",
            CefrLevel::A2,
            StudyType::Flashcard,
            Some("said after dinner".to_string()),
            Some(0.3),
        )
        .await
        .unwrap();
    assert_eq!(event.word, "gracias");
    assert_eq!(event.language, "es");

    let stored = store
        .list_study_events("gracias", "es", None)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].context.as_deref(), Some("said after dinner"));
}
