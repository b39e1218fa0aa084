//! Smart feed assembly: audience resolution, candidate fetch, filtering,
//! personalized ranking, pagination, and supplementary trending content.
//!
//! Read-path degradation: trending and recommendation sub-queries that fail
//! shrink the response instead of failing it; only the base feed query and
//! parameter validation can error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ScoringConfig, TrendingConfig};
use crate::db::{ContentFilter, DataStore};
use crate::error::{AppError, Result};
use crate::models::{
    CefrLevel, ContentItem, ContentKind, ContentRecommendation, FeedItem, FeedRequest,
    FeedResponse, Pagination, TrendingContent, UserProfile,
};
use crate::services::audience::AudienceSelector;
use crate::services::scoring::apply_personalization;
use crate::services::trending::TrendingExtractor;

const RECOMMENDATION_LIMIT: usize = 3;
const DEFAULT_FEED_LANGUAGE: &str = "en";

pub struct FeedAssembler<S: DataStore + ?Sized> {
    store: Arc<S>,
    audience: AudienceSelector<S>,
    trending: TrendingExtractor<S>,
    scoring: ScoringConfig,
}

impl<S: DataStore + ?Sized> FeedAssembler<S> {
    pub fn new(
        store: Arc<S>,
        redis: Option<redis::aio::ConnectionManager>,
        trending_cfg: TrendingConfig,
        scoring: ScoringConfig,
    ) -> Self {
        Self {
            store: store.clone(),
            audience: AudienceSelector::new(store.clone()),
            trending: TrendingExtractor::new(store, redis, trending_cfg),
            scoring,
        }
    }

    pub async fn get_smart_feed(&self, user_id: Uuid, req: &FeedRequest) -> Result<FeedResponse> {
        if req.page < 1 {
            return Err(AppError::Validation("page must be >= 1".to_string()));
        }
        if req.limit < 1 {
            return Err(AppError::Validation("limit must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&req.personalization_strength) {
            return Err(AppError::Validation(
                "personalizationStrength must be in [0, 1]".to_string(),
            ));
        }

        let viewer_profile = self.store.get_user_profile(user_id).await?;
        let audience = self.audience.select(user_id).await?;

        let mut items = self
            .store
            .query_content(&ContentFilter {
                author_ids: Some(audience.author_ids()),
                kinds: req.kinds.clone(),
                visibility: audience.tier_union(),
                created_after: None,
                limit: None,
            })
            .await?;
        // Per-author narrowing; the query filter was the tier union.
        items.retain(|item| audience.allows(item.author_id, item.visibility));

        if req.level_filter.is_some() || req.language_filter.is_some() {
            let profiles = self.author_profiles(&items).await;
            items.retain(|item| {
                let Some(profile) = profiles.get(&item.author_id) else {
                    return false;
                };
                let level_ok = req.level_filter.map_or(true, |l| profile.level == l);
                let language_ok = req
                    .language_filter
                    .as_deref()
                    .map_or(true, |lang| profile.target_language == lang);
                level_ok && language_ok
            });
        }

        let now = Utc::now();
        let personalization_applied =
            apply_personalization(&mut items, req.personalization_strength, now, &self.scoring);

        let total_items = items.len();
        let pagination = Pagination::compute(total_items, req.page, req.limit);
        let offset = pagination.offset();
        let page_items: Vec<ContentItem> = items
            .into_iter()
            .skip(offset)
            .take(req.limit as usize)
            .collect();

        // Decoration only; a failed lookup leaves everything unliked.
        let liked: HashSet<Uuid> = match self.store.list_interactions(user_id).await {
            Ok(history) => history.liked,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "interaction lookup failed");
                HashSet::new()
            }
        };
        let feed_items: Vec<FeedItem> = page_items
            .into_iter()
            .map(|content| FeedItem {
                is_liked: liked.contains(&content.id),
                content,
            })
            .collect();

        let language = req
            .language_filter
            .clone()
            .or_else(|| viewer_profile.as_ref().map(|p| p.target_language.clone()))
            .unwrap_or_else(|| DEFAULT_FEED_LANGUAGE.to_string());

        let trending = if req.include_trending {
            match self.trending.extract(&language).await {
                Ok(trending) => trending,
                Err(err) => {
                    warn!(language, error = %err, "trending extraction failed; returning base feed");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let recommendations = build_recommendations(viewer_profile.as_ref(), &trending);
        debug!(
            user_id = %user_id,
            total_items,
            page = req.page,
            personalization_applied,
            "feed assembled"
        );

        Ok(FeedResponse {
            items: feed_items,
            recommendations,
            trending,
            pagination,
            personalization_applied,
        })
    }

    async fn author_profiles(&self, items: &[ContentItem]) -> HashMap<Uuid, UserProfile> {
        let authors: HashSet<Uuid> = items.iter().map(|item| item.author_id).collect();
        let mut profiles = HashMap::with_capacity(authors.len());
        for author in authors {
            match self.store.get_user_profile(author).await {
                Ok(Some(profile)) => {
                    profiles.insert(author, profile);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(author = %author, error = %err, "author profile lookup failed");
                }
            }
        }
        profiles
    }
}

/// Supplementary cards shown alongside the feed: a study tip for beginners
/// plus practice prompts for the top trending words.
fn build_recommendations(
    viewer: Option<&UserProfile>,
    trending: &[TrendingContent],
) -> Vec<ContentRecommendation> {
    let mut recommendations = Vec::new();

    if let Some(profile) = viewer {
        if matches!(profile.level, CefrLevel::A1 | CefrLevel::A2) {
            recommendations.push(ContentRecommendation {
                content_id: "tip-beginner-daily-practice".to_string(),
                kind: ContentKind::LearningTip,
                title: "Build a daily habit".to_string(),
                body: "Short daily sessions beat long weekly ones. Review a few words every day."
                    .to_string(),
                relevance_score: 0.9,
                reason: "Recommended for beginner learners".to_string(),
                trending_score: None,
            });
        }
    }

    for word in trending
        .iter()
        .filter(|t| t.kind == crate::models::TrendingKind::Word)
        .take(RECOMMENDATION_LIMIT)
    {
        recommendations.push(ContentRecommendation {
            content_id: format!("trending-word-{}", word.content),
            kind: ContentKind::Challenge,
            title: format!("Practice \"{}\"", word.content),
            body: format!(
                "\"{}\" is trending among {} learners right now. Try it in a sentence.",
                word.content, word.language
            ),
            relevance_score: word.popularity_score,
            reason: "Trending in your language".to_string(),
            trending_score: Some(word.popularity_score),
        });
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{EngagementCounts, TrendingKind, Visibility};

    fn assembler(store: Arc<MemoryStore>) -> FeedAssembler<MemoryStore> {
        FeedAssembler::new(
            store,
            None,
            TrendingConfig::default(),
            ScoringConfig::default(),
        )
    }

    fn profile(user_id: Uuid, level: CefrLevel, language: &str) -> UserProfile {
        UserProfile {
            user_id,
            level,
            target_language: language.to_string(),
        }
    }

    fn post(author: Uuid, visibility: Visibility, age_hours: i64) -> ContentItem {
        ContentItem {
            id: Uuid::new_v4(),
            author_id: author,
            kind: ContentKind::Conversation,
            visibility,
            title: "practice".to_string(),
            body: "daily conversation practice".to_string(),
            engagement: EngagementCounts::default(),
            deleted: false,
            created_at: Utc::now() - chrono::Duration::hours(age_hours),
        }
    }

    fn request() -> FeedRequest {
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
    async fn test_rejects_invalid_pagination() {
        let store = Arc::new(MemoryStore::new());
        let feed = assembler(store);
        let mut req = request();
        req.limit = 0;
        let err = feed.get_smart_feed(Uuid::new_v4(), &req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_user_gets_empty_feed_not_error() {
        let store = Arc::new(MemoryStore::new());
        let feed = assembler(store);
        let response = feed
            .get_smart_feed(Uuid::new_v4(), &request())
            .await
            .unwrap();
        assert!(response.items.is_empty());
        assert!(!response.pagination.has_next);
    }

    #[tokio::test]
    async fn test_private_content_of_others_never_appears() {
        let store = Arc::new(MemoryStore::new());
        let viewer = Uuid::new_v4();
        let author = Uuid::new_v4();
        store.insert_profile(profile(viewer, CefrLevel::A1, "es"));
        store.insert_profile(profile(author, CefrLevel::A1, "es"));
        store.insert_content(post(author, Visibility::Private, 1));
        store.insert_content(post(author, Visibility::Public, 2));

        let feed = assembler(store);
        let response = feed.get_smart_feed(viewer, &request()).await.unwrap();
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].content.visibility, Visibility::Public);
    }

    #[tokio::test]
    async fn test_pagination_pages_partition_the_result() {
        let store = Arc::new(MemoryStore::new());
        let viewer = Uuid::new_v4();
        let author = Uuid::new_v4();
        store.insert_profile(profile(viewer, CefrLevel::B1, "es"));
        store.insert_profile(profile(author, CefrLevel::B1, "es"));
        for age in 0..7 {
            store.insert_content(post(author, Visibility::Public, age));
        }

        let feed = assembler(store);
        let mut req = request();
        req.limit = 3;
        req.personalization_strength = 0.0;

        let mut seen = HashSet::new();
        let mut page = 1;
        loop {
            req.page = page;
            let response = feed.get_smart_feed(viewer, &req).await.unwrap();
            for item in &response.items {
                assert!(seen.insert(item.content.id), "duplicate across pages");
            }
            if !response.pagination.has_next {
                assert_eq!(page, response.pagination.total_pages.max(1));
                break;
            }
            page += 1;
        }
        assert_eq!(seen.len(), 7);
    }

    #[tokio::test]
    async fn test_page_past_end_is_empty_not_error() {
        let store = Arc::new(MemoryStore::new());
        let viewer = Uuid::new_v4();
        store.insert_profile(profile(viewer, CefrLevel::A1, "es"));
        store.insert_content(post(viewer, Visibility::Public, 1));

        let feed = assembler(store);
        let mut req = request();
        req.page = 99;
        let response = feed.get_smart_feed(viewer, &req).await.unwrap();
        assert!(response.items.is_empty());
        assert!(!response.pagination.has_next);
    }

    #[tokio::test]
    async fn test_is_liked_reflects_interactions() {
        let store = Arc::new(MemoryStore::new());
        let viewer = Uuid::new_v4();
        let author = Uuid::new_v4();
        store.insert_profile(profile(viewer, CefrLevel::A2, "es"));
        store.insert_profile(profile(author, CefrLevel::A2, "es"));
        let liked_post = post(author, Visibility::Public, 1);
        let liked_id = liked_post.id;
        store.insert_content(liked_post);
        store.insert_content(post(author, Visibility::Public, 2));
        store.like(viewer, liked_id);

        let feed = assembler(store);
        let response = feed.get_smart_feed(viewer, &request()).await.unwrap();
        for item in &response.items {
            assert_eq!(item.is_liked, item.content.id == liked_id);
        }
    }

    #[tokio::test]
    async fn test_beginner_gets_tip_recommendation() {
        let store = Arc::new(MemoryStore::new());
        let viewer = Uuid::new_v4();
        store.insert_profile(profile(viewer, CefrLevel::A1, "es"));

        let feed = assembler(store);
        let response = feed.get_smart_feed(viewer, &request()).await.unwrap();
        assert!(response
            .recommendations
            .iter()
            .any(|r| r.kind == ContentKind::LearningTip));
    }

    #[tokio::test]
    async fn test_trending_words_become_recommendations() {
        let store = Arc::new(MemoryStore::new());
        let viewer = Uuid::new_v4();
        let author = Uuid::new_v4();
        store.insert_profile(profile(viewer, CefrLevel::B2, "es"));
        store.insert_profile(profile(author, CefrLevel::B2, "es"));
        let mut item = post(author, Visibility::Public, 1);
        item.body = "vocabulario vocabulario vocabulario".to_string();
        store.insert_content(item);

        let feed = assembler(store);
        let mut req = request();
        req.include_trending = true;
        let response = feed.get_smart_feed(viewer, &req).await.unwrap();
        assert!(response
            .trending
            .iter()
            .any(|t| t.kind == TrendingKind::Word && t.content == "vocabulario"));
        assert!(response
            .recommendations
            .iter()
            .any(|r| r.content_id == "trending-word-vocabulario"));
    }
}
