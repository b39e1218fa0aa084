use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// CEFR proficiency level used to group learners and content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CefrLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl CefrLevel {
    pub const ALL: [CefrLevel; 6] = [
        Self::A1,
        Self::A2,
        Self::B1,
        Self::B2,
        Self::C1,
        Self::C2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::B1 => "B1",
            Self::B2 => "B2",
            Self::C1 => "C1",
            Self::C2 => "C2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|l| l.as_str() == s)
    }
}

impl std::fmt::Display for CefrLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of content item in the learner feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Achievement,
    LevelUp,
    Streak,
    Conversation,
    LearningTip,
    Milestone,
    Challenge,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Achievement => "achievement",
            Self::LevelUp => "level_up",
            Self::Streak => "streak",
            Self::Conversation => "conversation",
            Self::LearningTip => "learning_tip",
            Self::Milestone => "milestone",
            Self::Challenge => "challenge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "achievement" => Some(Self::Achievement),
            "level_up" => Some(Self::LevelUp),
            "streak" => Some(Self::Streak),
            "conversation" => Some(Self::Conversation),
            "learning_tip" => Some(Self::LearningTip),
            "milestone" => Some(Self::Milestone),
            "challenge" => Some(Self::Challenge),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Visibility tier of a single content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    LevelRestricted,
    StudyGroup,
    Friends,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::LevelRestricted => "level_restricted",
            Self::StudyGroup => "study_group",
            Self::Friends => "friends",
            Self::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "level_restricted" => Some(Self::LevelRestricted),
            "study_group" => Some(Self::StudyGroup),
            "friends" => Some(Self::Friends),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who is allowed to see a user's content at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisibilityScope {
    #[serde(rename = "all")]
    All,
    #[serde(rename = "same")]
    SameLevel,
    #[serde(rename = "friends")]
    Friends,
}

impl VisibilityScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::SameLevel => "same",
            Self::Friends => "friends",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "same" => Some(Self::SameLevel),
            "friends" => Some(Self::Friends),
            _ => None,
        }
    }
}

/// How a word was studied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyType {
    Conversation,
    Flashcard,
    Exercise,
    Reading,
}

impl StudyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Flashcard => "flashcard",
            Self::Exercise => "exercise",
            Self::Reading => "reading",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(Self::Conversation),
            "flashcard" => Some(Self::Flashcard),
            "exercise" => Some(Self::Exercise),
            "reading" => Some(Self::Reading),
            _ => None,
        }
    }
}

impl std::fmt::Display for StudyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Popularity trend for a word, derived from today's count vs. the rolling week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Stable,
    Decreasing,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increasing => "increasing",
            Self::Stable => "stable",
            Self::Decreasing => "decreasing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "increasing" => Some(Self::Increasing),
            "stable" => Some(Self::Stable),
            "decreasing" => Some(Self::Decreasing),
            _ => None,
        }
    }
}

/// Denormalized engagement counters carried on each content item.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementCounts {
    pub likes: i64,
    pub comments: i64,
    pub shares: i64,
}

/// A single feed item. Immutable except engagement counts and the
/// soft-delete flag; never physically removed by this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: Uuid,
    pub author_id: Uuid,
    pub kind: ContentKind,
    pub visibility: Visibility,
    pub title: String,
    pub body: String,
    pub engagement: EngagementCounts,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Read-only projection of a user's learning profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: Uuid,
    pub level: CefrLevel,
    pub target_language: String,
}

/// Per-user privacy settings. Exactly one active row per user; defaults are
/// created lazily on first access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacySettings {
    pub user_id: Uuid,
    pub visibility_scope: VisibilityScope,
    pub allow_level_filtering: bool,
    pub study_group_visible: bool,
    pub show_achievements: bool,
    pub show_learning_progress: bool,
}

impl PrivacySettings {
    /// Default settings applied when a user has no stored row.
    pub fn default_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            visibility_scope: VisibilityScope::SameLevel,
            allow_level_filtering: true,
            study_group_visible: true,
            show_achievements: true,
            show_learning_progress: true,
        }
    }
}

/// Append-only record of one word being studied. The atomic unit driving
/// all word analytics; never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordStudyEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Case-normalized aggregation key (lower-cased, trimmed).
    pub word: String,
    pub language: String,
    pub level: CefrLevel,
    pub study_type: StudyType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Normalize a word into its aggregation key.
pub fn normalize_word(word: &str) -> String {
    word.trim().to_lowercase()
}

/// Denormalized per-word counters, keyed by (word, language). Derived state:
/// always reconstructible from the `WordStudyEvent` log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalWordAnalytics {
    pub word: String,
    pub language: String,
    pub total_count: i64,
    /// Reset to zero at the analytics-timezone midnight by the sweeper.
    pub today_count: i64,
    /// Rolling 7-day count, recomputed from raw events by the sweeper.
    pub week_count: i64,
    pub level_breakdown: BTreeMap<CefrLevel, i64>,
    pub study_type_breakdown: BTreeMap<StudyType, i64>,
    pub avg_difficulty: f64,
    /// Number of events that carried a difficulty score; keeps the running
    /// mean exact under incremental updates.
    pub difficulty_samples: i64,
    pub trend: Trend,
    pub last_updated: DateTime<Utc>,
}

/// Per-user leaderboard counters. `total_points` is monotonically
/// non-decreasing; `level` is recomputed from the thresholds on every award.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardCounters {
    pub user_id: Uuid,
    pub total_points: i64,
    pub level: i32,
    pub badges: Vec<String>,
}

/// Points required to reach each gamification level.
pub const LEVEL_THRESHOLDS: [(i32, i64); 10] = [
    (1, 0),
    (2, 100),
    (3, 300),
    (4, 600),
    (5, 1000),
    (6, 1500),
    (7, 2200),
    (8, 3000),
    (9, 4000),
    (10, 5000),
];

/// Gamification level for a cumulative point total.
pub fn level_for_points(points: i64) -> i32 {
    LEVEL_THRESHOLDS
        .iter()
        .rev()
        .find(|(_, threshold)| points >= *threshold)
        .map(|(level, _)| *level)
        .unwrap_or(1)
}

/// The requester's interaction history, used to flag already-liked items.
#[derive(Debug, Clone, Default)]
pub struct InteractionHistory {
    pub liked: HashSet<Uuid>,
    pub commented: HashSet<Uuid>,
}

/// Smart feed request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRequest {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub kinds: Option<Vec<ContentKind>>,
    #[serde(default)]
    pub level_filter: Option<CefrLevel>,
    #[serde(default)]
    pub language_filter: Option<String>,
    #[serde(default = "default_true")]
    pub include_trending: bool,
    /// Weight in [0, 1]; zero means pure recency ordering.
    #[serde(default = "default_personalization")]
    pub personalization_strength: f64,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

fn default_true() -> bool {
    true
}

fn default_personalization() -> f64 {
    0.7
}

impl Default for FeedRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
            kinds: None,
            level_filter: None,
            language_filter: None,
            include_trending: default_true(),
            personalization_strength: default_personalization(),
        }
    }
}

/// One ranked item in a feed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    #[serde(flatten)]
    pub content: ContentItem,
    /// Whether the requesting user has liked this item.
    #[serde(default)]
    pub is_liked: bool,
}

/// Pagination block attached to feed responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total_items: usize,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
    pub has_next: bool,
}

impl Pagination {
    /// `total_pages = ceil(total / limit)`; `has_next` is true strictly
    /// before the last page. `limit` must be >= 1 (validated upstream).
    pub fn compute(total_items: usize, page: u32, limit: u32) -> Self {
        let total_pages = ((total_items as u64 + limit as u64 - 1) / limit as u64) as u32;
        Self {
            total_items,
            page,
            limit,
            total_pages,
            has_next: page < total_pages,
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

/// Whether a trending entry is a single word or a topic bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendingKind {
    Word,
    Topic,
}

/// A trending word or topic with its bounded popularity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingContent {
    pub kind: TrendingKind,
    pub content: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<CefrLevel>,
    /// Bounded-linear popularity in [0, 1].
    pub popularity_score: f64,
    pub usage_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
    pub last_updated: DateTime<Utc>,
}

/// A supplementary content recommendation shown alongside the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecommendation {
    pub content_id: String,
    pub kind: ContentKind,
    pub title: String,
    pub body: String,
    pub relevance_score: f64,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trending_score: Option<f64>,
}

/// Smart feed response: ordered items plus supplementary content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse {
    pub items: Vec<FeedItem>,
    pub recommendations: Vec<ContentRecommendation>,
    pub trending: Vec<TrendingContent>,
    pub pagination: Pagination,
    pub personalization_applied: bool,
}

/// One row in a leaderboard response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: Uuid,
    pub total_points: i64,
    pub level: i32,
    /// Competition rank: users with equal points share a rank.
    pub rank: i64,
    pub badges: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub entries: Vec<LeaderboardEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_rank: Option<i64>,
    pub total_users: i64,
}
