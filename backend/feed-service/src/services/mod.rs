pub mod audience;
pub mod feed;
pub mod leaderboard;
pub mod scoring;
pub mod trending;
pub mod word_analytics;

pub use audience::{Audience, AudienceSelector};
pub use feed::FeedAssembler;
pub use leaderboard::LeaderboardRanker;
pub use trending::TrendingExtractor;
pub use word_analytics::WordAnalyticsAggregator;
