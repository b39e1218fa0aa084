pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};

pub use services::{
    AudienceSelector, FeedAssembler, LeaderboardRanker, TrendingExtractor,
    WordAnalyticsAggregator,
};
