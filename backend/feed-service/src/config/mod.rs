use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub trending: TrendingConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RedisConfig {
    /// Optional: trending response caching is skipped when unset.
    #[serde(default)]
    pub url: Option<String>,
}

/// Tunables for trending extraction. The defaults mirror the constants the
/// product shipped with; none of them is a hard law.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingConfig {
    /// Tokens shorter than this are discarded as noise.
    #[serde(default = "default_min_token_len")]
    pub min_token_len: usize,
    /// Content recency window, in days.
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_word_limit")]
    pub word_limit: usize,
    #[serde(default = "default_topic_limit")]
    pub topic_limit: usize,
    /// Popularity normalizer for words: score = min(count / norm, 1.0).
    #[serde(default = "default_word_norm")]
    pub word_norm: f64,
    /// Popularity normalizer for topics.
    #[serde(default = "default_topic_norm")]
    pub topic_norm: f64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for TrendingConfig {
    fn default() -> Self {
        Self {
            min_token_len: default_min_token_len(),
            window_days: default_window_days(),
            word_limit: default_word_limit(),
            topic_limit: default_topic_limit(),
            word_norm: default_word_norm(),
            topic_norm: default_topic_norm(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Tunables for the personalization score formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Boost for learning-tip and achievement items.
    #[serde(default = "default_kind_boost")]
    pub kind_boost: f64,
    /// Boost for items younger than one day.
    #[serde(default = "default_day_boost")]
    pub day_boost: f64,
    /// Boost for items younger than seven days.
    #[serde(default = "default_week_boost")]
    pub week_boost: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            kind_boost: default_kind_boost(),
            day_boost: default_day_boost(),
            week_boost: default_week_boost(),
        }
    }
}

/// Thresholds for classifying a word's popularity trend from its today
/// count relative to the rolling week total.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// `increasing` when today > rising_ratio * week.
    #[serde(default = "default_rising_ratio")]
    pub rising_ratio: f64,
    /// `decreasing` when today < falling_ratio * week.
    #[serde(default = "default_falling_ratio")]
    pub falling_ratio: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            rising_ratio: default_rising_ratio(),
            falling_ratio: default_falling_ratio(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")?,
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL").ok(),
            },
            trending: TrendingConfig {
                min_token_len: env_or("TRENDING_MIN_TOKEN_LEN", default_min_token_len())?,
                window_days: env_or("TRENDING_WINDOW_DAYS", default_window_days())?,
                word_limit: env_or("TRENDING_WORD_LIMIT", default_word_limit())?,
                topic_limit: env_or("TRENDING_TOPIC_LIMIT", default_topic_limit())?,
                word_norm: env_or("TRENDING_WORD_NORM", default_word_norm())?,
                topic_norm: env_or("TRENDING_TOPIC_NORM", default_topic_norm())?,
                cache_ttl_secs: env_or("TRENDING_CACHE_TTL_SECS", default_cache_ttl_secs())?,
            },
            scoring: ScoringConfig::default(),
            analytics: AnalyticsConfig {
                rising_ratio: env_or("ANALYTICS_RISING_RATIO", default_rising_ratio())?,
                falling_ratio: env_or("ANALYTICS_FALLING_RATIO", default_falling_ratio())?,
            },
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T::Err: std::error::Error + 'static,
{
    match std::env::var(key) {
        Ok(raw) => Ok(raw.parse()?),
        Err(_) => Ok(default),
    }
}

fn default_min_token_len() -> usize {
    4
}

fn default_window_days() -> i64 {
    7
}

fn default_word_limit() -> usize {
    10
}

fn default_topic_limit() -> usize {
    5
}

fn default_word_norm() -> f64 {
    10.0
}

fn default_topic_norm() -> f64 {
    5.0
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_kind_boost() -> f64 {
    0.2
}

fn default_day_boost() -> f64 {
    0.3
}

fn default_week_boost() -> f64 {
    0.1
}

fn default_rising_ratio() -> f64 {
    0.2
}

fn default_falling_ratio() -> f64 {
    0.1
}
