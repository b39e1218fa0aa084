//! Leaderboard ordering and rank lookup over the points counters.
//!
//! Competition ranking: a user's rank is `1 + count(users with more points)`,
//! so ties share a rank and the next distinct total skips the tied slots.
//! Display order breaks ties by ascending user id to stay deterministic.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::db::DataStore;
use crate::error::{AppError, Result};
use crate::models::{LeaderboardCounters, LeaderboardEntry, LeaderboardResponse};

pub struct LeaderboardRanker<S: DataStore + ?Sized> {
    store: Arc<S>,
}

impl<S: DataStore + ?Sized> LeaderboardRanker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Top-N users plus the requesting user's rank. The rank is computed by
    /// counting users with strictly more points, never by sorting everyone.
    pub async fn leaderboard(&self, user_id: Uuid, limit: u32) -> Result<LeaderboardResponse> {
        if limit < 1 {
            return Err(AppError::Validation("limit must be >= 1".to_string()));
        }

        let top = self.store.top_users_by_points(limit).await?;
        let entries = rank_entries(top);

        let user_rank = match self.store.get_user_points(user_id).await? {
            Some(counters) => {
                let above = self
                    .store
                    .count_users_with_points_above(counters.total_points)
                    .await?;
                Some(above + 1)
            }
            None => None,
        };
        let total_users = self.store.count_users().await?;

        debug!(user_id = %user_id, entries = entries.len(), ?user_rank, "leaderboard computed");
        Ok(LeaderboardResponse {
            entries,
            user_rank,
            total_users,
        })
    }

    /// Awards points and recomputes the user's level from the thresholds.
    pub async fn award_points(&self, user_id: Uuid, points: i64) -> Result<LeaderboardCounters> {
        if points <= 0 {
            return Err(AppError::Validation(
                "points awarded must be positive".to_string(),
            ));
        }
        self.store.add_points(user_id, points).await
    }
}

/// Assigns competition ranks to an already points-descending list.
fn rank_entries(counters: Vec<LeaderboardCounters>) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(counters.len());
    let mut previous_points: Option<i64> = None;
    let mut rank = 0i64;

    for (position, row) in counters.into_iter().enumerate() {
        if previous_points != Some(row.total_points) {
            rank = position as i64 + 1;
            previous_points = Some(row.total_points);
        }
        entries.push(LeaderboardEntry {
            user_id: row.user_id,
            total_points: row.total_points,
            level: row.level,
            rank,
            badges: row.badges,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn test_rank_counts_users_above() {
        let store = Arc::new(MemoryStore::new());
        let ranker = LeaderboardRanker::new(store.clone());
        let me = Uuid::new_v4();

        store.add_points(me, 150).await.unwrap();
        for points in [200, 300, 400] {
            store.add_points(Uuid::new_v4(), points).await.unwrap();
        }

        let response = ranker.leaderboard(me, 10).await.unwrap();
        assert_eq!(response.user_rank, Some(4));
        assert_eq!(response.total_users, 4);
    }

    #[tokio::test]
    async fn test_ties_share_a_rank() {
        let store = Arc::new(MemoryStore::new());
        let ranker = LeaderboardRanker::new(store.clone());
        store.add_points(Uuid::new_v4(), 500).await.unwrap();
        store.add_points(Uuid::new_v4(), 300).await.unwrap();
        store.add_points(Uuid::new_v4(), 300).await.unwrap();
        store.add_points(Uuid::new_v4(), 100).await.unwrap();

        let response = ranker.leaderboard(Uuid::new_v4(), 10).await.unwrap();
        let ranks: Vec<i64> = response.entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2, 4]);
        assert_eq!(response.user_rank, None);
    }

    #[tokio::test]
    async fn test_award_points_rejects_non_positive() {
        let store = Arc::new(MemoryStore::new());
        let ranker = LeaderboardRanker::new(store);
        let err = ranker.award_points(Uuid::new_v4(), 0).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_award_points_levels_up() {
        let store = Arc::new(MemoryStore::new());
        let ranker = LeaderboardRanker::new(store);
        let user = Uuid::new_v4();
        let counters = ranker.award_points(user, 650).await.unwrap();
        assert_eq!(counters.level, 4);
    }
}
