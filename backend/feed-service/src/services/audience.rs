//! Resolves which authors a requesting user may see content from, and at
//! which visibility tiers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::db::DataStore;
use crate::error::{AppError, Result};
use crate::models::{PrivacySettings, Visibility, VisibilityScope};

/// Resolved audience for one requesting user. Maps each eligible author to
/// the visibility tiers the requester is allowed to see from them.
#[derive(Debug, Clone)]
pub struct Audience {
    pub viewer: Uuid,
    tiers: HashMap<Uuid, HashSet<Visibility>>,
}

impl Audience {
    pub fn author_ids(&self) -> Vec<Uuid> {
        self.tiers.keys().copied().collect()
    }

    pub fn allows(&self, author: Uuid, visibility: Visibility) -> bool {
        self.tiers
            .get(&author)
            .map(|tiers| tiers.contains(&visibility))
            .unwrap_or(false)
    }

    /// Union of tiers granted to at least one author. Used to pre-filter the
    /// content query; per-author tier checks still apply afterwards.
    pub fn tier_union(&self) -> Vec<Visibility> {
        let mut union: HashSet<Visibility> = HashSet::new();
        for tiers in self.tiers.values() {
            union.extend(tiers.iter().copied());
        }
        union.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }
}

pub struct AudienceSelector<S: DataStore + ?Sized> {
    store: Arc<S>,
}

impl<S: DataStore + ?Sized> AudienceSelector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Stores a user's privacy settings, which take effect on the next
    /// audience selection.
    pub async fn update_privacy_settings(&self, settings: PrivacySettings) -> Result<()> {
        if settings.user_id.is_nil() {
            return Err(AppError::Validation(
                "privacy settings require a user id".to_string(),
            ));
        }
        self.store.upsert_privacy_settings(&settings).await
    }

    /// Candidate set is the union of followed users, level peers (where the
    /// peer allows level filtering), target-language peers, and the viewer
    /// themself. Each candidate's tiers are then narrowed by their own
    /// privacy settings. An empty audience is valid output.
    pub async fn select(&self, viewer: Uuid) -> Result<Audience> {
        let following: HashSet<Uuid> =
            self.store.list_following(viewer).await?.into_iter().collect();
        let followers: HashSet<Uuid> =
            self.store.list_followers(viewer).await?.into_iter().collect();
        // Mutual follows satisfy the follow-back requirement of friends scope.
        let mutual: HashSet<Uuid> = following.intersection(&followers).copied().collect();

        let profile = self.store.get_user_profile(viewer).await?;
        let (level_peers, language_peers) = match &profile {
            Some(profile) => {
                let by_level: HashSet<Uuid> = self
                    .store
                    .list_profiles_by_level(profile.level)
                    .await?
                    .into_iter()
                    .collect();
                let by_language: HashSet<Uuid> = self
                    .store
                    .list_profiles_by_language(&profile.target_language)
                    .await?
                    .into_iter()
                    .collect();
                (by_level, by_language)
            }
            // Unknown viewer still sees followed users and their own content.
            None => (HashSet::new(), HashSet::new()),
        };

        let mut candidates: HashSet<Uuid> = following.clone();
        candidates.extend(language_peers.iter().copied());
        candidates.extend(level_peers.iter().copied());
        candidates.insert(viewer);

        let mut tiers: HashMap<Uuid, HashSet<Visibility>> = HashMap::new();
        for candidate in candidates {
            if candidate == viewer {
                tiers.insert(
                    viewer,
                    [
                        Visibility::Public,
                        Visibility::LevelRestricted,
                        Visibility::StudyGroup,
                        Visibility::Friends,
                        Visibility::Private,
                    ]
                    .into_iter()
                    .collect(),
                );
                continue;
            }

            let settings = match self.store.get_privacy_settings(candidate).await {
                Ok(settings) => settings,
                Err(err) => {
                    // Unresolvable settings degrade to the public tier only.
                    warn!(candidate = %candidate, error = %err, "privacy settings unavailable");
                    tiers.insert(candidate, HashSet::from([Visibility::Public]));
                    continue;
                }
            };

            // Level peers are narrowed to candidates who opted in.
            let is_level_peer = level_peers.contains(&candidate);
            if is_level_peer
                && !settings.allow_level_filtering
                && !following.contains(&candidate)
                && !language_peers.contains(&candidate)
            {
                continue;
            }

            let shares_level = is_level_peer;
            let is_friend = mutual.contains(&candidate);

            let mut granted: HashSet<Visibility> = HashSet::new();
            match settings.visibility_scope {
                VisibilityScope::All => {
                    granted.insert(Visibility::Public);
                    granted.insert(Visibility::LevelRestricted);
                    if settings.study_group_visible {
                        granted.insert(Visibility::StudyGroup);
                    }
                }
                VisibilityScope::SameLevel => {
                    granted.insert(Visibility::Public);
                    if shares_level {
                        granted.insert(Visibility::LevelRestricted);
                        if settings.study_group_visible {
                            granted.insert(Visibility::StudyGroup);
                        }
                    }
                }
                VisibilityScope::Friends => {
                    if !is_friend {
                        continue;
                    }
                    granted.insert(Visibility::Public);
                    if shares_level {
                        granted.insert(Visibility::LevelRestricted);
                    }
                    if settings.study_group_visible {
                        granted.insert(Visibility::StudyGroup);
                    }
                }
            }
            if is_friend {
                granted.insert(Visibility::Friends);
            }

            if !granted.is_empty() {
                tiers.insert(candidate, granted);
            }
        }

        Ok(Audience { viewer, tiers })
    }
}
