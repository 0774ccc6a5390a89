//! Reputation and profile enrichment.
//!
//! The reputation lists and profile API are external collaborators; only
//! their call contract lives here. Enrichment is additive: it never touches
//! the live fields a dump owns.

use crate::config::TrackerSettings;
use crate::error::EnrichError;
use crate::state::{PlayerUpdate, ServerState};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use shared::SteamId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout_at;

/// An entry for a player on a reputation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub list_name: String,
    pub attributes: Vec<String>,
    pub proof: Vec<String>,
}

/// Third-party profile summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub player_id: SteamId,
    pub persona_name: String,
    pub avatar_hash: String,
    pub vac_bans: u32,
    pub game_bans: u32,
    pub community_banned: bool,
    pub economy_ban: String,
    pub days_since_last_ban: Option<u32>,
    pub time_created: Option<i64>,
}

#[async_trait]
pub trait ReputationSource: Send + Sync {
    /// Every list entry matching `player_id`.
    async fn search(&self, player_id: SteamId) -> Result<Vec<Match>, EnrichError>;

    /// Profiles for as many of `player_ids` as could be fetched.
    async fn fetch_profiles(&self, player_ids: &[SteamId]) -> Result<Vec<Profile>, EnrichError>;
}

/// Source used when no reputation backend is wired in.
pub struct NoReputation;

#[async_trait]
impl ReputationSource for NoReputation {
    async fn search(&self, _player_id: SteamId) -> Result<Vec<Match>, EnrichError> {
        Ok(Vec::new())
    }

    async fn fetch_profiles(&self, _player_ids: &[SteamId]) -> Result<Vec<Profile>, EnrichError> {
        Ok(Vec::new())
    }
}

/// What was learned about one player in an enrichment pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub player_id: SteamId,
    pub matches: Option<Vec<Match>>,
    pub profile: Option<Profile>,
}

/// Looks up `ids`, running the profile fetch and the reputation searches
/// concurrently. The whole pass shares one deadline `limit` from now; work
/// finished by then is kept. A failed profile fetch contributes no profiles,
/// and a failed search only skips that player.
pub async fn enrich(source: &dyn ReputationSource, ids: &[SteamId], limit: Duration) -> Vec<Enrichment> {
    let deadline = tokio::time::Instant::now() + limit;

    let profiles = async {
        match timeout_at(deadline, source.fetch_profiles(ids)).await {
            Ok(Ok(profiles)) => profiles,
            Ok(Err(e)) => {
                warn!("Profile fetch failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!("Profile fetch timed out after {:?}", limit);
                Vec::new()
            }
        }
    };

    let searches = async {
        let mut found = Vec::with_capacity(ids.len());
        for &id in ids {
            match timeout_at(deadline, source.search(id)).await {
                Ok(Ok(matches)) => found.push((id, matches)),
                Ok(Err(e)) => debug!("Reputation search for {} failed: {}", id, e),
                Err(_) => {
                    warn!(
                        "Reputation searches timed out after {:?} with {} of {} done",
                        limit,
                        found.len(),
                        ids.len()
                    );
                    break;
                }
            }
        }
        found
    };

    let (profiles, searches) = tokio::join!(profiles, searches);

    let mut results: Vec<Enrichment> = ids
        .iter()
        .map(|&player_id| Enrichment {
            player_id,
            matches: None,
            profile: None,
        })
        .collect();
    for result in &mut results {
        result.profile = profiles.iter().find(|p| p.player_id == result.player_id).cloned();
        result.matches = searches
            .iter()
            .find(|(id, _)| *id == result.player_id)
            .map(|(_, m)| m.clone());
    }
    results.retain(|r| r.matches.is_some() || r.profile.is_some());
    results
}

/// One guarded enrichment pass for a server. Returns false without calling
/// the source when a pass is already running or nobody needs refreshing.
pub async fn run_enrichment(state: &Arc<ServerState>, source: &dyn ReputationSource, settings: &TrackerSettings) -> bool {
    let Some(claim) = state
        .try_begin_enrichment(Instant::now(), settings.profile_refresh, settings.enrichment_retry)
        .await
    else {
        return false;
    };

    debug!("Enriching {} players on {}", claim.ids().len(), state.name());
    let results = enrich(source, claim.ids(), settings.enrichment_timeout).await;
    state
        .set_players(PlayerUpdate::Enrichment {
            results,
            at: Instant::now(),
        })
        .await;
    claim.release().await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySource {
        searches: AtomicUsize,
    }

    #[async_trait]
    impl ReputationSource for FlakySource {
        async fn search(&self, player_id: SteamId) -> Result<Vec<Match>, EnrichError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            if player_id.account_id() == 2 {
                return Err(EnrichError::Source("list unavailable".to_string()));
            }
            Ok(vec![Match {
                list_name: "cheaters".to_string(),
                attributes: vec!["cheater".to_string()],
                proof: Vec::new(),
            }])
        }

        async fn fetch_profiles(&self, player_ids: &[SteamId]) -> Result<Vec<Profile>, EnrichError> {
            Ok(player_ids
                .iter()
                .filter(|id| id.account_id() != 3)
                .map(|&player_id| Profile {
                    player_id,
                    persona_name: format!("p{}", player_id.account_id()),
                    ..Profile::default()
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_enrich_tolerates_partial_failure() {
        let source = FlakySource {
            searches: AtomicUsize::new(0),
        };
        let ids: Vec<SteamId> = (1..=3).map(SteamId::from_account_id).collect();

        let results = enrich(&source, &ids, Duration::from_secs(1)).await;

        assert_eq!(source.searches.load(Ordering::SeqCst), 3);
        assert_eq!(results.len(), 3);
        assert!(results[0].matches.is_some() && results[0].profile.is_some());
        assert!(results[1].matches.is_none() && results[1].profile.is_some());
        assert!(results[2].matches.is_some() && results[2].profile.is_none());
    }

    struct StallingSearch {
        searches: AtomicUsize,
    }

    #[async_trait]
    impl ReputationSource for StallingSearch {
        async fn search(&self, _player_id: SteamId) -> Result<Vec<Match>, EnrichError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(Vec::new())
        }

        async fn fetch_profiles(&self, _player_ids: &[SteamId]) -> Result<Vec<Profile>, EnrichError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_pass_shares_one_deadline() {
        let source = StallingSearch {
            searches: AtomicUsize::new(0),
        };
        let ids: Vec<SteamId> = (1..=10).map(SteamId::from_account_id).collect();

        let started = Instant::now();
        let results = enrich(&source, &ids, Duration::from_millis(200)).await;

        assert!(started.elapsed() < Duration::from_millis(600));
        assert!(source.searches.load(Ordering::SeqCst) < ids.len());
        assert!(results.len() < ids.len());
    }

    async fn seeded(account: u32) -> Arc<ServerState> {
        let state = Arc::new(ServerState::new("srv", None));
        state
            .set_players(PlayerUpdate::Status {
                line: shared::StatusLine {
                    user_id: 2,
                    player_id: SteamId::from_account_id(account),
                    name: "x".to_string(),
                    connected: Duration::from_secs(1),
                    ping: 0,
                    loss: 0,
                    state: "active".to_string(),
                    address: None,
                },
                at: Instant::now(),
            })
            .await;
        state
    }

    #[tokio::test]
    async fn test_aborted_pass_frees_slot() {
        let state = seeded(7).await;
        let source = Arc::new(StallingSearch {
            searches: AtomicUsize::new(0),
        });

        let pass = {
            let state = Arc::clone(&state);
            let source = Arc::clone(&source);
            tokio::spawn(async move { run_enrichment(&state, source.as_ref(), &TrackerSettings::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(state.enrichment_in_flight().await);

        pass.abort();
        let _ = pass.await;
        for _ in 0..50 {
            if !state.enrichment_in_flight().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!state.enrichment_in_flight().await);
    }

    #[tokio::test]
    async fn test_failing_player_is_not_requeried_every_tick() {
        // account 3 never gets a profile back, so it stays stale
        let state = seeded(3).await;
        let source = FlakySource {
            searches: AtomicUsize::new(0),
        };
        let settings = TrackerSettings::default();

        assert!(run_enrichment(&state, &source, &settings).await);
        assert!(!run_enrichment(&state, &source, &settings).await);
        assert_eq!(source.searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_reputation_yields_nothing() {
        let ids = [SteamId::from_account_id(5)];
        assert!(enrich(&NoReputation, &ids, Duration::from_secs(1)).await.is_empty());
    }
}
