//! Per-server player roster.
//!
//! Every write goes through [`ServerState::set_players`] under one lock, so a
//! snapshot never sees half of a merge.

use crate::enrichment::{Enrichment, Match, Profile};
use crate::fetcher::DumpResult;
use log::{debug, info};
use serde::Serialize;
use shared::{ServerStats, StatusInfo, StatusLine, SteamId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Reconciled view of one player, keyed by `player_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Player {
    pub player_id: SteamId,
    pub name: String,
    pub ping: u32,
    pub loss: u32,
    pub address: String,
    pub connected_seconds: u32,
    pub score: i32,
    pub deaths: i32,
    pub connected: bool,
    pub team: u8,
    pub alive: bool,
    pub health: u32,
    pub valid: bool,
    pub user_id: u32,
    pub state: String,
    pub reputation_matches: Vec<Match>,
    pub profile: Option<Profile>,
    #[serde(skip)]
    pub profile_updated_at: Option<Instant>,
    /// Start of the last enrichment pass that included this player.
    #[serde(skip)]
    pub enrichment_attempted_at: Option<Instant>,
    #[serde(skip)]
    pub dump_updated_at: Instant,
}

impl Player {
    pub fn new(player_id: SteamId, now: Instant) -> Self {
        Self {
            player_id,
            name: String::new(),
            ping: 0,
            loss: 0,
            address: String::new(),
            connected_seconds: 0,
            score: 0,
            deaths: 0,
            connected: false,
            team: 0,
            alive: false,
            health: 0,
            valid: player_id.is_valid(),
            user_id: 0,
            state: String::new(),
            reputation_matches: Vec::new(),
            profile: None,
            profile_updated_at: None,
            enrichment_attempted_at: None,
            dump_updated_at: now,
        }
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.dump_updated_at) > timeout
    }

    /// True when the profile is missing or older than `refresh`, and no
    /// pass has tried this player within `retry`.
    pub fn needs_enrichment(&self, now: Instant, refresh: Duration, retry: Duration) -> bool {
        let stale = match self.profile_updated_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) > refresh,
        };
        let backed_off = self
            .enrichment_attempted_at
            .is_some_and(|at| now.saturating_duration_since(at) <= retry);
        stale && !backed_off
    }

    /// Records a sighting; the stamp never moves backwards.
    fn touch(&mut self, at: Instant) {
        self.dump_updated_at = self.dump_updated_at.max(at);
    }
}

/// One batch of changes for [`ServerState::set_players`].
#[derive(Debug, Clone)]
pub enum PlayerUpdate {
    Dump { result: Box<DumpResult>, at: Instant },
    Enrichment { results: Vec<Enrichment>, at: Instant },
    Status { line: StatusLine, at: Instant },
}

/// Immutable copy of a server's roster handed to readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerSnapshot {
    pub server: String,
    pub info: StatusInfo,
    pub stats: ServerStats,
    pub players: Vec<Player>,
}

#[derive(Debug, Default)]
struct Roster {
    players: HashMap<SteamId, Player>,
    stats: ServerStats,
    info: StatusInfo,
    enrichment_in_flight: bool,
}

impl Roster {
    fn merge_dump(&mut self, result: &DumpResult, at: Instant) -> usize {
        if let Some(stats) = &result.stats {
            self.stats = stats.clone();
        }
        if !result.info.hostname.is_empty() || !result.info.map.is_empty() {
            self.info = result.info.clone();
        }

        let dump = &result.players;
        let mut touched = 0;
        for slot in dump.occupied_slots() {
            let id = dump.player_id[slot];
            // A replayed snapshot may keep rows alive but never revives one.
            if result.stale && !self.players.contains_key(&id) {
                continue;
            }

            let player = self.players.entry(id).or_insert_with(|| {
                debug!("Tracking {} from dump slot {}", id, slot);
                Player::new(id, at)
            });
            player.name = dump.names[slot].clone();
            player.ping = dump.ping[slot];
            player.score = dump.score[slot];
            player.deaths = dump.deaths[slot];
            player.connected = dump.connected[slot];
            player.team = dump.team[slot];
            player.alive = dump.alive[slot];
            player.health = dump.health[slot];
            player.valid = dump.valid[slot];
            player.user_id = dump.user_id[slot];
            player.loss = dump.loss[slot];
            player.state = dump.state[slot].clone();
            player.address = dump.address[slot].clone();
            player.connected_seconds = dump.connected_secs[slot];
            if !result.stale {
                player.touch(at);
            }
            touched += 1;
        }
        touched
    }

    fn merge_enrichment(&mut self, results: &[Enrichment], at: Instant) -> usize {
        let mut touched = 0;
        for result in results {
            let Some(player) = self.players.get_mut(&result.player_id) else {
                debug!("Discarding enrichment for departed player {}", result.player_id);
                continue;
            };
            if let Some(matches) = &result.matches {
                player.reputation_matches = matches.clone();
            }
            if let Some(profile) = &result.profile {
                player.profile = Some(profile.clone());
            }
            player.profile_updated_at = Some(at);
            touched += 1;
        }
        touched
    }

    fn merge_status(&mut self, line: &StatusLine, at: Instant) -> usize {
        if !line.player_id.is_valid() {
            return 0;
        }
        let player = self.players.entry(line.player_id).or_insert_with(|| {
            debug!("Tracking {} from status line", line.player_id);
            Player::new(line.player_id, at)
        });
        player.name = line.name.clone();
        player.user_id = line.user_id;
        player.ping = line.ping;
        player.loss = line.loss;
        player.state = line.state.clone();
        if let Some(address) = &line.address {
            player.address = address.clone();
        }
        player.connected_seconds = u32::try_from(line.connected.as_secs()).unwrap_or(u32::MAX);
        player.connected = true;
        player.valid = true;
        player.touch(at);
        1
    }
}

/// Holds a server's enrichment slot. Dropping it without
/// [`release`](Self::release), e.g. when the pass is cancelled, frees the
/// slot as well.
pub struct EnrichmentClaim {
    state: Arc<ServerState>,
    ids: Vec<SteamId>,
    released: bool,
}

impl EnrichmentClaim {
    pub fn ids(&self) -> &[SteamId] {
        &self.ids
    }

    pub async fn release(mut self) {
        self.state.finish_enrichment().await;
        self.released = true;
    }
}

impl Drop for EnrichmentClaim {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(mut roster) = self.state.roster.try_write() {
            roster.enrichment_in_flight = false;
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let state = Arc::clone(&self.state);
            handle.spawn(async move { state.finish_enrichment().await });
        }
    }
}

pub struct ServerState {
    name: String,
    log_secret: Option<i64>,
    roster: RwLock<Roster>,
}

impl ServerState {
    pub fn new(name: impl Into<String>, log_secret: Option<i64>) -> Self {
        Self {
            name: name.into(),
            log_secret,
            roster: RwLock::new(Roster::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log_secret(&self) -> Option<i64> {
        self.log_secret
    }

    /// Applies one update batch atomically and returns how many rows it touched.
    pub async fn set_players(&self, update: PlayerUpdate) -> usize {
        let mut roster = self.roster.write().await;
        match &update {
            PlayerUpdate::Dump { result, at } => roster.merge_dump(result, *at),
            PlayerUpdate::Enrichment { results, at } => roster.merge_enrichment(results, *at),
            PlayerUpdate::Status { line, at } => roster.merge_status(line, *at),
        }
    }

    /// Drops every player not sighted within `timeout` of `now`.
    pub async fn remove_expired(&self, now: Instant, timeout: Duration) -> Vec<SteamId> {
        let mut roster = self.roster.write().await;
        let expired: Vec<SteamId> = roster
            .players
            .values()
            .filter(|p| p.is_expired(now, timeout))
            .map(|p| p.player_id)
            .collect();

        for id in &expired {
            if let Some(player) = roster.players.remove(id) {
                info!("Player {} ({}) expired from {}", player.name, id, self.name);
            }
        }
        expired
    }

    /// Claims the enrichment slot if it is free and someone needs refreshing.
    /// Every claimed player is stamped as attempted at `now`. The slot is
    /// freed when the returned claim is released or dropped.
    pub async fn try_begin_enrichment(
        self: &Arc<Self>,
        now: Instant,
        refresh: Duration,
        retry: Duration,
    ) -> Option<EnrichmentClaim> {
        let mut roster = self.roster.write().await;
        if roster.enrichment_in_flight {
            return None;
        }

        let mut ids: Vec<SteamId> = roster
            .players
            .values()
            .filter(|p| p.needs_enrichment(now, refresh, retry))
            .map(|p| p.player_id)
            .collect();
        if ids.is_empty() {
            return None;
        }
        ids.sort();
        for id in &ids {
            if let Some(player) = roster.players.get_mut(id) {
                player.enrichment_attempted_at = Some(now);
            }
        }
        roster.enrichment_in_flight = true;
        Some(EnrichmentClaim {
            state: Arc::clone(self),
            ids,
            released: false,
        })
    }

    pub async fn finish_enrichment(&self) {
        self.roster.write().await.enrichment_in_flight = false;
    }

    pub async fn enrichment_in_flight(&self) -> bool {
        self.roster.read().await.enrichment_in_flight
    }

    pub async fn player(&self, player_id: SteamId) -> Option<Player> {
        self.roster.read().await.players.get(&player_id).cloned()
    }

    /// Players ordered by user id.
    pub async fn players(&self) -> Vec<Player> {
        let roster = self.roster.read().await;
        let mut players: Vec<Player> = roster.players.values().cloned().collect();
        players.sort_by_key(|p| (p.user_id, p.player_id));
        players
    }

    pub async fn player_count(&self) -> usize {
        self.roster.read().await.players.len()
    }

    pub async fn snapshot(&self) -> ServerSnapshot {
        let roster = self.roster.read().await;
        let mut players: Vec<Player> = roster.players.values().cloned().collect();
        players.sort_by_key(|p| (p.user_id, p.player_id));
        ServerSnapshot {
            server: self.name.clone(),
            info: roster.info.clone(),
            stats: roster.stats.clone(),
            players,
        }
    }
}
