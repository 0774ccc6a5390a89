use crate::error::FetchError;
use crate::rcon::RconClient;
use log::{debug, warn};
use shared::{parse_dump, parse_status, synthesize_dump, DumpPlayer, ServerStats, StatusInfo, StatusLine};
use std::sync::Arc;

/// How player data is obtained from the backing server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FetchMode {
    /// A game client we observe locally; it supports `g15_dumpplayer`.
    Client,
    /// A dedicated server; only `status` and `stats` are available.
    Server,
}

impl FetchMode {
    pub fn command(&self) -> &'static str {
        match self {
            FetchMode::Client => "status;g15_dumpplayer",
            FetchMode::Server => "status;stats",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DumpResult {
    pub players: DumpPlayer,
    pub stats: Option<ServerStats>,
    pub info: StatusInfo,
    /// Set when this is a replay of the last good result after a failed fetch.
    pub stale: bool,
}

pub struct DumpFetcher {
    rcon: Arc<RconClient>,
    mode: FetchMode,
    last_good: Option<DumpResult>,
}

impl DumpFetcher {
    pub fn new(rcon: Arc<RconClient>, mode: FetchMode) -> Self {
        Self {
            rcon,
            mode,
            last_good: None,
        }
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    /// Fetches and parses a fresh snapshot. After a failure the previous good
    /// result is returned marked stale; an error only surfaces when no fetch
    /// has ever succeeded.
    pub async fn fetch(&mut self) -> Result<DumpResult, FetchError> {
        match self.rcon.exec(self.mode.command(), true).await {
            Ok(text) => {
                let result = parse_response(self.mode, &text);
                debug!(
                    "Fetched dump from {}: {} occupied slots",
                    self.rcon.address(),
                    result.players.occupied_slots().count()
                );
                self.last_good = Some(result.clone());
                Ok(result)
            }
            Err(e) => match &self.last_good {
                Some(previous) => {
                    warn!("Dump fetch from {} failed, reusing last result: {}", self.rcon.address(), e);
                    Ok(DumpResult {
                        stale: true,
                        ..previous.clone()
                    })
                }
                None => Err(FetchError::NoData(e)),
            },
        }
    }
}

/// Turns the text of a composite fetch command into slot data.
pub fn parse_response(mode: FetchMode, text: &str) -> DumpResult {
    let report = parse_status(text);
    let players = match mode {
        FetchMode::Client => {
            let mut players = parse_dump(text);
            merge_status_rows(&mut players, &report.rows);
            players
        }
        FetchMode::Server => synthesize_dump(&report.rows),
    };

    DumpResult {
        players,
        stats: report.stats,
        info: report.info,
        stale: false,
    }
}

/// Copies the fields only `status` reports into the matching dump slots.
fn merge_status_rows(players: &mut DumpPlayer, rows: &[StatusLine]) {
    for row in rows {
        let Some(slot) = players.slot_for_user_id(row.user_id) else {
            continue;
        };
        players.loss[slot] = row.loss;
        players.state[slot] = row.state.clone();
        players.address[slot] = row.address.clone().unwrap_or_default();
        players.connected_secs[slot] = u32::try_from(row.connected.as_secs()).unwrap_or(u32::MAX);
    }
}
