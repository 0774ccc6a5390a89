//! Parsers for `status` and `stats` console command output.
//!
//! `status` prints a `key : value` header block followed by a player table;
//! `stats` prints a column header and one fixed-column numeric row. Both are
//! also echoed into the console log, where each line carries a timestamp.

use crate::dump::{DumpPlayer, MAX_PLAYERS, TEAM_BLU, TEAM_RED};
use crate::error::ParseError;
use crate::event::StatusLine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

static STATUS_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^#\s+(\d+)\s+"(.*)"\s+(\[U:\d:\d+\])\s+(\S+)\s+(\d+)\s+(\d+)\s+(\w+)(?:\s+(\S+))?\s*$"#)
        .expect("status row pattern")
});

static STATS_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+\.\d+)\s+(\d+\.\d+)\s+(\d+\.\d+)\s+(\d+)\s+(\d+)\s+(\d+\.\d+)\s+(\d+)\s+(\d+)$")
        .expect("stats row pattern")
});

static PLAYER_COUNTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+humans,\s+(\d+)\s+bots\s+\((\d+)\s+max\)").expect("player count pattern")
});

/// Server performance counters from the `stats` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    pub cpu_pct: f32,
    pub in_kbps: f32,
    pub out_kbps: f32,
    pub fps: f32,
    pub uptime_s: u64,
    pub map_changes: u32,
    pub player_count: u32,
    pub connects: u32,
}

/// Header block of `status` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub hostname: String,
    pub version: Option<u32>,
    pub address: String,
    pub map: String,
    pub tags: Vec<String>,
    pub humans: u32,
    pub bots: u32,
    pub max_players: u32,
}

/// Everything recovered from one `status` (optionally `;stats`) response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub info: StatusInfo,
    pub rows: Vec<StatusLine>,
    pub stats: Option<ServerStats>,
}

/// Parses a connection duration of the form `SS`, `MM:SS` or `HH:MM:SS`.
pub fn parse_duration(text: &str) -> Result<Duration, ParseError> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(ParseError::malformed("duration", text));
    }

    let mut total: u64 = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::malformed("duration", text));
        }
        let value: u64 = part
            .parse()
            .map_err(|_| ParseError::malformed("duration", text))?;
        // only the leading component may exceed its unit
        if i > 0 && value >= 60 {
            return Err(ParseError::malformed("duration", text));
        }
        total = total
            .checked_mul(60)
            .and_then(|t| t.checked_add(value))
            .ok_or_else(|| ParseError::malformed("duration", text))?;
    }

    Ok(Duration::from_secs(total))
}

/// Parses one player row of the `status` table, e.g.
/// `#    319 "name"  [U:1:123]  19:13  75  0 active 10.0.0.1:27005`.
pub fn parse_status_row(line: &str) -> Result<StatusLine, ParseError> {
    let caps = STATUS_ROW.captures(line.trim()).ok_or(ParseError::NoMatch)?;

    let number = |idx: usize, field: &'static str| -> Result<u32, ParseError> {
        caps[idx]
            .parse::<u32>()
            .map_err(|_| ParseError::malformed(field, &caps[idx]))
    };

    Ok(StatusLine {
        user_id: number(1, "user id")?,
        name: caps[2].to_string(),
        player_id: caps[3].parse()?,
        connected: parse_duration(&caps[4])?,
        ping: number(5, "ping")?,
        loss: number(6, "loss")?,
        state: caps[7].to_string(),
        address: caps.get(8).map(|m| m.as_str().to_string()),
    })
}

/// Parses the numeric row printed by `stats`. Uptime is reported in minutes.
pub fn parse_stats_line(line: &str) -> Result<ServerStats, ParseError> {
    let caps = STATS_ROW.captures(line.trim()).ok_or(ParseError::NoMatch)?;

    fn field<T: std::str::FromStr>(v: &str, name: &'static str) -> Result<T, ParseError> {
        v.parse::<T>().map_err(|_| ParseError::malformed(name, v))
    }

    let uptime_minutes: u64 = field(&caps[4], "uptime")?;
    Ok(ServerStats {
        cpu_pct: field(&caps[1], "cpu")?,
        in_kbps: field(&caps[2], "in")?,
        out_kbps: field(&caps[3], "out")?,
        uptime_s: uptime_minutes
            .checked_mul(60)
            .ok_or_else(|| ParseError::malformed("uptime", &caps[4]))?,
        map_changes: field(&caps[5], "map changes")?,
        fps: field(&caps[6], "fps")?,
        player_count: field(&caps[7], "players")?,
        connects: field(&caps[8], "connects")?,
    })
}

/// Parses a whole `status` response. Lines that are not part of the header,
/// player table or stats row are ignored, as are bot rows.
pub fn parse_status(text: &str) -> StatusReport {
    let mut report = StatusReport::default();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('#') {
            if let Ok(row) = parse_status_row(line) {
                report.rows.push(row);
            }
            continue;
        }

        if let Ok(stats) = parse_stats_line(line) {
            report.stats = Some(stats);
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "hostname" => report.info.hostname = value.to_string(),
            "version" => {
                report.info.version = value
                    .split('/')
                    .next()
                    .and_then(|v| v.trim().parse().ok());
            }
            "udp/ip" => {
                report.info.address = value.split_whitespace().next().unwrap_or_default().to_string();
            }
            "map" => {
                report.info.map = value.split_whitespace().next().unwrap_or_default().to_string();
            }
            "tags" => report.info.tags = split_tags(value),
            "players" => {
                if let Some(caps) = PLAYER_COUNTS.captures(value) {
                    report.info.humans = caps[1].parse().unwrap_or_default();
                    report.info.bots = caps[2].parse().unwrap_or_default();
                    report.info.max_players = caps[3].parse().unwrap_or_default();
                }
            }
            _ => {}
        }
    }

    report
}

pub fn split_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builds dump slot arrays from `status` rows when no per-slot dump exists.
///
/// Rows are ordered by user id and placed from slot 1 upward. `status` does
/// not report teams, so the team column alternates RED/BLU and is only a
/// placeholder; score, deaths, health and alive are left at their defaults.
pub fn synthesize_dump(rows: &[StatusLine]) -> DumpPlayer {
    let mut sorted: Vec<&StatusLine> = rows.iter().collect();
    sorted.sort_by_key(|row| row.user_id);

    let mut dump = DumpPlayer::default();
    for (i, row) in sorted.into_iter().take(MAX_PLAYERS - 1).enumerate() {
        let slot = i + 1;
        dump.names[slot] = row.name.clone();
        dump.ping[slot] = row.ping;
        dump.loss[slot] = row.loss;
        dump.state[slot] = row.state.clone();
        dump.address[slot] = row.address.clone().unwrap_or_default();
        dump.connected_secs[slot] = u32::try_from(row.connected.as_secs()).unwrap_or(u32::MAX);
        dump.user_id[slot] = row.user_id;
        dump.player_id[slot] = row.player_id;
        dump.valid[slot] = row.player_id.is_valid();
        dump.connected[slot] = true;
        dump.team[slot] = if i % 2 == 0 { TEAM_RED } else { TEAM_BLU };
    }

    dump
}
