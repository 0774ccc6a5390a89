//! `g15_dumpplayer` output: one `field[slot] type (value)` line per value,
//! stored into fixed positional arrays that mirror the game's player slots.

use crate::error::ParseError;
use crate::steamid::SteamId;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Slot capacity of the game's player arrays (slot 0 is the world entity).
pub const MAX_PLAYERS: usize = 102;

pub const TEAM_UNASSIGNED: u8 = 0;
pub const TEAM_SPECTATOR: u8 = 1;
pub const TEAM_RED: u8 = 2;
pub const TEAM_BLU: u8 = 3;

static DUMP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w+)\[(\d+)\]\s(integer|bool|string)\s\((.*)\)$").expect("dump line pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpValue {
    Integer(i64),
    Bool(bool),
    Str(String),
}

impl DumpValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            DumpValue::Integer(_) => "integer",
            DumpValue::Bool(_) => "bool",
            DumpValue::Str(_) => "string",
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            DumpValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            DumpValue::Bool(v) => Some(*v),
            DumpValue::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }
}

/// One parsed dump line. `Display` writes it back in the wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpLine {
    pub field: String,
    pub index: usize,
    pub value: DumpValue,
}

impl fmt::Display for DumpLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] {} (", self.field, self.index, self.value.type_name())?;
        match &self.value {
            DumpValue::Integer(v) => write!(f, "{v}")?,
            DumpValue::Bool(v) => write!(f, "{v}")?,
            DumpValue::Str(v) => write!(f, "{v}")?,
        }
        write!(f, ")")
    }
}

pub fn parse_dump_line(line: &str) -> Result<DumpLine, ParseError> {
    let caps = DUMP_LINE.captures(line.trim()).ok_or(ParseError::NoMatch)?;

    let index: usize = caps[2]
        .parse()
        .map_err(|_| ParseError::malformed("slot index", &caps[2]))?;
    let raw = &caps[4];
    let value = match &caps[3] {
        "integer" => DumpValue::Integer(
            raw.trim()
                .parse()
                .map_err(|_| ParseError::malformed("integer", raw))?,
        ),
        "bool" => DumpValue::Bool(match raw.trim() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => return Err(ParseError::malformed("bool", raw)),
        }),
        _ => DumpValue::Str(raw.to_string()),
    };

    Ok(DumpLine {
        field: caps[1].to_string(),
        index,
        value,
    })
}

/// Positional per-slot player data. A slot only describes a player when
/// `valid[slot]` is set; slot order itself carries no meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpPlayer {
    pub names: [String; MAX_PLAYERS],
    pub ping: [u32; MAX_PLAYERS],
    pub score: [i32; MAX_PLAYERS],
    pub deaths: [i32; MAX_PLAYERS],
    pub connected: [bool; MAX_PLAYERS],
    pub team: [u8; MAX_PLAYERS],
    pub alive: [bool; MAX_PLAYERS],
    pub health: [u32; MAX_PLAYERS],
    pub player_id: [SteamId; MAX_PLAYERS],
    pub valid: [bool; MAX_PLAYERS],
    pub user_id: [u32; MAX_PLAYERS],
    pub loss: [u32; MAX_PLAYERS],
    pub state: [String; MAX_PLAYERS],
    pub address: [String; MAX_PLAYERS],
    pub connected_secs: [u32; MAX_PLAYERS],
}

impl Default for DumpPlayer {
    fn default() -> Self {
        Self {
            names: std::array::from_fn(|_| String::new()),
            ping: [0; MAX_PLAYERS],
            score: [0; MAX_PLAYERS],
            deaths: [0; MAX_PLAYERS],
            connected: [false; MAX_PLAYERS],
            team: [TEAM_UNASSIGNED; MAX_PLAYERS],
            alive: [false; MAX_PLAYERS],
            health: [0; MAX_PLAYERS],
            player_id: [SteamId::default(); MAX_PLAYERS],
            valid: [false; MAX_PLAYERS],
            user_id: [0; MAX_PLAYERS],
            loss: [0; MAX_PLAYERS],
            state: std::array::from_fn(|_| String::new()),
            address: std::array::from_fn(|_| String::new()),
            connected_secs: [0; MAX_PLAYERS],
        }
    }
}

impl DumpPlayer {
    /// Stores one parsed line. Unknown fields, out of range slots and values
    /// of the wrong type are ignored.
    pub fn apply(&mut self, line: &DumpLine) {
        let i = line.index;
        if i >= MAX_PLAYERS {
            return;
        }
        let v = &line.value;

        match line.field.as_str() {
            "m_szName" => {
                if let DumpValue::Str(s) = v {
                    self.names[i] = s.clone();
                }
            }
            "m_iPing" => {
                if let Some(n) = v.as_i64() {
                    self.ping[i] = n.max(0) as u32;
                }
            }
            "m_iScore" => {
                if let Some(n) = v.as_i64() {
                    self.score[i] = n as i32;
                }
            }
            "m_iDeaths" => {
                if let Some(n) = v.as_i64() {
                    self.deaths[i] = n as i32;
                }
            }
            "m_bConnected" => {
                if let Some(b) = v.as_bool() {
                    self.connected[i] = b;
                }
            }
            "m_iTeam" => {
                if let Some(n) = v.as_i64() {
                    self.team[i] = n.clamp(0, u8::MAX as i64) as u8;
                }
            }
            "m_bAlive" => {
                if let Some(b) = v.as_bool() {
                    self.alive[i] = b;
                }
            }
            "m_iHealth" => {
                if let Some(n) = v.as_i64() {
                    self.health[i] = n.max(0) as u32;
                }
            }
            "m_iAccountID" => {
                if let Some(n) = v.as_i64() {
                    self.player_id[i] = SteamId::from_account_id(n.clamp(0, u32::MAX as i64) as u32);
                }
            }
            "m_bValid" => {
                if let Some(b) = v.as_bool() {
                    self.valid[i] = b;
                }
            }
            "m_iUserID" => {
                if let Some(n) = v.as_i64() {
                    self.user_id[i] = n.max(0) as u32;
                }
            }
            _ => {}
        }
    }

    /// Slots holding a player: flagged valid and carrying a real identifier.
    pub fn occupied_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_PLAYERS).filter(|&i| self.valid[i] && self.player_id[i].is_valid())
    }

    pub fn slot_for_user_id(&self, user_id: u32) -> Option<usize> {
        self.occupied_slots().find(|&i| self.user_id[i] == user_id)
    }
}

/// Parses every dump line in `text`; anything else is skipped.
pub fn parse_dump(text: &str) -> DumpPlayer {
    let mut dump = DumpPlayer::default();
    for line in text.lines() {
        if let Ok(parsed) = parse_dump_line(line) {
            dump.apply(&parsed);
        }
    }
    dump
}
