use crate::status::ServerStats;
use crate::steamid::SteamId;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Closed set of event classes a log line can be sorted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Kill,
    Msg,
    Connect,
    Disconnect,
    StatusLine,
    Hostname,
    Map,
    Tags,
    Address,
    Version,
    Stats,
    /// Unclassified lines; subscribing with this kind receives every event.
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillEvent {
    pub attacker: String,
    pub victim: String,
    pub weapon: String,
    pub crit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgEvent {
    pub name: String,
    pub message: String,
    pub team_only: bool,
    pub dead: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectEvent {
    pub name: String,
    pub reason: String,
}

/// One row of `status` output as echoed into the console log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
    pub user_id: u32,
    pub player_id: SteamId,
    pub name: String,
    pub connected: Duration,
    pub ping: u32,
    pub loss: u32,
    pub state: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Kill(KillEvent),
    Msg(MsgEvent),
    Connect { name: String },
    Disconnect(DisconnectEvent),
    StatusLine(StatusLine),
    Hostname(String),
    Map(String),
    Tags(Vec<String>),
    Address(String),
    Version(u32),
    Stats(ServerStats),
    Any,
}

/// A classified log line. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: Option<NaiveDateTime>,
    pub raw: String,
    pub payload: Payload,
}

impl Event {
    pub fn new(timestamp: Option<NaiveDateTime>, raw: impl Into<String>, payload: Payload) -> Self {
        Self {
            timestamp,
            raw: raw.into(),
            payload,
        }
    }

    /// Wraps text no matcher recognised so it still reaches `Any` subscribers.
    pub fn unclassified(raw: impl Into<String>) -> Self {
        Self::new(None, raw, Payload::Any)
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            Payload::Kill(_) => EventKind::Kill,
            Payload::Msg(_) => EventKind::Msg,
            Payload::Connect { .. } => EventKind::Connect,
            Payload::Disconnect(_) => EventKind::Disconnect,
            Payload::StatusLine(_) => EventKind::StatusLine,
            Payload::Hostname(_) => EventKind::Hostname,
            Payload::Map(_) => EventKind::Map,
            Payload::Tags(_) => EventKind::Tags,
            Payload::Address(_) => EventKind::Address,
            Payload::Version(_) => EventKind::Version,
            Payload::Stats(_) => EventKind::Stats,
            Payload::Any => EventKind::Any,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_follows_payload() {
        let event = Event::new(None, "x", Payload::Map("pl_upward".to_string()));
        assert_eq!(event.kind(), EventKind::Map);
        assert_eq!(Event::unclassified("junk").kind(), EventKind::Any);
    }
}
