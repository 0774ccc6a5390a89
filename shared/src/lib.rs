pub mod dump;
pub mod error;
pub mod event;
pub mod parser;
pub mod rcon;
pub mod status;
pub mod steamid;

pub use dump::{parse_dump, parse_dump_line, DumpLine, DumpPlayer, DumpValue, MAX_PLAYERS};
pub use error::ParseError;
pub use event::{DisconnectEvent, Event, EventKind, KillEvent, MsgEvent, Payload, StatusLine};
pub use parser::parse;
pub use status::{parse_status, parse_stats_line, synthesize_dump, ServerStats, StatusInfo, StatusReport};
pub use steamid::SteamId;

/// Default interval between dump ticks.
pub const DUMP_INTERVAL_SECS: u64 = 2;
/// Default interval between expiry sweeps.
pub const EXPIRE_INTERVAL_SECS: u64 = 1;
/// A player not seen for longer than this is dropped from the roster.
pub const PLAYER_TIMEOUT_SECS: u64 = 30;
