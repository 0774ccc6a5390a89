use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Offset between a 32-bit account id and the individual-account 64-bit id.
const INDIVIDUAL_BASE: u64 = 76_561_197_960_265_728;

/// 64-bit player identifier.
///
/// Zero is the "empty slot" value used by dump arrays; use [`SteamId::is_valid`]
/// before treating an id as a real player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SteamId(pub u64);

impl SteamId {
    pub fn from_account_id(account_id: u32) -> Self {
        if account_id == 0 {
            return SteamId(0);
        }
        SteamId(INDIVIDUAL_BASE + account_id as u64)
    }

    pub fn account_id(&self) -> u32 {
        self.0.saturating_sub(INDIVIDUAL_BASE) as u32
    }

    pub fn is_valid(&self) -> bool {
        self.0 > INDIVIDUAL_BASE && self.0 <= INDIVIDUAL_BASE + u32::MAX as u64
    }

    /// Formats as `[U:1:<account>]`, the form used by `status` output.
    pub fn to_steam3(&self) -> String {
        format!("[U:1:{}]", self.account_id())
    }
}

impl fmt::Display for SteamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SteamId {
    type Err = ParseError;

    /// Accepts `[U:1:123]`, `U:1:123`, a bare 64-bit id or a bare account id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('[').trim_end_matches(']');
        if let Some(rest) = trimmed.strip_prefix("U:") {
            let account = rest
                .split(':')
                .nth(1)
                .and_then(|v| v.parse::<u32>().ok())
                .ok_or_else(|| ParseError::malformed("steam id", s))?;
            return Ok(SteamId::from_account_id(account));
        }

        let value = trimmed
            .parse::<u64>()
            .map_err(|_| ParseError::malformed("steam id", s))?;
        if value > u32::MAX as u64 {
            Ok(SteamId(value))
        } else {
            Ok(SteamId::from_account_id(value as u32))
        }
    }
}
