//! Command-line configuration.
//!
//! Every option can also come from the environment (`TRACKER_*`), and the
//! RCON password from `RCON_PASSWORD`. Validation happens once, up front, in
//! [`Config::server_configs`]; nothing is spawned with a bad configuration.

use crate::error::ConfigError;
use crate::fetcher::FetchMode;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Where a tracked server's log lines come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Follow a local console log file.
    Tail,
    /// Receive UDP log packets from the game server.
    Remote,
    /// Play back a recorded log file.
    Replay,
    /// No log lines, dumps only.
    None,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "tracker", about = "Live player roster for game servers", version)]
pub struct Config {
    /// RCON address of a server to track (repeat for several servers)
    #[arg(short = 'a', long = "rcon-address", env = "TRACKER_RCON_ADDRESS", value_delimiter = ',', default_value = "127.0.0.1:27015")]
    pub rcon_addresses: Vec<String>,

    /// RCON password shared by the tracked servers
    #[arg(short = 'p', long, env = "RCON_PASSWORD", default_value = "", hide_env_values = true)]
    pub rcon_password: String,

    /// Dump command set: `client` for a local game client, `server` for a dedicated server
    #[arg(short, long, env = "TRACKER_MODE", value_enum, default_value = "client")]
    pub mode: FetchMode,

    /// Log line source
    #[arg(short, long, env = "TRACKER_SOURCE", value_enum, default_value = "tail")]
    pub source: SourceKind,

    /// Console log to tail or recording to replay
    #[arg(short, long, env = "TRACKER_LOG_PATH")]
    pub log_path: Option<PathBuf>,

    /// UDP address to receive remote logs on; the port is offset by the server index
    #[arg(long, env = "TRACKER_LISTEN", default_value = "0.0.0.0:27115")]
    pub listen: String,

    /// Address the game server should send logs to, if it differs from the listen address
    #[arg(long, env = "TRACKER_PUBLIC_ADDRESS")]
    pub public_address: Option<String>,

    /// Shared secret expected in authenticated log packets
    #[arg(long, env = "TRACKER_LOG_SECRET")]
    pub log_secret: Option<i64>,

    /// Delay between replayed lines in milliseconds
    #[arg(long, env = "TRACKER_REPLAY_INTERVAL_MS", default_value = "50")]
    pub replay_interval_ms: u64,

    /// Print roster snapshots as JSON lines
    #[arg(long, env = "TRACKER_JSON")]
    pub json: bool,
}

/// Resolved log source for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Tail { path: PathBuf },
    Remote { listen: SocketAddr, public_address: Option<String> },
    Replay { path: PathBuf, interval: Duration },
    None,
}

/// Everything needed to track one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub rcon_address: String,
    pub rcon_password: String,
    pub mode: FetchMode,
    pub log_secret: Option<i64>,
    pub source: SourceConfig,
}

/// Loop timings and limits shared by every tracked server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    pub dump_interval: Duration,
    pub expire_interval: Duration,
    pub player_timeout: Duration,
    pub rcon_timeout: Duration,
    pub enrichment_timeout: Duration,
    pub profile_refresh: Duration,
    /// Minimum gap before a player whose lookup failed is tried again.
    pub enrichment_retry: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            dump_interval: Duration::from_secs(shared::DUMP_INTERVAL_SECS),
            expire_interval: Duration::from_secs(shared::EXPIRE_INTERVAL_SECS),
            player_timeout: Duration::from_secs(shared::PLAYER_TIMEOUT_SECS),
            rcon_timeout: Duration::from_secs(1),
            enrichment_timeout: Duration::from_secs(10),
            profile_refresh: Duration::from_secs(60 * 60),
            enrichment_retry: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Resolves one [`ServerConfig`] per `--rcon-address`.
    pub fn server_configs(&self) -> Result<Vec<ServerConfig>, ConfigError> {
        let addresses: Vec<&str> = self
            .rcon_addresses
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect();
        if addresses.is_empty() {
            return Err(ConfigError::NoServers);
        }

        addresses
            .iter()
            .enumerate()
            .map(|(index, address)| {
                validate_address(address)?;
                Ok(ServerConfig {
                    rcon_address: address.to_string(),
                    rcon_password: self.rcon_password.clone(),
                    mode: self.mode,
                    log_secret: self.log_secret,
                    source: self.source_for(index)?,
                })
            })
            .collect()
    }

    fn source_for(&self, index: usize) -> Result<SourceConfig, ConfigError> {
        match self.source {
            SourceKind::Tail => Ok(SourceConfig::Tail {
                path: self.log_path.clone().ok_or(ConfigError::Missing("--log-path", "tail"))?,
            }),
            SourceKind::Replay => Ok(SourceConfig::Replay {
                path: self.log_path.clone().ok_or(ConfigError::Missing("--log-path", "replay"))?,
                interval: Duration::from_millis(self.replay_interval_ms),
            }),
            SourceKind::Remote => {
                let listen = offset_port(&self.listen, index)?;
                let public_address = match &self.public_address {
                    Some(public) => Some(offset_port(public, index)?.to_string()),
                    None => None,
                };
                Ok(SourceConfig::Remote { listen, public_address })
            }
            SourceKind::None => Ok(SourceConfig::None),
        }
    }
}

/// `host:port` with a non-empty host and a numeric port.
fn validate_address(address: &str) -> Result<(), ConfigError> {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(ConfigError::InvalidAddress(address.to_string())),
    }
}

/// Shifts the port so every server gets its own socket. Port 0 stays 0.
fn offset_port(address: &str, index: usize) -> Result<SocketAddr, ConfigError> {
    let mut addr: SocketAddr = address
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(address.to_string()))?;
    if addr.port() != 0 {
        let port = u16::try_from(index)
            .ok()
            .and_then(|i| addr.port().checked_add(i))
            .ok_or_else(|| ConfigError::InvalidAddress(address.to_string()))?;
        addr.set_port(port);
    }
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("tracker").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_tail_requires_log_path() {
        let config = parse(&["--source", "tail"]);
        assert_eq!(config.server_configs(), Err(ConfigError::Missing("--log-path", "tail")));

        let config = parse(&["--source", "tail", "--log-path", "/tmp/console.log"]);
        let servers = config.server_configs().unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].rcon_address, "127.0.0.1:27015");
        assert_eq!(servers[0].mode, FetchMode::Client);
    }

    #[test]
    fn test_remote_ports_are_offset_per_server() {
        let config = parse(&[
            "--source",
            "remote",
            "--mode",
            "server",
            "-a",
            "10.0.0.1:27015",
            "-a",
            "10.0.0.2:27015",
            "--listen",
            "0.0.0.0:27500",
            "--public-address",
            "203.0.113.9:27500",
            "--log-secret",
            "1234",
        ]);
        let servers = config.server_configs().unwrap();

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].log_secret, Some(1234));
        assert_eq!(
            servers[1].source,
            SourceConfig::Remote {
                listen: "0.0.0.0:27501".parse().unwrap(),
                public_address: Some("203.0.113.9:27501".to_string()),
            }
        );
    }

    #[test]
    fn test_invalid_addresses_are_rejected() {
        let config = parse(&["--source", "none", "-a", "nohost"]);
        assert_eq!(config.server_configs(), Err(ConfigError::InvalidAddress("nohost".to_string())));

        let config = parse(&["--source", "remote", "--listen", "not an address"]);
        assert!(matches!(config.server_configs(), Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_empty_server_list_is_fatal() {
        let config = parse(&["--source", "none", "-a", " "]);
        assert_eq!(config.server_configs(), Err(ConfigError::NoServers));
    }

    #[test]
    fn test_default_settings() {
        let settings = TrackerSettings::default();
        assert_eq!(settings.dump_interval, Duration::from_secs(2));
        assert_eq!(settings.expire_interval, Duration::from_secs(1));
        assert_eq!(settings.player_timeout, Duration::from_secs(30));
        assert_eq!(settings.enrichment_timeout, Duration::from_secs(10));
        assert_eq!(settings.enrichment_retry, Duration::from_secs(60));
    }
}
