//! # Roster Tracker Library
//!
//! This library keeps a live roster of the players on one or more game
//! servers. It combines two independent feeds: the server's console log,
//! classified line by line into typed events, and periodic RCON dumps of
//! every occupied player slot.
//!
//! ## Core Responsibilities
//!
//! ### Log Ingestion
//! A [`transport::LogSource`] produces raw lines from a tailed console log,
//! authenticated UDP log packets, or a recorded file. Lines pass through a
//! per-server [`router::Router`], which parses them and fans the resulting
//! events out to every subscriber.
//!
//! ### Dumps
//! A [`fetcher::DumpFetcher`] polls the server over RCON every couple of
//! seconds. Against a game client it reads `g15_dumpplayer`; against a
//! dedicated server it rebuilds the slots from `status` and `stats`. When a
//! poll fails the last good dump is reused, so a flaky connection never
//! blanks the roster.
//!
//! ### Reconciliation
//! [`state::ServerState`] merges dumps, routed status lines and enrichment
//! results into one row per player. Rows are created on first sighting and
//! removed only by the expiry sweep, once a player has gone unseen for the
//! timeout. A disconnect alone never deletes a row, so a map change keeps
//! accumulated reputation data.
//!
//! ### Enrichment
//! Reputation lists and profile lookups sit behind
//! [`enrichment::ReputationSource`]. At most one lookup pass runs per server.
//!
//! ## Architecture
//!
//! [`manager::Manager`] owns one [`manager::TrackedServer`] per configured
//! address, and each server runs its own workers on the tokio runtime:
//! ingestion, dump ticks, expiry sweeps and an event consumer. Servers share
//! no locks. Every worker watches a [`shutdown::Shutdown`] signal and exits
//! when the composition root fires it.

pub mod config;
pub mod enrichment;
pub mod error;
pub mod fetcher;
pub mod manager;
pub mod rcon;
pub mod recorder;
pub mod router;
pub mod shutdown;
pub mod state;
pub mod transport;

pub use config::{Config, ServerConfig, SourceConfig, SourceKind, TrackerSettings};
pub use enrichment::{Match, NoReputation, Profile, ReputationSource};
pub use fetcher::{DumpFetcher, DumpResult, FetchMode};
pub use manager::{Manager, TrackedServer};
pub use rcon::RconClient;
pub use router::Router;
pub use state::{Player, PlayerUpdate, ServerSnapshot, ServerState};
