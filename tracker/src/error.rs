use shared::ParseError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RconError {
    #[error("rcon io error: {0}")]
    Io(#[from] io::Error),

    #[error("rcon {0} timed out")]
    Timeout(&'static str),

    #[error("rcon authentication rejected")]
    Auth,

    #[error("rcon protocol error: {0}")]
    Protocol(#[from] ParseError),

    #[error("rcon connection closed by peer")]
    Closed,

    #[error("no tracked server at index {0}")]
    UnknownServer(usize),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no successful dump fetch yet: {0}")]
    NoData(#[source] RconError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport io error: {0}")]
    Io(#[from] io::Error),

    #[error("log address registration failed: {0}")]
    Registration(#[from] RconError),

    #[error("server did not list {0} as a log address")]
    NotRegistered(String),

    #[error("transport is not open")]
    NotOpen,
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("enrichment timed out")]
    Timeout,

    #[error("enrichment source failed: {0}")]
    Source(String),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("recorder failed: {0}")]
    Sink(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no backing server configured")]
    NoServers,

    #[error("{0} is required for the {1} log source")]
    Missing(&'static str, &'static str),

    #[error("invalid address {0:?}")]
    InvalidAddress(String),
}

/// Reasons a UDP log packet is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("packet too short ({0} bytes)")]
    TooShort(usize),

    #[error("packet header is not 0xFFFFFFFF")]
    BadHeader,

    #[error("unknown packet kind 0x{0:02x}")]
    UnknownKind(u8),

    #[error("unauthenticated packet while a secret is configured")]
    Unauthenticated,

    #[error("packet secret is missing or not numeric")]
    MalformedSecret,

    #[error("packet secret {0} does not match")]
    SecretMismatch(i64),
}
