//! Log line producers. Every source follows the same lifecycle: `open`, then
//! `start` until shutdown (pushing raw lines into the sink), then `close`.

use crate::error::{PacketError, TransportError};
use crate::rcon::RconClient;
use crate::shutdown::Shutdown;
use log::{debug, error, info, warn};
use std::io::{ErrorKind, SeekFrom};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::sleep;

pub const PACKET_HEADER: [u8; 4] = [0xFF; 4];
/// Unauthenticated log line.
pub const KIND_LEGACY: u8 = 0x52;
/// Log line carrying the shared secret.
pub const KIND_SECRET: u8 = 0x53;

/// Log every Nth legacy packet.
const LEGACY_WARN_EVERY: u64 = 10_000;
const TAIL_POLL: Duration = Duration::from_millis(100);

pub enum LogSource {
    Tail(TailSource),
    Remote(RemoteSource),
    Replay(ReplaySource),
}

impl LogSource {
    pub fn name(&self) -> &'static str {
        match self {
            LogSource::Tail(_) => "tail",
            LogSource::Remote(_) => "remote",
            LogSource::Replay(_) => "replay",
        }
    }

    pub async fn open(&mut self) -> Result<(), TransportError> {
        match self {
            LogSource::Tail(source) => source.open().await,
            LogSource::Remote(source) => source.open().await,
            LogSource::Replay(source) => source.open().await,
        }
    }

    /// Runs until shutdown fires, the sink closes, or (for replay) the
    /// recording is exhausted.
    pub async fn start(&mut self, shutdown: Shutdown, sink: mpsc::Sender<String>) -> Result<(), TransportError> {
        match self {
            LogSource::Tail(source) => source.start(shutdown, sink).await,
            LogSource::Remote(source) => source.start(shutdown, sink).await,
            LogSource::Replay(source) => source.start(shutdown, sink).await,
        }
    }

    pub async fn close(&mut self) {
        match self {
            LogSource::Tail(source) => source.close(),
            LogSource::Remote(source) => source.close().await,
            LogSource::Replay(source) => source.close(),
        }
    }
}

/// Follows a console log file from its current end.
pub struct TailSource {
    path: PathBuf,
    position: u64,
    pending: Vec<u8>,
}

impl TailSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            position: 0,
            pending: Vec::new(),
        }
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        self.pending.clear();
        self.position = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("{} does not exist yet, waiting for it", self.path.display());
                0
            }
            Err(e) => return Err(e.into()),
        };
        info!("Tailing {} from byte {}", self.path.display(), self.position);
        Ok(())
    }

    async fn start(&mut self, mut shutdown: Shutdown, sink: mpsc::Sender<String>) -> Result<(), TransportError> {
        loop {
            tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                _ = sleep(TAIL_POLL) => {}
            }

            let lines = match self.read_appended().await {
                Ok(lines) => lines,
                Err(e) => {
                    warn!("Failed reading {}: {}", self.path.display(), e);
                    continue;
                }
            };

            for line in lines {
                if sink.send(line).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    /// Reads whatever was appended since the last call and returns the
    /// complete lines. A shrunk or vanished file restarts from the beginning.
    async fn read_appended(&mut self) -> std::io::Result<Vec<String>> {
        let len = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.position > 0 {
                    info!("{} disappeared, waiting for it to return", self.path.display());
                }
                self.position = 0;
                self.pending.clear();
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        if len < self.position {
            info!("{} was truncated, reading from the start", self.path.display());
            self.position = 0;
            self.pending.clear();
        }
        if len == self.position {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.position)).await?;
        let mut buf = Vec::new();
        file.take(len - self.position).read_to_end(&mut buf).await?;
        self.position += buf.len() as u64;
        self.pending.extend_from_slice(&buf);

        Ok(drain_lines(&mut self.pending))
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

/// Removes every newline-terminated record from `buf`, leaving any partial
/// trailing record in place.
fn drain_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
        return Vec::new();
    };
    let rest = buf.split_off(last_newline + 1);
    let complete = std::mem::replace(buf, rest);

    complete
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPacket {
    pub legacy: bool,
    pub line: String,
}

/// Validates and unwraps one UDP log packet.
///
/// Layout: `FF FF FF FF`, kind byte, payload. Secret packets carry
/// `<decimal secret>L <line>`.
pub fn decode_log_packet(data: &[u8], secret: Option<i64>) -> Result<LogPacket, PacketError> {
    if data.len() < 6 {
        return Err(PacketError::TooShort(data.len()));
    }
    if data[..4] != PACKET_HEADER {
        return Err(PacketError::BadHeader);
    }

    let payload = String::from_utf8_lossy(&data[5..]);
    match data[4] {
        KIND_LEGACY => {
            if secret.is_some() {
                return Err(PacketError::Unauthenticated);
            }
            Ok(LogPacket {
                legacy: true,
                line: clean_line(&payload),
            })
        }
        KIND_SECRET => {
            let marker = payload.find("L ").ok_or(PacketError::MalformedSecret)?;
            let received: i64 = payload[..marker]
                .trim()
                .parse()
                .map_err(|_| PacketError::MalformedSecret)?;
            if let Some(expected) = secret {
                if received != expected {
                    return Err(PacketError::SecretMismatch(received));
                }
            }
            Ok(LogPacket {
                legacy: false,
                line: clean_line(&payload[marker..]),
            })
        }
        other => Err(PacketError::UnknownKind(other)),
    }
}

fn clean_line(text: &str) -> String {
    text.trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// Counts a legacy packet and warns on the first one and every
/// `LEGACY_WARN_EVERY` after it. Returns whether it warned.
fn note_legacy(count: &mut u64, addr: SocketAddr, rejected: bool) -> bool {
    let warned = *count % LEGACY_WARN_EVERY == 0;
    if warned {
        if rejected {
            warn!(
                "Discarding unauthenticated (0x52) log packets from {} because a log secret is set ({} seen)",
                addr,
                *count + 1
            );
        } else {
            warn!(
                "{} is sending unauthenticated (0x52) log packets; configure a log secret ({} seen)",
                addr,
                *count + 1
            );
        }
    }
    *count += 1;
    warned
}

/// Receives UDP log packets after registering our address with the game
/// server through RCON.
pub struct RemoteSource {
    listen: String,
    public_address: Option<String>,
    secret: Option<i64>,
    rcon: Arc<RconClient>,
    socket: Option<UdpSocket>,
    registered: Option<String>,
    legacy_packets: u64,
}

impl RemoteSource {
    pub fn new(listen: impl Into<String>, public_address: Option<String>, secret: Option<i64>, rcon: Arc<RconClient>) -> Self {
        Self {
            listen: listen.into(),
            public_address,
            secret,
            rcon,
            socket: None,
            registered: None,
            legacy_packets: 0,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Binds the socket (once) and registers it. A failed registration keeps
    /// the socket, so a retry does not collide with our own bound port.
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.socket.is_none() {
            let socket = UdpSocket::bind(&self.listen).await?;
            info!("Listening for remote logs on {}", socket.local_addr()?);
            self.socket = Some(socket);
        }
        let local = self.local_addr().ok_or(TransportError::NotOpen)?;

        let address = self.public_address.clone().unwrap_or_else(|| local.to_string());
        self.rcon.exec(&format!("logaddress_add {address}"), false).await?;

        let listed = self.rcon.exec("logaddress_list", false).await?;
        if !listed.lines().any(|l| l.trim() == address) {
            if let Err(e) = self.rcon.exec(&format!("logaddress_del {address}"), false).await {
                debug!("Cleanup of unverified log address {} failed: {}", address, e);
            }
            return Err(TransportError::NotRegistered(address));
        }

        info!("Registered {} as a log address on {}", address, self.rcon.address());
        self.registered = Some(address);
        Ok(())
    }

    async fn start(&mut self, mut shutdown: Shutdown, sink: mpsc::Sender<String>) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotOpen)?;
        let mut buffer = [0u8; 8192];

        loop {
            let (len, addr) = tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                received = socket.recv_from(&mut buffer) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        error!("Error receiving log packet: {}", e);
                        sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                },
            };

            match decode_log_packet(&buffer[..len], self.secret) {
                Ok(packet) => {
                    if packet.legacy {
                        note_legacy(&mut self.legacy_packets, addr, false);
                    }
                    if sink.send(packet.line).await.is_err() {
                        return Ok(());
                    }
                }
                Err(PacketError::Unauthenticated) => {
                    note_legacy(&mut self.legacy_packets, addr, true);
                }
                Err(PacketError::SecretMismatch(received)) => {
                    warn!("Discarding log packet from {} with wrong secret {}", addr, received);
                }
                Err(e) => debug!("Discarding log packet from {}: {}", addr, e),
            }
        }
    }

    /// Deregisters our log address (best effort) and releases the socket.
    async fn close(&mut self) {
        if let Some(address) = self.registered.take() {
            match self.rcon.exec(&format!("logaddress_del {address}"), false).await {
                Ok(_) => info!("Removed log address {}", address),
                Err(e) => warn!("Failed to remove log address {}: {}", address, e),
            }
        }
        self.socket = None;
    }
}

/// Plays a recorded log back at a fixed pace.
pub struct ReplaySource {
    path: PathBuf,
    interval: Duration,
    lines: Vec<String>,
}

impl ReplaySource {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            lines: Vec::new(),
        }
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let bytes = tokio::fs::read(&self.path).await?;
        self.lines = String::from_utf8_lossy(&bytes)
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .filter(|l| !l.is_empty())
            .collect();
        info!("Replaying {} lines from {}", self.lines.len(), self.path.display());
        Ok(())
    }

    async fn start(&mut self, mut shutdown: Shutdown, sink: mpsc::Sender<String>) -> Result<(), TransportError> {
        for line in std::mem::take(&mut self.lines) {
            tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                _ = sleep(self.interval) => {}
            }
            if sink.send(line).await.is_err() {
                return Ok(());
            }
        }
        info!("Replay of {} finished", self.path.display());
        Ok(())
    }

    fn close(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use std::io::Write;
    use tokio::time::timeout;

    fn packet(kind: u8, payload: &str) -> Vec<u8> {
        let mut data = PACKET_HEADER.to_vec();
        data.push(kind);
        data.extend_from_slice(payload.as_bytes());
        data
    }

    #[test]
    fn test_decode_secret_packet() {
        let data = packet(KIND_SECRET, "12345L 01/06/2023 - 22:05:24: Bob connected\n\0");
        let decoded = decode_log_packet(&data, Some(12345)).unwrap();
        assert!(!decoded.legacy);
        assert_eq!(decoded.line, "L 01/06/2023 - 22:05:24: Bob connected");
    }

    #[test]
    fn test_decode_wrong_secret() {
        let data = packet(KIND_SECRET, "999L 01/06/2023 - 22:05:24: Bob connected");
        assert_eq!(decode_log_packet(&data, Some(12345)), Err(PacketError::SecretMismatch(999)));
    }

    #[test]
    fn test_decode_malformed_secret() {
        let data = packet(KIND_SECRET, "abcL 01/06/2023 - 22:05:24: Bob connected");
        assert_eq!(decode_log_packet(&data, Some(1)), Err(PacketError::MalformedSecret));
        let data = packet(KIND_SECRET, "12345 no marker");
        assert_eq!(decode_log_packet(&data, Some(12345)), Err(PacketError::MalformedSecret));
    }

    #[test]
    fn test_decode_legacy_packet() {
        let data = packet(KIND_LEGACY, "L 01/06/2023 - 22:05:24: Bob connected\n");
        assert_eq!(
            decode_log_packet(&data, None).unwrap(),
            LogPacket {
                legacy: true,
                line: "L 01/06/2023 - 22:05:24: Bob connected".to_string()
            }
        );
        assert_eq!(decode_log_packet(&data, Some(1)), Err(PacketError::Unauthenticated));
    }

    #[test]
    fn test_decode_rejects_bad_framing() {
        assert_eq!(decode_log_packet(&[0xFF; 3], None), Err(PacketError::TooShort(3)));
        let mut data = packet(KIND_LEGACY, "x");
        data[0] = 0;
        assert_eq!(decode_log_packet(&data, None), Err(PacketError::BadHeader));
        assert_eq!(
            decode_log_packet(&packet(0x41, "x"), None),
            Err(PacketError::UnknownKind(0x41))
        );
    }

    #[test]
    fn test_drain_lines_keeps_partial_record() {
        let mut buf = b"one\r\ntwo\nthr".to_vec();
        assert_eq!(drain_lines(&mut buf), vec!["one".to_string(), "two".to_string()]);
        assert_eq!(buf, b"thr".to_vec());
        buf.extend_from_slice(b"ee\n");
        assert_eq!(drain_lines(&mut buf), vec!["three".to_string()]);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_tail_starts_at_end_and_follows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "old line").unwrap();
        file.flush().unwrap();

        let mut source = LogSource::Tail(TailSource::new(file.path()));
        source.open().await.unwrap();

        let (trigger, shutdown) = shutdown::channel();
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(async move { source.start(shutdown, tx).await });

        write!(file, "new line\npartial").unwrap();
        file.flush().unwrap();

        let line = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(line.as_deref(), Some("new line"));

        writeln!(file, " done").unwrap();
        file.flush().unwrap();
        let line = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(line.as_deref(), Some("partial done"));

        trigger.fire();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_tail_survives_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        std::fs::write(&path, "first session line\n").unwrap();

        let mut source = TailSource::new(&path);
        source.open().await.unwrap();

        std::fs::write(&path, "x\n").unwrap();
        assert_eq!(source.read_appended().await.unwrap(), vec!["x".to_string()]);

        std::fs::remove_file(&path).unwrap();
        assert!(source.read_appended().await.unwrap().is_empty());

        std::fs::write(&path, "after rotate\n").unwrap();
        assert_eq!(source.read_appended().await.unwrap(), vec!["after rotate".to_string()]);
    }

    #[tokio::test]
    async fn test_replay_emits_all_lines_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "a\nb\r\n\nc").unwrap();
        file.flush().unwrap();

        let mut source = LogSource::Replay(ReplaySource::new(file.path(), Duration::from_millis(1)));
        source.open().await.unwrap();

        let (_trigger, shutdown) = shutdown::channel();
        let (tx, mut rx) = mpsc::channel(16);
        source.start(shutdown, tx).await.unwrap();

        let mut received = Vec::new();
        while let Ok(line) = rx.try_recv() {
            received.push(line);
        }
        assert_eq!(received, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_decode_secret_packet_without_configured_secret() {
        let data = packet(KIND_SECRET, "777L 01/06/2023 - 22:05:24: Bob connected");
        let decoded = decode_log_packet(&data, None).unwrap();
        assert!(!decoded.legacy);
        assert_eq!(decoded.line, "L 01/06/2023 - 22:05:24: Bob connected");
    }

    #[test]
    fn test_legacy_warnings_are_rate_limited() {
        let addr: SocketAddr = "127.0.0.1:27015".parse().unwrap();
        let mut count = 0;
        let warned: Vec<u64> = (0..25_000u64)
            .filter(|_| note_legacy(&mut count, addr, false))
            .collect();
        assert_eq!(warned, vec![0, 10_000, 20_000]);
        assert_eq!(count, 25_000);
        assert!(note_legacy(&mut 30_000, addr, true));
    }

    #[tokio::test]
    async fn test_remote_open_retries_on_same_port() {
        let port = std::net::UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let rcon = Arc::new(RconClient::new("127.0.0.1:1", "", Duration::from_millis(200)));
        let mut source = RemoteSource::new(format!("127.0.0.1:{port}"), None, None, rcon);

        assert!(matches!(source.open().await, Err(TransportError::Registration(_))));
        assert!(matches!(source.open().await, Err(TransportError::Registration(_))));
        assert_eq!(source.local_addr().map(|a| a.port()), Some(port));
    }

    #[tokio::test]
    async fn test_remote_start_requires_open() {
        let rcon = Arc::new(RconClient::new("127.0.0.1:1", "", Duration::from_millis(100)));
        let mut source = LogSource::Remote(RemoteSource::new("127.0.0.1:0", None, None, rcon));
        let (_trigger, shutdown) = shutdown::channel();
        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(source.start(shutdown, tx).await, Err(TransportError::NotOpen)));
    }
}
