//! RCON client: one persistent, authenticated TCP connection per server.
//!
//! Commands are serialised over the connection. Any I/O failure or timeout
//! drops the connection so the next `exec` dials again.

use crate::error::RconError;
use log::{debug, warn};
use rand::Rng;
use shared::rcon::{
    Frame, FRAGMENT_LIMIT, SERVERDATA_AUTH, SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND,
};
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

pub struct RconClient {
    address: String,
    password: String,
    timeout: Duration,
    conn: Mutex<Option<TcpStream>>,
}

impl RconClient {
    pub fn new(address: impl Into<String>, password: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Runs `command` and returns the response text.
    ///
    /// With `expect_large` the response is reassembled from every fragment
    /// carrying the request id until a fragment shorter than the fragment
    /// limit arrives.
    pub async fn exec(&self, command: &str, expect_large: bool) -> Result<String, RconError> {
        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(RconError::Closed);
        };

        let result = exec_on(stream, next_id(), command, expect_large, self.timeout).await;
        if result.is_err() {
            *guard = None;
        }
        result
    }

    /// Drops the connection, if any.
    pub async fn close(&self) {
        if let Some(mut stream) = self.conn.lock().await.take() {
            let _ = stream.shutdown().await;
        }
    }

    async fn connect(&self) -> Result<TcpStream, RconError> {
        debug!("Dialing rcon at {}", self.address);
        let mut stream =
            with_timeout(self.timeout, "connect", async { Ok(TcpStream::connect(&self.address).await?) })
                .await?;
        authenticate(&mut stream, next_id(), &self.password, self.timeout).await?;
        Ok(stream)
    }
}

fn next_id() -> i32 {
    rand::thread_rng().gen_range(1..i32::MAX)
}

async fn with_timeout<T, F>(limit: Duration, what: &'static str, fut: F) -> Result<T, RconError>
where
    F: Future<Output = Result<T, RconError>>,
{
    timeout(limit, fut).await.map_err(|_| RconError::Timeout(what))?
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), RconError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, RconError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(RconError::Closed),
        Err(e) => return Err(e.into()),
    }

    let size = Frame::read_size(header)?;
    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;
    Ok(Frame::decode(&payload)?)
}

/// Sends the password and waits for the auth response, skipping the empty
/// response value the server sends first.
pub async fn authenticate<S>(
    stream: &mut S,
    id: i32,
    password: &str,
    limit: Duration,
) -> Result<(), RconError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_frame(stream, &Frame::new(id, SERVERDATA_AUTH, password)).await?;

    loop {
        let frame = with_timeout(limit, "auth", read_frame(stream)).await?;
        if frame.kind != SERVERDATA_AUTH_RESPONSE {
            continue;
        }
        if frame.id == -1 {
            return Err(RconError::Auth);
        }
        if frame.id != id {
            warn!("rcon auth response id {} does not match request {}", frame.id, id);
        }
        return Ok(());
    }
}

/// Runs one command on an already authenticated stream.
pub async fn exec_on<S>(
    stream: &mut S,
    id: i32,
    command: &str,
    expect_large: bool,
    limit: Duration,
) -> Result<String, RconError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_frame(stream, &Frame::new(id, SERVERDATA_EXECCOMMAND, command)).await?;

    if !expect_large {
        let frame = with_timeout(limit, "read", read_frame(stream)).await?;
        if frame.id != id {
            warn!("rcon response id {} does not match request {}", frame.id, id);
        }
        return Ok(frame.body_text());
    }

    let mut response = Vec::new();
    loop {
        let frame = with_timeout(limit, "read", read_frame(stream)).await?;
        if frame.id != id {
            warn!("Skipping rcon fragment with id {} while reading {}", frame.id, id);
            continue;
        }
        let last = frame.body.len() < FRAGMENT_LIMIT;
        response.extend_from_slice(&frame.body);
        if last {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&response).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::rcon::SERVERDATA_RESPONSE_VALUE;
    use tokio_test::io::Builder;

    const LIMIT: Duration = Duration::from_secs(1);

    fn response(id: i32, body: &str) -> Vec<u8> {
        Frame::new(id, SERVERDATA_RESPONSE_VALUE, body).encode()
    }

    #[tokio::test]
    async fn test_exec_single_frame() {
        let mut stream = Builder::new()
            .write(&Frame::new(5, SERVERDATA_EXECCOMMAND, "echo hi").encode())
            .read(&response(5, "hi\n"))
            .build();

        let out = exec_on(&mut stream, 5, "echo hi", false, LIMIT).await.unwrap();
        assert_eq!(out, "hi\n");
    }

    #[tokio::test]
    async fn test_exec_id_mismatch_still_returns_body() {
        let mut stream = Builder::new()
            .write(&Frame::new(5, SERVERDATA_EXECCOMMAND, "status").encode())
            .read(&response(99, "body"))
            .build();

        let out = exec_on(&mut stream, 5, "status", false, LIMIT).await.unwrap();
        assert_eq!(out, "body");
    }

    #[tokio::test]
    async fn test_exec_large_reassembles_fragments() {
        let a = "a".repeat(FRAGMENT_LIMIT);
        let b = "b".repeat(FRAGMENT_LIMIT);
        let c = "c".repeat(120);

        let mut stream = Builder::new()
            .write(&Frame::new(8, SERVERDATA_EXECCOMMAND, "g15_dumpplayer").encode())
            .read(&response(8, &a))
            .read(&response(3, "stray"))
            .read(&response(8, &b))
            .read(&response(8, &c))
            .build();

        let out = exec_on(&mut stream, 8, "g15_dumpplayer", true, LIMIT).await.unwrap();
        assert_eq!(out.len(), 8120);
        assert_eq!(out, format!("{a}{b}{c}"));
    }

    #[tokio::test]
    async fn test_exec_large_joins_split_utf8() {
        let mut first = "a".repeat(FRAGMENT_LIMIT - 1).into_bytes();
        let e_acute = "é".as_bytes();
        first.push(e_acute[0]);
        let mut second = vec![e_acute[1]];
        second.extend_from_slice(b"bbbbbbbbbb");

        let mut stream = Builder::new()
            .write(&Frame::new(4, SERVERDATA_EXECCOMMAND, "g15_dumpplayer").encode())
            .read(&Frame::new(4, SERVERDATA_RESPONSE_VALUE, first).encode())
            .read(&Frame::new(4, SERVERDATA_RESPONSE_VALUE, second).encode())
            .build();

        let out = exec_on(&mut stream, 4, "g15_dumpplayer", true, LIMIT).await.unwrap();
        assert_eq!(out.len(), 4011);
        assert_eq!(out, format!("{}ébbbbbbbbbb", "a".repeat(FRAGMENT_LIMIT - 1)));
    }

    #[tokio::test]
    async fn test_authenticate_skips_empty_value() {
        let mut stream = Builder::new()
            .write(&Frame::new(11, SERVERDATA_AUTH, "secret").encode())
            .read(&response(11, ""))
            .read(&Frame::new(11, SERVERDATA_AUTH_RESPONSE, "").encode())
            .build();

        authenticate(&mut stream, 11, "secret", LIMIT).await.unwrap();
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let mut stream = Builder::new()
            .write(&Frame::new(11, SERVERDATA_AUTH, "wrong").encode())
            .read(&response(11, ""))
            .read(&Frame::new(-1, SERVERDATA_AUTH_RESPONSE, "").encode())
            .build();

        let err = authenticate(&mut stream, 11, "wrong", LIMIT).await.unwrap_err();
        assert!(matches!(err, RconError::Auth));
    }

    #[tokio::test]
    async fn test_read_frame_eof_is_closed() {
        let mut stream = Builder::new().build();
        assert!(matches!(read_frame(&mut stream).await, Err(RconError::Closed)));
    }
}
