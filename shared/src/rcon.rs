//! Source RCON framing: `i32 size | i32 id | i32 kind | body | NUL | NUL`,
//! all integers little-endian. `size` counts every byte after itself.

use crate::error::ParseError;

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// A response fragment with a body shorter than this is the last one.
pub const FRAGMENT_LIMIT: usize = 4000;

/// Upper bound accepted for the size field.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// id + kind + two NUL terminators.
const MIN_FRAME_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: i32,
    pub kind: i32,
    /// Raw body bytes. Large responses split anywhere, including inside a
    /// UTF-8 sequence, so decoding waits until fragments are joined.
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(id: i32, kind: i32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let size = MIN_FRAME_SIZE + self.body.len();
        let mut out = Vec::with_capacity(4 + size);
        out.extend_from_slice(&(size as i32).to_le_bytes());
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&self.kind.to_le_bytes());
        out.extend_from_slice(&self.body);
        out.extend_from_slice(&[0, 0]);
        out
    }

    /// Validates the leading size field and returns how many bytes follow it.
    pub fn read_size(header: [u8; 4]) -> Result<usize, ParseError> {
        let size = i32::from_le_bytes(header);
        if size < MIN_FRAME_SIZE as i32 || size as usize > MAX_FRAME_SIZE {
            return Err(ParseError::malformed("frame size", size.to_string()));
        }
        Ok(size as usize)
    }

    /// Decodes the bytes following the size field.
    pub fn decode(payload: &[u8]) -> Result<Self, ParseError> {
        if payload.len() < MIN_FRAME_SIZE {
            return Err(ParseError::malformed("frame length", payload.len().to_string()));
        }
        let id = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let kind = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let body = &payload[8..];
        let body = body.strip_suffix(&[0, 0]).unwrap_or(body);
        let body = body.strip_suffix(&[0]).unwrap_or(body);

        Ok(Self {
            id,
            kind,
            body: body.to_vec(),
        })
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
