//! Orderer wire protocol.
//!
//! Every exchange is one request message followed by one text reply.
//!
//! ```text
//! u32 request_len | request[request_len]        "CONNECT" | "FRAGMENTS" | "DISCONNECT"
//! [u32 body_len   | body[body_len]]              omitted entirely when there is no body
//! ```
//!
//! The reply is a single `\n`-terminated line, `OK` on success or an error
//! description. Integers use native byte order.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};

use super::error::{OrdererError, Result};

/// Reply text signalling success.
pub const OK_REPLY: &str = "OK";

/// Request kinds understood by the orderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Register a source with its description and ids.
    Connect,
    /// Submit a chain of fragments.
    Fragments,
    /// Deregister before closing.
    Disconnect,
}

impl Request {
    /// Wire spelling of the request.
    pub fn as_str(self) -> &'static str {
        match self {
            Request::Connect => "CONNECT",
            Request::Fragments => "FRAGMENTS",
            Request::Disconnect => "DISCONNECT",
        }
    }

    /// Parse a wire request string.
    pub fn from_bytes(value: &[u8]) -> Option<Self> {
        match value {
            b"CONNECT" => Some(Request::Connect),
            b"FRAGMENTS" => Some(Request::Fragments),
            b"DISCONNECT" => Some(Request::Disconnect),
            _ => None,
        }
    }

    /// Whether a body section follows this request on the wire.
    pub fn has_body(self) -> bool {
        matches!(self, Request::Connect | Request::Fragments)
    }
}

/// One framed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub request: Request,
    pub body: Bytes,
}

impl Message {
    pub fn new(request: Request, body: Bytes) -> Self {
        Self { request, body }
    }

    pub fn disconnect() -> Self {
        Self::new(Request::Disconnect, Bytes::new())
    }

    pub fn encode(&self) -> Result<Bytes> {
        let request = self.request.as_str().as_bytes();
        let mut buf = BytesMut::with_capacity(8 + request.len() + self.body.len());

        buf.put_u32_ne(request.len() as u32);
        buf.put_slice(request);

        if !self.body.is_empty() {
            let body_len = u32::try_from(self.body.len()).map_err(|_| {
                OrdererError::TooLarge(format!("{} byte message body", self.body.len()))
            })?;
            buf.put_u32_ne(body_len);
            buf.put_slice(&self.body);
        }

        Ok(buf.freeze())
    }

    /// Write the framed message in a single `write_all`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let encoded = self.encode()?;
        out.write_all(&encoded)?;
        out.flush()?;
        Ok(())
    }

    /// Read one framed message (orderer side).
    ///
    /// Whether a body section follows is decided by the request kind.
    pub fn read_from<R: Read>(input: &mut R) -> io::Result<Self> {
        let request_len = read_u32(input)? as usize;
        let mut request = vec![0u8; request_len];
        input.read_exact(&mut request)?;

        let request = Request::from_bytes(&request).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown request {:?}", String::from_utf8_lossy(&request)),
            )
        })?;

        let body = if request.has_body() {
            let body_len = read_u32(input)? as usize;
            let mut body = vec![0u8; body_len];
            input.read_exact(&mut body)?;
            Bytes::from(body)
        } else {
            Bytes::new()
        };

        Ok(Self { request, body })
    }
}

/// Body of a `CONNECT` request.
///
/// ```text
/// description\0 | u32 count | count × u32 source_id
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectBody {
    pub description: String,
    pub source_ids: Vec<u32>,
}

impl ConnectBody {
    pub fn new(description: impl Into<String>, source_ids: &[u32]) -> Self {
        Self {
            description: description.into(),
            source_ids: source_ids.to_vec(),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        if self.description.as_bytes().contains(&0) {
            return Err(OrdererError::TooLarge(
                "description contains an interior NUL".to_string(),
            ));
        }
        let count = u32::try_from(self.source_ids.len())
            .map_err(|_| OrdererError::TooLarge(format!("{} source ids", self.source_ids.len())))?;

        let mut buf =
            BytesMut::with_capacity(self.description.len() + 5 + 4 * self.source_ids.len());
        buf.put_slice(self.description.as_bytes());
        buf.put_u8(0);
        buf.put_u32_ne(count);
        for id in &self.source_ids {
            buf.put_u32_ne(*id);
        }
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> std::result::Result<Self, String> {
        let nul = data
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| "description is not NUL-terminated".to_string())?;
        let description = String::from_utf8(data[..nul].to_vec()).map_err(|e| e.to_string())?;

        let mut rest = &data[nul + 1..];
        if rest.len() < 4 {
            return Err("Missing source count".to_string());
        }
        let count = rest.get_u32_ne() as usize;
        if rest.len() < count * 4 {
            return Err(format!(
                "Source id list truncated: {} ids declared, {} bytes left",
                count,
                rest.len()
            ));
        }
        let source_ids = (0..count).map(|_| rest.get_u32_ne()).collect();

        Ok(Self {
            description,
            source_ids,
        })
    }
}

/// Read a reply line byte by byte, up to and excluding the `\n`.
///
/// Reading one byte at a time never consumes data past the reply.
pub fn read_reply<R: Read>(input: &mut R) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        input.read_exact(&mut byte)?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Write a reply line (orderer side).
pub fn write_reply<W: Write>(out: &mut W, reply: &str) -> io::Result<()> {
    out.write_all(reply.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}

fn read_u32<R: Read>(input: &mut R) -> io::Result<u32> {
    let mut word = [0u8; 4];
    input.read_exact(&mut word)?;
    Ok(u32::from_ne_bytes(word))
}
