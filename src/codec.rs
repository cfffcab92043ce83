//! # Protocol Codec
//!
//! Wire framing between the front-end proxy and this server.
//!
//! A request is a netstring-wrapped header block followed by the body:
//!
//! ```text
//! <len>:CONTENT_LENGTH\05\0REQUEST_METHOD\0POST\0,hello
//! ```
//!
//! The header block holds NUL-separated key/value pairs. `CONTENT_LENGTH`
//! (default 0) says how many body bytes follow the trailing `,`.
//!
//! A response is plain CRLF-terminated `Key: Value` lines, a blank line, then
//! the body bytes.

use smallvec::SmallVec;
use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read, Write};

/// Default upper bound on the netstring header block
pub const DEFAULT_MAX_HEADER_BYTES: usize = 1 << 20;

/// Default upper bound on the request body
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 << 20;

/// Bytes reserved up front for a body; the rest grows as it arrives
const BODY_PREALLOC: usize = 64 * 1024;

/// Most proxies send 20-30 variables per request
pub const MAX_INLINE_HEADERS: usize = 32;

/// Longest length prefix we accept (enough for any `usize` we would allocate)
const MAX_LENGTH_DIGITS: usize = 10;

/// Framing failure. Fatal for the connection: no response is attempted.
#[derive(Debug)]
pub enum ProtocolError {
    /// A non-digit byte appeared before the `:` delimiter
    BadLengthPrefix(u8),
    /// The length prefix is empty, too long, or above the configured limit
    LengthOutOfRange(String),
    /// The byte after the header block was not `,`
    MissingComma(u8),
    /// A header key had no matching value
    DanglingKey(String),
    /// `CONTENT_LENGTH` is not a decimal integer
    BadContentLength(String),
    /// The peer closed the stream before the frame was complete
    Truncated {
        /// Which part of the frame was being read
        stage: &'static str,
    },
    /// Underlying read failure
    Io(io::Error),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadLengthPrefix(b) => {
                write!(f, "non-digit byte 0x{b:02x} in netstring length")
            }
            ProtocolError::LengthOutOfRange(len) => {
                write!(f, "netstring length '{len}' out of range")
            }
            ProtocolError::MissingComma(b) => {
                write!(f, "expected ',' after header block, got 0x{b:02x}")
            }
            ProtocolError::DanglingKey(key) => write!(f, "header '{key}' has no value"),
            ProtocolError::BadContentLength(v) => write!(f, "invalid CONTENT_LENGTH '{v}'"),
            ProtocolError::Truncated { stage } => {
                write!(f, "connection closed while reading {stage}")
            }
            ProtocolError::Io(e) => write!(f, "read failed: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Incoming header multimap.
///
/// Insertion order is preserved. A key repeated in the block keeps its first
/// position and takes the later value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: SmallVec<[(String, String); MAX_INLINE_HEADERS]>,
}

impl HeaderMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Declared body length, 0 when the header is absent
    pub fn content_length(&self) -> Result<usize, ProtocolError> {
        match self.get("CONTENT_LENGTH") {
            None => Ok(0),
            Some(v) if v.trim().is_empty() => Ok(0),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| ProtocolError::BadContentLength(v.to_string())),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Size limits applied while decoding a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Largest accepted netstring header block
    pub max_header_bytes: usize,
    /// Largest accepted `CONTENT_LENGTH`
    pub max_body_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// One decoded request frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Read one request frame.
///
/// Reads the length prefix byte by byte so nothing past the frame is
/// consumed from the stream. The body buffer grows with the bytes actually
/// received, never with what `CONTENT_LENGTH` claims.
pub fn decode<R: Read>(reader: &mut R, limits: &FrameLimits) -> Result<RequestFrame, ProtocolError> {
    let len = read_length_prefix(reader, limits.max_header_bytes)?;

    let mut block = vec![0u8; len];
    read_exact(reader, &mut block, "header block")?;

    let mut comma = [0u8; 1];
    read_exact(reader, &mut comma, "netstring terminator")?;
    if comma[0] != b',' {
        return Err(ProtocolError::MissingComma(comma[0]));
    }

    let headers = parse_header_block(&block)?;

    let content_length = headers.content_length()?;
    if content_length > limits.max_body_bytes {
        return Err(ProtocolError::LengthOutOfRange(content_length.to_string()));
    }
    let body = read_body(reader, content_length)?;

    Ok(RequestFrame { headers, body })
}

fn read_body<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::with_capacity(len.min(BODY_PREALLOC));
    (&mut *reader)
        .take(len as u64)
        .read_to_end(&mut body)
        .map_err(ProtocolError::Io)?;
    if body.len() < len {
        return Err(ProtocolError::Truncated { stage: "body" });
    }
    Ok(body)
}

fn read_length_prefix<R: Read>(reader: &mut R, max: usize) -> Result<usize, ProtocolError> {
    let mut digits = String::with_capacity(MAX_LENGTH_DIGITS);
    let mut byte = [0u8; 1];
    loop {
        read_exact(reader, &mut byte, "netstring length")?;
        match byte[0] {
            b':' => break,
            b @ b'0'..=b'9' => {
                if digits.len() == MAX_LENGTH_DIGITS {
                    digits.push(b as char);
                    return Err(ProtocolError::LengthOutOfRange(digits));
                }
                digits.push(b as char);
            }
            other => return Err(ProtocolError::BadLengthPrefix(other)),
        }
    }
    match digits.parse::<usize>() {
        Ok(len) if len <= max => Ok(len),
        _ => Err(ProtocolError::LengthOutOfRange(digits)),
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], stage: &'static str) -> Result<(), ProtocolError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ProtocolError::Truncated { stage },
        _ => ProtocolError::Io(e),
    })
}

fn parse_header_block(block: &[u8]) -> Result<HeaderMap, ProtocolError> {
    let mut parts: Vec<&[u8]> = block.split(|b| *b == 0).collect();
    if parts.last().is_some_and(|p| p.is_empty()) {
        parts.pop();
    }
    let mut headers = HeaderMap::new();
    let mut it = parts.into_iter();
    while let Some(key) = it.next() {
        let key = String::from_utf8_lossy(key).into_owned();
        let Some(value) = it.next() else {
            return Err(ProtocolError::DanglingKey(key));
        };
        headers.insert(key, String::from_utf8_lossy(value).into_owned());
    }
    Ok(headers)
}

/// Encode a request frame. The proxy side of the protocol; used by tests and
/// benchmarks to feed the decoder.
#[must_use]
pub fn encode_request(headers: &HeaderMap, body: &[u8]) -> Vec<u8> {
    let mut block = Vec::new();
    for (k, v) in headers.iter() {
        block.extend_from_slice(k.as_bytes());
        block.push(0);
        block.extend_from_slice(v.as_bytes());
        block.push(0);
    }
    let mut out = Vec::with_capacity(block.len() + body.len() + 12);
    out.extend_from_slice(block.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(&block);
    out.push(b',');
    out.extend_from_slice(body);
    out
}

/// Replace CR and LF so a value cannot end its header line early
#[must_use]
pub fn header_safe(value: &str) -> Cow<'_, str> {
    if value.contains(['\r', '\n']) {
        Cow::Owned(value.replace(['\r', '\n'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

/// Response header names are visible ASCII without `:`
#[must_use]
pub fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic() && b != b':')
}

/// Serialize a response header block (`Key: Value\r\n` lines + blank line)
#[must_use]
pub fn encode_response_head(headers: &[(String, String)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(headers.len() * 32 + 2);
    for (k, v) in headers {
        out.extend_from_slice(k.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(v.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Write a full response: head, flush, then body
pub fn write_response<W: Write>(w: &mut W, headers: &[(String, String)], body: &[u8]) -> io::Result<()> {
    w.write_all(&encode_response_head(headers))?;
    w.flush()?;
    w.write_all(body)?;
    w.flush()
}
