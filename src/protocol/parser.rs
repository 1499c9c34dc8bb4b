//! Request parsing and primitive decoding.
//!
//! Two layers live here:
//!
//! 1. **Strict decoders** (`decode_*`). Each decodes exactly one primitive from
//!    the front of its input and returns the value together with the number of
//!    bytes consumed. Anything that is not a complete, well-formed primitive of
//!    the requested type is an error, including truncated input
//!    ([`ParseError::Incomplete`]).
//!
//! 2. **[`RespParser`]**, the incremental request parser used by connections.
//!    A request is either an inline line of whitespace-separated tokens
//!    terminated by `\n` (an optional `\r` before it is dropped), or a RESP
//!    array of bulk strings as sent by standard clients. It returns:
//!    - `Ok(Some((value, consumed)))` when a full request is buffered
//!    - `Ok(None)` when more bytes are needed
//!    - `Err(ParseError)` when the buffered bytes can never form a request
//!
//! Requests are always returned as [`RespValue::Array`].

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors produced while decoding protocol data.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The input ends before the primitive does.
    #[error("incomplete input")]
    Incomplete,

    /// The leading type byte is not the one the decoder expects.
    #[error("expected type byte {expected:?}, found {found:?}")]
    UnexpectedPrefix { expected: char, found: char },

    /// Unknown type prefix byte inside an array.
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// A declared integer, length or count is not a base-10 integer.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Negative bulk string length other than -1.
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Negative array count other than -1.
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Missing CRLF, excessive nesting and similar framing violations.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Largest bulk string accepted (512 MB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted in a request.
pub const MAX_NESTING_DEPTH: usize = 32;

// ============================================================================
// Strict decoders
// ============================================================================

/// Decodes `+<text>\r\n`.
pub fn decode_simple_string(input: &[u8]) -> ParseResult<(String, usize)> {
    let (line, consumed) = read_line(input, prefix::SIMPLE_STRING)?;
    Ok((line.to_string(), consumed))
}

/// Decodes `-<text>\r\n`.
pub fn decode_error(input: &[u8]) -> ParseResult<(String, usize)> {
    let (line, consumed) = read_line(input, prefix::ERROR)?;
    Ok((line.to_string(), consumed))
}

/// Decodes `:<decimal>\r\n`.
pub fn decode_integer(input: &[u8]) -> ParseResult<(i64, usize)> {
    let (line, consumed) = read_line(input, prefix::INTEGER)?;
    Ok((parse_decimal(line)?, consumed))
}

/// Decodes `$<len>\r\n<bytes>\r\n`. The null bulk string `$-1\r\n` decodes
/// to `None`.
///
/// ```
/// use pebblekv::protocol::decode_bulk_string;
///
/// let (value, consumed) = decode_bulk_string(b"$5\r\nhello\r\n+OK\r\n").unwrap();
/// assert_eq!(value.as_deref(), Some(&b"hello"[..]));
/// assert_eq!(consumed, 11);
/// ```
pub fn decode_bulk_string(input: &[u8]) -> ParseResult<(Option<Bytes>, usize)> {
    let (line, header_len) = read_line(input, prefix::BULK_STRING)?;
    let length = parse_decimal(line)?;

    if length == -1 {
        return Ok((None, header_len));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total = header_len + length + CRLF.len();
    if input.len() < total {
        return Err(ParseError::Incomplete);
    }
    if &input[header_len + length..total] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&input[header_len..header_len + length]);
    Ok((Some(data), total))
}

/// Decodes `*<count>\r\n` followed by `count` bulk strings. The null array
/// `*-1\r\n` decodes to `None`; null elements decode to `None` entries.
pub fn decode_array(input: &[u8]) -> ParseResult<(Option<Vec<Option<Bytes>>>, usize)> {
    let (line, mut cursor) = read_line(input, prefix::ARRAY)?;
    let count = parse_decimal(line)?;

    if count == -1 {
        return Ok((None, cursor));
    }
    if count < 0 {
        return Err(ParseError::InvalidArrayLength(count));
    }

    let mut elements = Vec::with_capacity((count as usize).min(1024));
    for _ in 0..count {
        let (element, consumed) = decode_bulk_string(&input[cursor..])?;
        elements.push(element);
        cursor += consumed;
    }

    Ok((Some(elements), cursor))
}

/// Reads one `<type><body>\r\n` line and returns the body and the bytes used.
fn read_line(input: &[u8], expected: u8) -> ParseResult<(&str, usize)> {
    let first = *input.first().ok_or(ParseError::Incomplete)?;
    if first != expected {
        return Err(ParseError::UnexpectedPrefix {
            expected: expected as char,
            found: first as char,
        });
    }

    let end = find_crlf(&input[1..]).ok_or(ParseError::Incomplete)?;
    let body = std::str::from_utf8(&input[1..1 + end])
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

    Ok((body, 1 + end + CRLF.len()))
}

fn parse_decimal(s: &str) -> ParseResult<i64> {
    s.parse()
        .map_err(|_| ParseError::InvalidInteger(s.to_string()))
}

/// Position of the first `\r\n`, pointing at the `\r`.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Maps [`ParseError::Incomplete`] to `Ok(None)` for incremental callers.
fn incremental<T>(result: ParseResult<T>) -> ParseResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ParseError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

// ============================================================================
// Incremental request parser
// ============================================================================

/// Incremental parser for client requests.
///
/// ```
/// use pebblekv::protocol::{RespParser, RespValue};
///
/// let mut parser = RespParser::new();
/// let (request, consumed) = parser.parse(b"GET name\r\n").unwrap().unwrap();
/// assert_eq!(consumed, 10);
/// assert_eq!(
///     request,
///     RespValue::Array(vec![RespValue::bulk_string("GET"), RespValue::bulk_string("name")])
/// );
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one request from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        match buf.first() {
            None => Ok(None),
            Some(&prefix::ARRAY) => self.parse_value(buf),
            Some(_) => parse_inline(buf),
        }
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match first {
            prefix::SIMPLE_STRING => Ok(incremental(decode_simple_string(buf))?
                .map(|(s, n)| (RespValue::SimpleString(s), n))),
            prefix::ERROR => {
                Ok(incremental(decode_error(buf))?.map(|(s, n)| (RespValue::Error(s), n)))
            }
            prefix::INTEGER => {
                Ok(incremental(decode_integer(buf))?.map(|(i, n)| (RespValue::Integer(i), n)))
            }
            prefix::BULK_STRING => Ok(incremental(decode_bulk_string(buf))?.map(|(b, n)| {
                (b.map(RespValue::BulkString).unwrap_or(RespValue::Null), n)
            })),
            prefix::ARRAY => self.parse_array(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Arrays in requests may hold any element type, so this walks elements
    /// with the general parser rather than `decode_array`.
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((line, mut consumed)) = incremental(read_line(buf, prefix::ARRAY))? else {
            return Ok(None);
        };
        let count = parse_decimal(line)?;

        if count == -1 {
            return Ok(Some((RespValue::Null, consumed)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let mut elements = Vec::with_capacity((count as usize).min(1024));
        self.depth += 1;

        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, element_consumed)) => {
                    elements.push(value);
                    consumed += element_consumed;
                }
                None => return Ok(None),
            }
        }

        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Parses one newline-terminated line of whitespace-separated tokens.
///
/// A blank line yields an empty array.
fn parse_inline(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };

    let mut line = &buf[..newline];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }

    let line = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

    let tokens = line
        .split_ascii_whitespace()
        .map(|token| RespValue::BulkString(Bytes::copy_from_slice(token.as_bytes())))
        .collect();

    Ok(Some((RespValue::Array(tokens), newline + 1)))
}

/// Parses a single request from `buf`.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
