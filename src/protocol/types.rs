//! Reply values and their wire encoding.
//!
//! Every reply the server sends is one of the shapes below, each terminated
//! with CRLF:
//!
//! | Shape         | Wire form                      |
//! |---------------|--------------------------------|
//! | Simple string | `+OK\r\n`                      |
//! | Error         | `-ERR unknown command\r\n`     |
//! | Integer       | `:42\r\n`                      |
//! | Bulk string   | `$5\r\nhello\r\n`              |
//! | Null bulk     | `$-1\r\n`                      |
//! | Array         | `*2\r\n$1\r\na\r\n$1\r\nb\r\n` |
//!
//! Bulk string lengths are the exact byte length of the payload. Payloads are
//! never trimmed, so a value with leading or trailing spaces comes back
//! exactly as it was stored.

use bytes::Bytes;

/// The CRLF terminator that ends every primitive.
pub const CRLF: &[u8] = b"\r\n";

/// Wire encoding of the null bulk string.
pub const NULL_BULK: &[u8] = b"$-1\r\n";

/// Wire encoding of the empty bulk string.
pub const EMPTY_BULK: &[u8] = b"$0\r\n\r\n";

/// Type prefix bytes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A protocol value, used both for replies and for parsed requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+<text>\r\n`. CR and LF are replaced with spaces when encoded.
    SimpleString(String),

    /// `-<text>\r\n`. CR and LF are replaced with spaces when encoded.
    Error(String),

    /// `:<decimal>\r\n`
    Integer(i64),

    /// `$<len>\r\n<bytes>\r\n`
    BulkString(Bytes),

    /// Null bulk string, `$-1\r\n`.
    Null,

    /// `*<count>\r\n` followed by each element.
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a bulk string reply.
    ///
    /// # Example
    /// ```
    /// use pebblekv::protocol::RespValue;
    /// let bulk = RespValue::bulk_string("hello");
    /// assert_eq!(bulk.serialize(), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    /// Creates an array whose elements are all bulk strings.
    pub fn bulk_array<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        RespValue::Array(items.into_iter().map(RespValue::bulk_string).collect())
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Encodes the value into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Encodes the value, appending to `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_text(buf, prefix::SIMPLE_STRING, s),
            RespValue::Error(s) => write_text(buf, prefix::ERROR, s),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) if data.is_empty() => buf.extend_from_slice(EMPTY_BULK),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => buf.extend_from_slice(NULL_BULK),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Returns the text of a simple or bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

/// Writes a one-line text primitive. A line break inside `text` would end
/// the frame early, so CR and LF become spaces.
fn write_text(buf: &mut Vec<u8>, type_byte: u8, text: &str) {
    buf.push(type_byte);
    buf.extend(
        text.bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
    buf.extend_from_slice(CRLF);
}

#[inline]
fn write_line(buf: &mut Vec<u8>, type_byte: u8, body: &[u8]) {
    buf.push(type_byte);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_string_serialize() {
        assert_eq!(RespValue::simple_string("OK").serialize(), b"+OK\r\n");
        assert_eq!(RespValue::pong().serialize(), b"+PONG\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let value = RespValue::error("ERR unknown command 'FOO'");
        assert_eq!(value.serialize(), b"-ERR unknown command 'FOO'\r\n");
    }

    #[test]
    fn test_line_breaks_in_text_stay_inside_one_frame() {
        let value = RespValue::error("ERR unknown command 'FOO'\r\n+OK\r\n-X'");
        assert_eq!(value.serialize(), b"-ERR unknown command 'FOO'  +OK  -X'\r\n");

        let value = RespValue::simple_string("a\nb");
        assert_eq!(value.serialize(), b"+a b\r\n");
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(RespValue::integer(1000).serialize(), b":1000\r\n");
        assert_eq!(RespValue::integer(-42).serialize(), b":-42\r\n");
        assert_eq!(
            RespValue::integer(i64::MIN).serialize(),
            b":-9223372036854775808\r\n"
        );
    }

    #[test]
    fn test_bulk_string_serialize() {
        let value = RespValue::bulk_string("hello");
        assert_eq!(value.serialize(), b"$5\r\nhello\r\n");
    }

    #[test]
    fn test_bulk_string_keeps_surrounding_whitespace() {
        let value = RespValue::bulk_string("  padded ");
        assert_eq!(value.serialize(), b"$9\r\n  padded \r\n");
    }

    #[test]
    fn test_bulk_string_length_counts_bytes() {
        let value = RespValue::bulk_string("héllo");
        assert_eq!(value.serialize(), "$6\r\nhéllo\r\n".as_bytes());
    }

    #[test]
    fn test_empty_bulk_string_is_six_bytes() {
        let encoded = RespValue::bulk_string("").serialize();
        assert_eq!(encoded, b"$0\r\n\r\n");
        assert_eq!(encoded.len(), 6);
    }

    #[test]
    fn test_null_serialize() {
        let encoded = RespValue::null().serialize();
        assert_eq!(encoded, b"$-1\r\n");
        assert_eq!(encoded.len(), 5);
    }

    #[test]
    fn test_bulk_array_serialize() {
        let value = RespValue::bulk_array(["b", "a", "c"]);
        assert_eq!(
            value.serialize(),
            b"*3\r\n$1\r\nb\r\n$1\r\na\r\n$1\r\nc\r\n"
        );
        assert_eq!(RespValue::bulk_array(Vec::<Bytes>::new()).serialize(), b"*0\r\n");
    }
}
