//! Wire protocol codec.
//!
//! - `types`: the [`RespValue`] reply type and its encoder
//! - `parser`: strict primitive decoders and the incremental request parser
//!
//! ## Example
//!
//! ```
//! use pebblekv::protocol::{decode_integer, parse_message, RespValue};
//!
//! // Requests arrive as inline lines (or RESP arrays).
//! let (request, consumed) = parse_message(b"INCR visits\r\n").unwrap().unwrap();
//! assert_eq!(consumed, 13);
//! assert!(matches!(request, RespValue::Array(ref parts) if parts.len() == 2));
//!
//! // Replies are encoded byte-exactly.
//! let reply = RespValue::integer(7).serialize();
//! assert_eq!(decode_integer(&reply).unwrap(), (7, 4));
//! ```

pub mod parser;
pub mod types;

pub use parser::{
    decode_array, decode_bulk_string, decode_error, decode_integer, decode_simple_string,
    parse_message, ParseError, ParseResult, RespParser,
};
pub use types::RespValue;
