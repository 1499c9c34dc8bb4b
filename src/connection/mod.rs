//! Client connections.
//!
//! Each accepted socket runs in its own Tokio task: read bytes, split off
//! complete requests, execute them, write replies. A client disconnect only
//! ends its own task; commands already dispatched always complete.
//!
//! ```ignore
//! use pebblekv::connection::{handle_connection, ConnectionStats};
//!
//! let stats = Arc::new(ConnectionStats::new());
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler.clone(), Arc::clone(&stats)));
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
