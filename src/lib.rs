//! # PebbleKV
//!
//! A single-node, in-memory key-value server. Clients send one command per
//! line; replies use the RESP wire encoding. Keys can carry an expiry
//! deadline, and `SAVE` writes the whole keyspace to a JSON snapshot that is
//! loaded again at startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                           PebbleKV                            │
//! │                                                               │
//! │  ┌────────────┐    ┌────────────┐    ┌────────────────┐       │
//! │  │ TCP accept │───>│ Connection │───>│ CommandHandler │       │
//! │  │   loop     │    │   task     │    │                │       │
//! │  └────────────┘    └─────┬──────┘    └───────┬────────┘       │
//! │                          │                   │                │
//! │                    ┌─────▼──────┐    ┌───────▼────────┐       │
//! │                    │ RespParser │    │ StorageEngine  │       │
//! │                    │ RespValue  │    │ Mutex<keyspace>│       │
//! │                    └────────────┘    └───────▲────────┘       │
//! │                                              │                │
//! │                           ┌──────────────────┴─────────┐      │
//! │                           │ ExpirySweeper  Snapshotter │      │
//! │                           └────────────────────────────┘      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Commands
//!
//! - `PING`
//! - `ECHO text...`
//! - `SET key value... [EX seconds | PX ms | EXAT unix | PXAT unix_ms]`
//! - `GET key`
//! - `EXISTS key`
//! - `DEL key...`
//! - `INCR key` / `DECR key`
//! - `LPUSH key value...` / `RPUSH key value...`
//! - `SAVE`
//!
//! ## Expiry
//!
//! Deadlines are checked on every access, so an expired key is never
//! visible. A background sweep also removes expired keys once per interval
//! so keys nobody reads again do not pile up.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pebblekv::{CommandHandler, Snapshotter, StorageEngine};
//! use pebblekv::connection::{handle_connection, ConnectionStats};
//! use pebblekv::storage::start_expiry_sweeper;
//!
//! let snapshotter = Arc::new(Snapshotter::new("dump.json"));
//! let storage = Arc::new(StorageEngine::from_keyspace(snapshotter.load()));
//! let _sweeper = start_expiry_sweeper(Arc::clone(&storage));
//! let handler = CommandHandler::new(storage, snapshotter);
//!
//! let listener = TcpListener::bind("127.0.0.1:6379").await?;
//! loop {
//!     let (stream, addr) = listener.accept().await?;
//!     tokio::spawn(handle_connection(stream, addr, handler.clone(), stats.clone()));
//! }
//! ```

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod storage;

pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, RespParser, RespValue};
pub use storage::{
    start_expiry_sweeper, ExpiryConfig, ExpirySweeper, Snapshotter, StorageEngine,
};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 6379;

/// Default bind address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
