//! Command dispatch.
//!
//! ```text
//! request (RespValue::Array)
//!        │
//!        ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  name lookup, arity checks, SET modifiers
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐      ┌─────────────┐
//! │ StorageEngine   │      │ Snapshotter │ (SAVE)
//! └─────────────────┘      └─────────────┘
//! ```
//!
//! Commands: `PING`, `ECHO`, `SET`, `GET`, `EXISTS`, `DEL`, `INCR`, `DECR`,
//! `LPUSH`, `RPUSH`, `SAVE`.

pub mod handler;

pub use handler::CommandHandler;
