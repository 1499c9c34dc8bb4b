//! Keyspace storage, expiry and snapshots.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        StorageEngine         │◄──── commands (one lock hold each)
//! │  Mutex<HashMap<key, Entry>>  │
//! └──────────────────────────────┘
//!        ▲                ▲
//!        │                │
//! ┌──────┴───────┐ ┌──────┴───────┐
//! │ExpirySweeper │ │ Snapshotter  │
//! │ (tokio task) │ │ SAVE / load  │
//! └──────────────┘ └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use pebblekv::storage::StorageEngine;
//! use chrono::{Duration, Utc};
//!
//! let engine = StorageEngine::new();
//! engine.set("session", "token123", Some(Utc::now() + Duration::hours(1)));
//! assert!(engine.exists("session"));
//!
//! engine.lpush("queue", vec!["a".into(), "b".into()]).unwrap();
//! assert_eq!(engine.list("queue").unwrap(), Some(vec!["b".into(), "a".into()]));
//! ```

pub mod engine;
pub mod expiry;
pub mod persistence;

pub use engine::{
    Entry, Keyspace, ListEnd, StorageEngine, StorageError, StorageResult, StorageStats, Value,
};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
pub use persistence::{PersistenceError, Snapshotter};
