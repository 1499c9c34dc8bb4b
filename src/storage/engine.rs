//! Keyspace storage with expiry support.
//!
//! The whole keyspace sits behind one [`Mutex`]. Every operation takes the
//! lock exactly once and finishes before releasing it, so a command never
//! observes or leaves a half-applied state, and the expiry reaper and
//! snapshot writer serialize against commands in the same way.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 StorageEngine                 │
//! │  Mutex<HashMap<String, Entry>>                │
//! │     Entry { value: Scalar | List, expiry }    │
//! └───────────────────────────────────────────────┘
//!      ▲               ▲                 ▲
//!  commands       expiry reaper     SAVE / load
//! ```
//!
//! Expired entries are treated as absent by every operation, whether or not
//! the reaper has removed them yet. Operations that find an expired entry
//! remove it on the spot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// The full mapping from key to entry.
pub type Keyspace = HashMap<String, Entry>;

/// A stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Opaque text, parsed as a base-10 `i64` by INCR/DECR.
    Scalar(String),
    /// Ordered sequence with head and tail insertion.
    List(VecDeque<String>),
}

/// A value plus its optional absolute deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub value: Value,
    /// `None` means the entry never expires.
    pub expiry: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expiry: None,
        }
    }

    pub fn with_expiry(value: Value, expiry: Option<DateTime<Utc>>) -> Self {
        Self { value, expiry }
    }

    /// True once the deadline is at or before `now`.
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|deadline| deadline <= now)
    }
}

/// Failures of keyspace operations. The messages are the error replies sent
/// to clients.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The key holds a different kind of value than the command needs.
    #[error("WRONGTYPE value is not a {expected}")]
    WrongType { expected: &'static str },

    #[error("ERR value is not an integer")]
    NotAnInteger,

    #[error("ERR increment or decrement would overflow")]
    Overflow,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Which end of a list to insert at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    Head,
    Tail,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Keys currently held, including expired ones not yet removed.
    pub keys: u64,
    /// Keys removed because their deadline passed.
    pub expired: u64,
}

/// The keyspace engine shared by all connections.
///
/// Wrap it in an `Arc` to share it between connection tasks, the expiry
/// reaper and the snapshot writer.
///
/// # Example
///
/// ```
/// use pebblekv::storage::StorageEngine;
///
/// let engine = StorageEngine::new();
/// engine.set("name", "Ariz", None);
/// assert_eq!(engine.get("name"), Ok(Some("Ariz".to_string())));
/// assert_eq!(engine.incr_by("hits", 1), Ok(1));
/// ```
#[derive(Debug, Default)]
pub struct StorageEngine {
    keyspace: Mutex<Keyspace>,
    expired_count: AtomicU64,
}

impl StorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine holding a previously restored keyspace.
    ///
    /// Deadlines are not checked here; stale entries are dropped on first
    /// access or by the next sweep.
    pub fn from_keyspace(keyspace: Keyspace) -> Self {
        Self {
            keyspace: Mutex::new(keyspace),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Acquires the keyspace lock.
    ///
    /// Every operation leaves the map consistent before it can panic, so a
    /// poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Keyspace> {
        self.keyspace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes `key` if its deadline has passed. Returns true if it did.
    fn purge_if_expired(&self, keyspace: &mut Keyspace, key: &str, now: DateTime<Utc>) -> bool {
        if keyspace.get(key).is_some_and(|e| e.is_expired_at(now)) {
            keyspace.remove(key);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Runs `f` against the live entry for `key`, if any, under the lock.
    fn with_live_entry<R>(&self, key: &str, f: impl FnOnce(Option<&mut Entry>) -> R) -> R {
        let mut keyspace = self.lock();
        self.purge_if_expired(&mut keyspace, key, Utc::now());
        f(keyspace.get_mut(key))
    }

    /// Stores a scalar, replacing any previous entry and deadline.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>, expiry: Option<DateTime<Utc>>) {
        let entry = Entry::with_expiry(Value::Scalar(value.into()), expiry);
        self.lock().insert(key.into(), entry);
    }

    /// Returns the scalar stored at `key`.
    pub fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.with_live_entry(key, |entry| match entry {
            None => Ok(None),
            Some(Entry {
                value: Value::Scalar(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(StorageError::WrongType { expected: "string" }),
        })
    }

    /// Reports whether `key` holds a live entry. Expired keys count as absent.
    pub fn exists(&self, key: &str) -> bool {
        self.with_live_entry(key, |entry| entry.is_some())
    }

    /// Deletes every listed key that is present. Returns how many were removed.
    pub fn delete_many<S: AsRef<str>>(&self, keys: &[S]) -> u64 {
        let mut keyspace = self.lock();
        let now = Utc::now();

        let mut deleted = 0;
        for key in keys {
            let key = key.as_ref();
            if self.purge_if_expired(&mut keyspace, key, now) {
                continue;
            }
            if keyspace.remove(key).is_some() {
                deleted += 1;
            }
        }
        deleted
    }

    /// Adds `delta` to the integer stored at `key`.
    ///
    /// A missing key is created holding `delta`. An existing deadline is kept.
    /// On error the stored value is left untouched.
    pub fn incr_by(&self, key: &str, delta: i64) -> StorageResult<i64> {
        let mut keyspace = self.lock();
        self.purge_if_expired(&mut keyspace, key, Utc::now());

        match keyspace.get_mut(key) {
            None => {
                keyspace.insert(key.to_string(), Entry::new(Value::Scalar(delta.to_string())));
                Ok(delta)
            }
            Some(Entry {
                value: Value::Scalar(current),
                ..
            }) => {
                let n: i64 = current.parse().map_err(|_| StorageError::NotAnInteger)?;
                let updated = n.checked_add(delta).ok_or(StorageError::Overflow)?;
                *current = updated.to_string();
                Ok(updated)
            }
            Some(_) => Err(StorageError::WrongType { expected: "string" }),
        }
    }

    /// Inserts `values` at one end of the list at `key`, creating it if needed.
    ///
    /// Values are inserted one at a time in the order given, so at the head
    /// the last value ends up first. Returns the new length.
    pub fn push(&self, key: &str, end: ListEnd, values: Vec<String>) -> StorageResult<usize> {
        let mut keyspace = self.lock();
        self.purge_if_expired(&mut keyspace, key, Utc::now());

        let entry = keyspace
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::List(VecDeque::new())));

        let list = match &mut entry.value {
            Value::List(list) => list,
            Value::Scalar(_) => return Err(StorageError::WrongType { expected: "list" }),
        };

        match end {
            ListEnd::Head => values.into_iter().for_each(|v| list.push_front(v)),
            ListEnd::Tail => list.extend(values),
        }

        Ok(list.len())
    }

    pub fn lpush(&self, key: &str, values: Vec<String>) -> StorageResult<usize> {
        self.push(key, ListEnd::Head, values)
    }

    pub fn rpush(&self, key: &str, values: Vec<String>) -> StorageResult<usize> {
        self.push(key, ListEnd::Tail, values)
    }

    /// Returns the list at `key`, head first.
    pub fn list(&self, key: &str) -> StorageResult<Option<Vec<String>>> {
        self.with_live_entry(key, |entry| match entry {
            None => Ok(None),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(Some(list.iter().cloned().collect())),
            Some(_) => Err(StorageError::WrongType { expected: "list" }),
        })
    }

    /// Removes every entry whose deadline is at or before now.
    ///
    /// Called by the expiry reaper. Returns the number of entries removed.
    pub fn cleanup_expired(&self) -> u64 {
        let mut keyspace = self.lock();
        let now = Utc::now();

        let before = keyspace.len();
        keyspace.retain(|_, entry| !entry.is_expired_at(now));
        let removed = (before - keyspace.len()) as u64;

        if removed > 0 {
            self.expired_count.fetch_add(removed, Ordering::Relaxed);
        }
        removed
    }

    /// Runs `f` over the whole keyspace while holding the lock.
    ///
    /// Used by the snapshot writer so no command can interleave with a save.
    pub fn with_keyspace<R>(&self, f: impl FnOnce(&Keyspace) -> R) -> R {
        f(&self.lock())
    }

    /// Number of keys held, including expired ones not yet removed.
    pub fn len(&self) -> u64 {
        self.lock().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len(),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}
