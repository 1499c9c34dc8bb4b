//! Command execution.
//!
//! Turns a request (command name plus positional arguments) into a reply.
//! Command names are matched case-insensitively. Every failure, whether bad
//! arity, wrong value type, non-numeric value or a failed snapshot, becomes an
//! error reply for the issuing client only.
//!
//! | Command  | Arguments                                       | Reply                     |
//! |----------|-------------------------------------------------|---------------------------|
//! | `PING`   |                                                 | `+PONG`                   |
//! | `ECHO`   | `text...`                                       | bulk, tokens concatenated |
//! | `SET`    | `key value... [EX s\|PX ms\|EXAT unix\|PXAT unix_ms]` | `+OK`               |
//! | `GET`    | `key`                                           | bulk or null              |
//! | `EXISTS` | `key`                                           | `:1` / `:0`               |
//! | `DEL`    | `key...`                                        | count removed             |
//! | `INCR`   | `key`                                           | new value                 |
//! | `DECR`   | `key`                                           | new value                 |
//! | `LPUSH`  | `key value...`                                  | new length                |
//! | `RPUSH`  | `key value...`                                  | new length                |
//! | `SAVE`   |                                                 | `+OK`                     |

use crate::protocol::RespValue;
use crate::storage::{Snapshotter, StorageEngine};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task;
use tracing::{info, warn};

/// Executes commands against the shared keyspace.
///
/// Cheap to clone; each connection gets its own copy.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    snapshotter: Arc<Snapshotter>,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>, snapshotter: Arc<Snapshotter>) -> Self {
        Self {
            storage,
            snapshotter,
        }
    }

    /// Executes a parsed request.
    ///
    /// The request must be an array whose elements are strings; the first is
    /// the command name.
    pub fn execute(&self, request: RespValue) -> RespValue {
        let parts = match request {
            RespValue::Array(parts) => parts,
            _ => return RespValue::error("ERR invalid command format"),
        };

        let mut words = Vec::with_capacity(parts.len());
        for part in &parts {
            match part.as_str() {
                Some(s) => words.push(s.to_string()),
                None => return RespValue::error("ERR invalid argument"),
            }
        }

        match words.split_first() {
            Some((name, args)) => self.execute_command(name, args),
            None => RespValue::error("ERR empty command"),
        }
    }

    /// Executes one command by name.
    pub fn execute_command(&self, name: &str, args: &[String]) -> RespValue {
        let cmd = name.to_ascii_uppercase();

        match cmd.as_str() {
            "PING" => RespValue::pong(),
            "ECHO" => self.cmd_echo(args),
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "EXISTS" => self.cmd_exists(args),
            "DEL" => self.cmd_del(args),
            "INCR" => self.cmd_incr_by(&cmd, args, 1),
            "DECR" => self.cmd_incr_by(&cmd, args, -1),
            "LPUSH" => self.cmd_lpush(args),
            "RPUSH" => self.cmd_rpush(args),
            "SAVE" => self.cmd_save(),
            _ => RespValue::error(format!("ERR unknown command '{}'", name)),
        }
    }

    /// ECHO text...
    fn cmd_echo(&self, args: &[String]) -> RespValue {
        if args.is_empty() {
            return wrong_arity("ECHO");
        }
        RespValue::bulk_string(args.concat())
    }

    /// SET key value... [EX seconds | PX milliseconds | EXAT unix | PXAT unix_ms]
    fn cmd_set(&self, args: &[String]) -> RespValue {
        if args.len() < 2 {
            return wrong_arity("SET");
        }

        let (value, expiry) = parse_set_value(&args[1..], Utc::now());
        self.storage.set(args[0].as_str(), value, expiry);
        RespValue::ok()
    }

    /// GET key
    fn cmd_get(&self, args: &[String]) -> RespValue {
        let Some(key) = args.first() else {
            return wrong_arity("GET");
        };

        match self.storage.get(key) {
            Ok(Some(value)) => RespValue::bulk_string(value),
            Ok(None) => RespValue::null(),
            Err(e) => RespValue::error(e.to_string()),
        }
    }

    /// EXISTS key
    fn cmd_exists(&self, args: &[String]) -> RespValue {
        if args.len() != 1 {
            return wrong_arity("EXISTS");
        }
        RespValue::integer(self.storage.exists(&args[0]) as i64)
    }

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[String]) -> RespValue {
        if args.is_empty() {
            return wrong_arity("DEL");
        }
        RespValue::integer(self.storage.delete_many(args) as i64)
    }

    /// INCR key / DECR key
    fn cmd_incr_by(&self, cmd: &str, args: &[String], delta: i64) -> RespValue {
        if args.len() != 1 {
            return wrong_arity(cmd);
        }

        match self.storage.incr_by(&args[0], delta) {
            Ok(n) => RespValue::integer(n),
            Err(e) => RespValue::error(e.to_string()),
        }
    }

    /// LPUSH key value [value ...]
    fn cmd_lpush(&self, args: &[String]) -> RespValue {
        if args.len() < 2 {
            return wrong_arity("LPUSH");
        }

        match self.storage.lpush(&args[0], args[1..].to_vec()) {
            Ok(len) => RespValue::integer(len as i64),
            Err(e) => RespValue::error(e.to_string()),
        }
    }

    /// RPUSH key value [value ...]
    fn cmd_rpush(&self, args: &[String]) -> RespValue {
        if args.len() < 2 {
            return wrong_arity("RPUSH");
        }

        match self.storage.rpush(&args[0], args[1..].to_vec()) {
            Ok(len) => RespValue::integer(len as i64),
            Err(e) => RespValue::error(e.to_string()),
        }
    }

    /// SAVE
    ///
    /// The write and fsync block, so on a multi-threaded runtime the worker
    /// hands its other tasks off first. Every other command still waits on
    /// the keyspace lock until the snapshot is on disk.
    fn cmd_save(&self) -> RespValue {
        let result = match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                task::block_in_place(|| self.snapshotter.save(&self.storage))
            }
            _ => self.snapshotter.save(&self.storage),
        };

        match result {
            Ok(keys) => {
                info!(path = %self.snapshotter.path().display(), keys = keys, "DB saved on disk");
                RespValue::ok()
            }
            Err(e) => {
                warn!(path = %self.snapshotter.path().display(), error = %e, "SAVE failed");
                RespValue::error(format!("ERR {}", e))
            }
        }
    }
}

fn wrong_arity(cmd: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        cmd
    ))
}

/// Splits SET's value words from its expiry modifiers.
///
/// The first word is always part of the value. After it, a modifier keyword
/// followed by a valid integer sets the deadline (the last one wins) and both
/// words are consumed. Anything else, including a modifier whose argument is
/// not a usable integer, stays in the value. Value words are joined with a
/// single space.
fn parse_set_value(words: &[String], now: DateTime<Utc>) -> (String, Option<DateTime<Utc>>) {
    let mut value: Vec<&str> = vec![words[0].as_str()];
    let mut expiry = None;

    let mut i = 1;
    while i < words.len() {
        let deadline = words
            .get(i + 1)
            .and_then(|arg| expiry_deadline(&words[i], arg, now));

        match deadline {
            Some(deadline) => {
                expiry = Some(deadline);
                i += 2;
            }
            None => {
                value.push(&words[i]);
                i += 1;
            }
        }
    }

    (value.join(" "), expiry)
}

/// Resolves one `SET` expiry modifier to an absolute deadline.
fn expiry_deadline(option: &str, arg: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let n: i64 = arg.parse().ok()?;

    match option.to_ascii_uppercase().as_str() {
        "EX" => now.checked_add_signed(TimeDelta::try_seconds(n)?),
        "PX" => now.checked_add_signed(TimeDelta::try_milliseconds(n)?),
        "EXAT" => DateTime::from_timestamp(n, 0),
        "PXAT" => DateTime::from_timestamp_millis(n),
        _ => None,
    }
}
