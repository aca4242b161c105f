//! Write locks.
//!
//! A [`Lock`] is created unattached by [`LockManager::create_lock`] and then attached to the
//! resources it protects with [`LockManager::lock_resource`]. A resource holds either one
//! exclusive lock or any number of shared locks. An infinite-depth lock also protects
//! everything below the resources it is attached to, including members created later.
//!
//! Expired locks are purged lazily, whenever the lock table is consulted.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use http::StatusCode;
use thiserror::Error;
use tracing::{debug, trace};

use crate::path;

pub const LOCK_TOKEN_SCHEME: &str = "opaquelocktoken:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("lock conflicts with an existing lock")]
    Conflict,

    #[error("none of the requested lock timeouts is acceptable")]
    TimeoutRejected,

    #[error("no such lock")]
    NotFound,
}

impl LockError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Conflict => StatusCode::LOCKED,
            Self::TimeoutRejected | Self::NotFound => StatusCode::PRECONDITION_FAILED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDepth {
    Zero,
    Infinity,
}

impl fmt::Display for LockDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero => f.write_str("0"),
            Self::Infinity => f.write_str("infinity"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeout {
    Seconds(u64),
    Infinite,
}

impl LockTimeout {
    /// Parses a `Timeout` header such as `Second-3600, Infinite`, keeping the client's order.
    ///
    /// Entries that are not understood are skipped.
    pub fn parse_header(value: &str) -> Vec<LockTimeout> {
        value
            .split(',')
            .filter_map(|entry| {
                let entry = entry.trim();
                if entry.eq_ignore_ascii_case("infinite") {
                    return Some(Self::Infinite);
                }
                let seconds = entry.get(..7).filter(|unit| unit.eq_ignore_ascii_case("second-")).map(|_| &entry[7..])?;
                seconds.parse().ok().map(Self::Seconds)
            })
            .collect()
    }
}

impl fmt::Display for LockTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds(seconds) => write!(f, "Second-{seconds}"),
            Self::Infinite => f.write_str("Infinite"),
        }
    }
}

/// Which lock timeouts are granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// the longest finite timeout granted
    pub max_seconds: u64,
    pub allow_infinite: bool,
    /// used when the client asks for no timeout
    pub default_timeout: LockTimeout,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self { max_seconds: 7 * 24 * 3600, allow_infinite: true, default_timeout: LockTimeout::Seconds(3600) }
    }
}

impl LockPolicy {
    pub fn accepts(&self, timeout: LockTimeout) -> bool {
        match timeout {
            LockTimeout::Seconds(seconds) => seconds <= self.max_seconds,
            LockTimeout::Infinite => self.allow_infinite,
        }
    }

    /// The first acceptable timeout among the `offered` ones, in order.
    pub fn choose(&self, offered: &[LockTimeout]) -> Result<LockTimeout, LockError> {
        if offered.is_empty() {
            return Ok(self.default_timeout);
        }
        offered.iter().copied().find(|timeout| self.accepts(*timeout)).ok_or(LockError::TimeoutRejected)
    }
}

/// What a `LOCK` request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub scope: LockScope,
    pub depth: LockDepth,
    /// the serialized `owner` element, if any
    pub owner: Option<String>,
    pub timeouts: Vec<LockTimeout>,
}

#[derive(Debug, Clone)]
pub struct Lock {
    pub token: String,
    pub scope: LockScope,
    pub depth: LockDepth,
    pub owner: Option<String>,
    pub timeout: LockTimeout,
    expires_at: Option<Instant>,
    root: Option<String>,
    resources: BTreeSet<String>,
}

impl Lock {
    fn new(request: &LockRequest, timeout: LockTimeout, now: Instant) -> Self {
        Self {
            token: format!("{LOCK_TOKEN_SCHEME}{}", uuid::Uuid::new_v4()),
            scope: request.scope,
            depth: request.depth,
            owner: request.owner.clone(),
            timeout,
            expires_at: expiry(timeout, now),
            root: None,
            resources: BTreeSet::new(),
        }
    }

    /// The resource the lock was first attached to.
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(String::as_str)
    }

    /// Returns true if the lock protects `path`.
    pub fn covers(&self, path: &str) -> bool {
        self.resources.iter().any(|locked| locked == path || (self.depth == LockDepth::Infinity && path::is_within(locked, path)))
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// The timeout left, as sent back in `lockdiscovery`.
    pub fn remaining(&self, now: Instant) -> LockTimeout {
        match self.expires_at {
            Some(at) => LockTimeout::Seconds(at.saturating_duration_since(now).as_secs()),
            None => LockTimeout::Infinite,
        }
    }
}

fn expiry(timeout: LockTimeout, now: Instant) -> Option<Instant> {
    match timeout {
        LockTimeout::Seconds(seconds) => Some(now + Duration::from_secs(seconds)),
        LockTimeout::Infinite => None,
    }
}

/// The lock table of a resource adapter.
pub trait LockManager: Send + Sync + fmt::Debug {
    /// Creates an unattached lock, granting the first offered timeout the policy accepts.
    fn create_lock(&self, request: &LockRequest, policy: &LockPolicy) -> Result<Lock, LockError>;

    /// Attaches the lock `token` to `path`, failing if an incompatible lock protects it or,
    /// for infinite depth, anything below it.
    fn lock_resource(&self, token: &str, path: &str) -> Result<(), LockError>;

    /// Restarts the timeout of a lock.
    fn refresh_lock(&self, token: &str, timeouts: &[LockTimeout], policy: &LockPolicy) -> Result<Lock, LockError>;

    fn is_locked(&self, path: &str) -> bool;

    /// The locks protecting `path`.
    fn get_locks(&self, path: &str) -> Vec<Lock>;

    /// Returns true if `path` is unlocked or one of `tokens` names a lock protecting it.
    fn is_access_allowed(&self, path: &str, tokens: &[String]) -> bool;

    fn find_lock(&self, token: &str) -> Option<Lock>;

    /// Releases the lock `token` from every resource it is attached to.
    fn unlock_resources(&self, token: &str) -> Result<(), LockError>;

    /// Drops all locks attached to `path` or anything below it.
    fn remove_locks(&self, path: &str);
}

/// A lock table in memory.
#[derive(Debug, Default)]
pub struct MemoryLockManager {
    locks: Mutex<HashMap<String, Lock>>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Lock>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        locks.retain(|token, lock| {
            let expired = lock.is_expired(now);
            if expired {
                debug!(token, "lock expired");
            }
            !expired
        });
        locks
    }
}

impl LockManager for MemoryLockManager {
    fn create_lock(&self, request: &LockRequest, policy: &LockPolicy) -> Result<Lock, LockError> {
        let timeout = policy.choose(&request.timeouts)?;
        let lock = Lock::new(request, timeout, Instant::now());
        self.table().insert(lock.token.clone(), lock.clone());
        trace!(token = lock.token, %timeout, "created lock");
        Ok(lock)
    }

    fn lock_resource(&self, token: &str, path: &str) -> Result<(), LockError> {
        let mut locks = self.table();
        let lock = locks.get(token).ok_or(LockError::NotFound)?;
        let (scope, depth) = (lock.scope, lock.depth);

        let conflicting = locks.values().filter(|other| other.token != token).find(|other| {
            let overlaps = other.covers(path) || (depth == LockDepth::Infinity && other.resources().any(|locked| path::is_within(path, locked)));
            overlaps && (scope == LockScope::Exclusive || other.scope == LockScope::Exclusive)
        });
        if let Some(other) = conflicting {
            debug!(path, held = other.token, "lock conflict");
            return Err(LockError::Conflict);
        }

        let lock = locks.get_mut(token).ok_or(LockError::NotFound)?;
        lock.resources.insert(path.to_owned());
        lock.root.get_or_insert_with(|| path.to_owned());
        Ok(())
    }

    fn refresh_lock(&self, token: &str, timeouts: &[LockTimeout], policy: &LockPolicy) -> Result<Lock, LockError> {
        let timeout = policy.choose(timeouts)?;
        let mut locks = self.table();
        let lock = locks.get_mut(token).ok_or(LockError::NotFound)?;
        lock.timeout = timeout;
        lock.expires_at = expiry(timeout, Instant::now());
        Ok(lock.clone())
    }

    fn is_locked(&self, path: &str) -> bool {
        self.table().values().any(|lock| lock.covers(path))
    }

    fn get_locks(&self, path: &str) -> Vec<Lock> {
        let mut found: Vec<_> = self.table().values().filter(|lock| lock.covers(path)).cloned().collect();
        found.sort_by(|a, b| a.token.cmp(&b.token));
        found
    }

    fn is_access_allowed(&self, path: &str, tokens: &[String]) -> bool {
        let locks = self.table();
        let mut covering = locks.values().filter(|lock| lock.covers(path)).peekable();
        covering.peek().is_none() || covering.any(|lock| tokens.contains(&lock.token))
    }

    fn find_lock(&self, token: &str) -> Option<Lock> {
        self.table().get(token).cloned()
    }

    fn unlock_resources(&self, token: &str) -> Result<(), LockError> {
        self.table().remove(token).map(|_| ()).ok_or(LockError::NotFound)
    }

    fn remove_locks(&self, path: &str) {
        self.table().retain(|_, lock| !lock.resources().any(|locked| path::is_within(path, locked)));
    }
}
