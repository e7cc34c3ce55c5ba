// Copyright 2020 Joyent, Inc.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use derive_more::{Add, AddAssign, Display, From, Into, Sub, SubAssign};
use slog::Logger;

use crate::error::Error;
use crate::server::ServerIdentity;
use crate::transport::{Mark, TransportCode};

/// The outcome of dispatching a query.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Response {
    /// The answer is valid and was copied into the caller's buffer.
    Success,
    /// An answer arrived but did not fit the caller's buffer.
    LimitError,
    /// The connection, handshake, or I/O with the server failed.
    NetworkError,
    /// Any other failure, including an empty server list.
    InternalError,
}

impl Response {
    /// Whether this outcome is a property of the answer itself, in which case
    /// trying another server cannot change it.
    pub fn is_terminal(self) -> bool {
        match self {
            Response::Success | Response::LimitError => true,
            Response::NetworkError | Response::InternalError => false,
        }
    }
}

impl From<TransportCode> for Response {
    fn from(code: TransportCode) -> Self {
        match code {
            TransportCode::Success => Response::Success,
            TransportCode::NetworkError => Response::NetworkError,
            TransportCode::InternalError => Response::InternalError,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Response::Success => String::from("success").fmt(fmt),
            Response::LimitError => String::from("limit_error").fmt(fmt),
            Response::NetworkError => String::from("network_error").fmt(fmt),
            Response::InternalError => String::from("internal_error").fmt(fmt),
        }
    }
}

/// The configuration options for a dispatcher.
#[derive(Debug, Default)]
pub struct DispatcherOptions {
    /// An optional idle timeout. A session unused for longer than this is
    /// eligible for eviction, and the store is swept at most once per
    /// period. If not specified the default is 5 minutes.
    pub idle_timeout: Option<Duration>,
    /// An optional `slog` logger instance. If none is provided then the logging
    /// will fall back to using the [`slog-stdlog`](https://docs.rs/slog-stdlog)
    /// drain which is essentially the same as using the rust standard
    /// [`log`](https://docs.rs/log) crate.
    pub log: Option<Logger>,
}

impl DispatcherOptions {
    pub fn validate(&self) -> Result<(), Error> {
        match self.idle_timeout {
            Some(timeout) if timeout == Duration::from_secs(0) => {
                Err(Error::InvalidIdleTimeout)
            }
            _ => Ok(()),
        }
    }
}

/// A newtype wrapper around u32 used for the number of in-flight queries
/// sharing a session.
#[derive(
    Add,
    AddAssign,
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    Eq,
    From,
    Into,
    Ord,
    PartialOrd,
    PartialEq,
    Sub,
    SubAssign,
)]
pub struct UseCount(u32);

/// A newtype wrapper around u32 used for counts of sessions maintained by the
/// dispatcher.
#[derive(
    Add,
    AddAssign,
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    Eq,
    From,
    Into,
    Ord,
    PartialOrd,
    PartialEq,
    Sub,
    SubAssign,
)]
pub struct SessionCount(u32);

/// Point-in-time counters for a dispatcher.
#[derive(Copy, Clone, Debug, Default)]
pub struct DispatcherStats {
    /// The number of sessions in the store
    pub sessions: SessionCount,
    /// The number of queries currently running, summed over all sessions
    pub in_flight: UseCount,
    /// The number of full eviction sweeps performed
    pub cleanup_sweeps: u64,
    /// The number of sessions evicted for being idle
    pub evictions: u64,
}

/// Identifies one session: queries with equal keys share a transport.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SessionKey {
    pub mark: Mark,
    pub server: ServerIdentity,
}

impl SessionKey {
    pub fn new(mark: Mark, server: ServerIdentity) -> Self {
        SessionKey { mark, server }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}/{:#x}", self.server, self.mark)
    }
}

// A transport along with the bookkeeping needed to decide when it can be
// evicted. An entry with a non-zero use count is never evicted.
#[doc(hidden)]
#[derive(Debug)]
pub struct SessionEntry<T> {
    pub transport: Arc<T>,
    pub use_count: UseCount,
    pub last_used: Instant,
}

impl<T> SessionEntry<T> {
    pub fn new(transport: T, now: Instant) -> Self {
        SessionEntry {
            transport: Arc::new(transport),
            use_count: UseCount::from(0),
            last_used: now,
        }
    }
}

// The internal data structures used to manage the sessions.
#[doc(hidden)]
#[derive(Debug)]
pub struct SessionData<T> {
    pub store: HashMap<SessionKey, SessionEntry<T>>,
    // None until the first sweep, so the first release always sweeps.
    pub last_cleanup: Option<Instant>,
    pub cleanup_sweeps: u64,
    pub evictions: u64,
}

impl<T> SessionData<T> {
    #[doc(hidden)]
    pub fn new() -> Self {
        SessionData {
            store: HashMap::new(),
            last_cleanup: None,
            cleanup_sweeps: 0,
            evictions: 0,
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        let in_flight = self
            .store
            .values()
            .fold(UseCount::from(0), |acc, e| acc + e.use_count);
        DispatcherStats {
            sessions: SessionCount::from(self.store.len() as u32),
            in_flight,
            cleanup_sweeps: self.cleanup_sweeps,
            evictions: self.evictions,
        }
    }
}

impl<T> Default for SessionData<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Protected access to the session store. All reads and writes of the store go
// through this one lock.
#[doc(hidden)]
#[derive(Debug)]
pub struct ProtectedData<T>(Arc<Mutex<SessionData<T>>>);

impl<T> ProtectedData<T> {
    pub fn new(session_data: SessionData<T>) -> Self {
        ProtectedData(Arc::new(Mutex::new(session_data)))
    }

    // The store is never left half-updated while the lock is held, so a
    // poisoned lock is still safe to use.
    pub fn session_data_lock(&self) -> MutexGuard<SessionData<T>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Clone for ProtectedData<T> {
    fn clone(&self) -> ProtectedData<T> {
        ProtectedData(Arc::clone(&self.0))
    }
}
