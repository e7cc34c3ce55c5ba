// Copyright 2020 Joyent, Inc.

pub mod types;

use std::fmt::Result as FmtResult;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use slog::{debug, info, o, trace, warn, Drain, Logger};

use crate::dispatcher::types::{
    DispatcherOptions, DispatcherStats, ProtectedData, Response, SessionData,
    SessionEntry, SessionKey, UseCount,
};
use crate::error::Error;
use crate::server::{server_key, ServerIdentity};
use crate::transport::{Mark, Transport, TransportCode};

// Default idle timeout, also the minimum period between cleanup sweeps
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Dispatches DNS-over-TLS queries over a set of shared sessions
pub struct Dispatcher<T, F>
where
    T: Transport,
    F: Fn(&ServerIdentity, Mark) -> T + Send + Sync + 'static,
{
    protected_data: ProtectedData<T>,
    create_transport: Arc<F>,
    idle_timeout: Duration,
    log: Logger,
}

impl<T, F> Debug for Dispatcher<T, F>
where
    T: Transport,
    F: Fn(&ServerIdentity, Mark) -> T + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("Dispatcher")
            .field("idle_timeout", &self.idle_timeout)
            .field("stats", &self.get_stats())
            .field("log", &self.log)
            .finish()
    }
}

// Clones share the session store, so a clone may be handed to each thread
// that dispatches queries.
impl<T, F> Clone for Dispatcher<T, F>
where
    T: Transport,
    F: Fn(&ServerIdentity, Mark) -> T + Send + Sync + 'static,
{
    fn clone(&self) -> Dispatcher<T, F> {
        Dispatcher {
            protected_data: self.protected_data.clone(),
            create_transport: Arc::clone(&self.create_transport),
            idle_timeout: self.idle_timeout,
            log: self.log.clone(),
        }
    }
}

impl<T, F> Dispatcher<T, F>
where
    T: Transport,
    F: Fn(&ServerIdentity, Mark) -> T + Send + Sync + 'static,
{
    /// Create a dispatcher. `create_transport` is called, with the store lock
    /// held, each time a query needs a session that does not exist yet.
    ///
    /// An invalid idle timeout is logged and replaced by the default. Use
    /// [`try_new`](#method.try_new) to reject it instead.
    pub fn new(options: DispatcherOptions, create_transport: F) -> Self {
        let logger = options
            .log
            .clone()
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));

        let idle_timeout = match options.validate() {
            Ok(()) => options.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT),
            Err(e) => {
                warn!(
                    logger,
                    "{}, using default of {:?}", e, DEFAULT_IDLE_TIMEOUT
                );
                DEFAULT_IDLE_TIMEOUT
            }
        };

        debug!(logger, "dispatcher created, idle timeout {:?}", idle_timeout);

        Dispatcher {
            protected_data: ProtectedData::new(SessionData::new()),
            create_transport: Arc::new(create_transport),
            idle_timeout,
            log: logger,
        }
    }

    pub fn try_new(
        options: DispatcherOptions,
        create_transport: F,
    ) -> Result<Self, Error> {
        options.validate()?;
        Ok(Self::new(options, create_transport))
    }

    /// Resolve `query` against `servers`, trying them in the order given by
    /// [`ordered_servers`](#method.ordered_servers) until one of them yields
    /// a terminal response (`Success` or `LimitError`). No server is tried
    /// more than once per call.
    ///
    /// Returns the response and the number of bytes written to `answer`,
    /// which is zero unless the response is `Success`. If every server fails
    /// the last failure is returned, and `InternalError` if `servers` is
    /// empty.
    pub fn query(
        &self,
        servers: &[ServerIdentity],
        mark: Mark,
        query: &[u8],
        answer: &mut [u8],
    ) -> (Response, usize) {
        let ordered = self.ordered_servers(servers, mark);
        if ordered.is_empty() {
            warn!(self.log, "Empty DNS-over-TLS server list");
        }

        let mut code = Response::InternalError;
        for server in ordered.iter() {
            let (response, len) = self.query_server(server, mark, query, answer);
            if response.is_terminal() {
                return (response, len);
            }
            debug!(
                self.log,
                "query to {} failed with {}, trying next server",
                server,
                response
            );
            code = response;
        }

        (code, 0)
    }

    /// Resolve `query` against a single server using the session for
    /// (`mark`, `server`), creating it if needed. The store lock is not held
    /// while the transport is queried, so concurrent queries for the same
    /// session share its transport.
    pub fn query_server(
        &self,
        server: &ServerIdentity,
        mark: Mark,
        query: &[u8],
        answer: &mut [u8],
    ) -> (Response, usize) {
        let session = self.acquire(SessionKey::new(mark, server.clone()));

        trace!(self.log, "sending query of length {} to {}", query.len(), server);
        let result = session.transport.query(query);
        trace!(self.log, "got transport result {:?}", result.code);

        match result.code {
            TransportCode::Success => {
                if result.response.len() > answer.len() {
                    debug!(
                        self.log,
                        "response too large: {} > {}",
                        result.response.len(),
                        answer.len()
                    );
                    (Response::LimitError, 0)
                } else {
                    let len = result.response.len();
                    answer[..len].copy_from_slice(&result.response);
                    trace!(self.log, "got response of length {}", len);
                    (Response::Success, len)
                }
            }
            code => {
                debug!(self.log, "query to {} failed: {:?}", server, code);
                (Response::from(code), 0)
            }
        }
        // `session` is released here
    }

    /// Reorder `servers` so that servers with an open session under `mark`
    /// come first, IPv6 before IPv4 within each group. The order of the input
    /// is kept within each of the four groups.
    pub fn ordered_servers(
        &self,
        servers: &[ServerIdentity],
        mark: Mark,
    ) -> Vec<ServerIdentity> {
        let session_data = self.protected_data.session_data_lock();
        trace!(
            self.log,
            "ordering {} servers against {} sessions",
            servers.len(),
            session_data.store.len()
        );
        partition_servers(servers, |server| {
            session_data
                .store
                .contains_key(&SessionKey::new(mark, server.clone()))
        })
    }

    /// Whether a session for (`mark`, `server`) is currently in the store.
    pub fn has_session(&self, server: &ServerIdentity, mark: Mark) -> bool {
        let session_data = self.protected_data.session_data_lock();
        session_data
            .store
            .contains_key(&SessionKey::new(mark, server.clone()))
    }

    pub fn get_stats(&self) -> DispatcherStats {
        self.protected_data.session_data_lock().stats()
    }

    pub fn session_count(&self) -> usize {
        self.protected_data.session_data_lock().store.len()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    fn acquire(&self, key: SessionKey) -> Session<T, F> {
        let now = Instant::now();
        let mut session_data = self.protected_data.session_data_lock();
        let create_transport = &*self.create_transport;
        let log = &self.log;

        let entry = session_data.store.entry(key.clone()).or_insert_with(|| {
            debug!(
                log,
                "creating session {} (server key {})",
                &key,
                server_key(&key.server)
            );
            SessionEntry::new(create_transport(&key.server, key.mark), now)
        });
        entry.use_count += UseCount::from(1);
        let transport = Arc::clone(&entry.transport);

        Session {
            dispatcher: self,
            key,
            transport,
        }
    }

    fn release(&self, key: &SessionKey) {
        let now = Instant::now();
        let mut session_data = self.protected_data.session_data_lock();

        match session_data.store.get_mut(key) {
            Some(entry) => {
                if entry.use_count > UseCount::from(0) {
                    entry.use_count -= UseCount::from(1);
                } else {
                    // Should never happen
                    warn!(self.log, "session {} released while unused", key);
                }
                entry.last_used = now;
            }
            None => {
                // Also should never happen, a session in use is not evicted
                warn!(self.log, "released session {} not found", key);
            }
        }

        cleanup(&mut session_data, now, self.idle_timeout, &self.log);
    }
}

// A claim on one session for the duration of a query. The use count taken in
// `acquire` is given back when this is dropped, on every exit path.
struct Session<'a, T, F>
where
    T: Transport,
    F: Fn(&ServerIdentity, Mark) -> T + Send + Sync + 'static,
{
    dispatcher: &'a Dispatcher<T, F>,
    key: SessionKey,
    transport: Arc<T>,
}

impl<'a, T, F> Drop for Session<'a, T, F>
where
    T: Transport,
    F: Fn(&ServerIdentity, Mark) -> T + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.dispatcher.release(&self.key);
    }
}

/// Stable partition of `servers` into the order: with a session and IPv6,
/// with a session and IPv4, without a session and IPv6, without a session
/// and IPv4.
fn partition_servers<P>(
    servers: &[ServerIdentity],
    has_session: P,
) -> Vec<ServerIdentity>
where
    P: Fn(&ServerIdentity) -> bool,
{
    let mut existing6 = Vec::with_capacity(servers.len());
    let mut existing4 = Vec::with_capacity(servers.len());
    let mut new6 = Vec::with_capacity(servers.len());
    let mut new4 = Vec::with_capacity(servers.len());

    servers.iter().for_each(|server| {
        match (has_session(server), server.is_ipv6()) {
            (true, true) => existing6.push(server.clone()),
            (true, false) => existing4.push(server.clone()),
            (false, true) => new6.push(server.clone()),
            (false, false) => new4.push(server.clone()),
        }
    });

    existing6.append(&mut existing4);
    existing6.append(&mut new6);
    existing6.append(&mut new4);
    existing6
}

// Evict sessions that are unused and have been idle for longer than
// `idle_timeout`. The full scan runs at most once per `idle_timeout`; the
// first call after the store is created always scans.
fn cleanup<T>(
    session_data: &mut SessionData<T>,
    now: Instant,
    idle_timeout: Duration,
    log: &Logger,
) {
    if let Some(last_cleanup) = session_data.last_cleanup {
        if now.saturating_duration_since(last_cleanup) < idle_timeout {
            return;
        }
    }

    debug!(
        log,
        "Performing idle session sweep on {} sessions",
        session_data.store.len()
    );

    let mut evicted = 0;
    session_data.store.retain(|key, entry| {
        if entry.use_count == UseCount::from(0)
            && now.saturating_duration_since(entry.last_used) > idle_timeout
        {
            info!(log, "Evicting idle session {}", key);
            evicted += 1;
            false
        } else {
            true
        }
    });

    session_data.evictions += evicted;
    session_data.cleanup_sweeps += 1;
    session_data.last_cleanup = Some(now);
}
