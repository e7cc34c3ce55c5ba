// Copyright 2020 Joyent, Inc.

//! Session-reusing dispatch of DNS-over-TLS queries
//!
//! This library resolves DNS queries against a set of DNS-over-TLS servers
//! while reusing TLS sessions between queries. Opening a TLS session costs a
//! TCP handshake and a TLS handshake, which usually dwarfs the cost of the
//! query itself, so the dispatcher keeps one session per server per network
//! and shares it among every caller that needs it. The implementation relies
//! on one trait, the [`Transport`](transport/trait.Transport.html) trait, and
//! one type, the [`Dispatcher`](dispatcher/struct.Dispatcher.html).
//!
//! ## Transports
//!
//! A *transport* owns one TLS connection to one server. It connects lazily,
//! performs the handshake and certificate checks, frames queries, and matches
//! answers to queries. None of that is the dispatcher's business: the
//! dispatcher only calls `query` on it and classifies the result.
//!
//! Users provide the dispatcher with a function that builds a transport for a
//! server and a mark. The trait bounds for this function are as follows:
//! ```rust,ignore
//! Fn(&ServerIdentity, Mark) -> T + Send + Sync + 'static
//! where T: Transport
//! ```
//! The function is the place to capture whatever the transport needs beyond
//! the server itself, such as a shared socket factory or TLS configuration.
//!
//! ## Sessions
//!
//! A *session* is the pairing of a mark and a
//! [`ServerIdentity`](server/struct.ServerIdentity.html) with one transport.
//! The mark identifies the network a socket is bound to; sessions are never
//! portable across networks, so two queries share a session only if both the
//! mark and the server identity are equal. A server identity includes the
//! expected certificate name and pinned fingerprints along with the address.
//!
//! Each session counts the queries currently using it and remembers when it
//! was last used. The count is taken under the dispatcher lock before the
//! query is sent and given back, also under the lock, when the query finishes
//! however it finishes. The query itself runs without the lock held, so slow
//! servers do not hold up queries to other servers, and concurrent queries to
//! the same server go out over the same transport.
//!
//! ## Server ordering
//!
//! Callers hand the dispatcher the full list of configured servers for a
//! network. Before trying them, the dispatcher moves the servers it already
//! has sessions for to the front, so a query goes out over an open session
//! whenever one exists. Within each group IPv6 servers come before IPv4
//! servers. The resulting order is:
//!
//! | 1 | 2 | 3 | 4 |
//! |---|---|---|---|
//! | open, IPv6 | open, IPv4 | new, IPv6 | new, IPv4 |
//!
//! and within each group servers keep the order they were configured in.
//!
//! The servers are then tried in turn. A `Success` or a `LimitError` ends the
//! search, since both are properties of the answer; a `NetworkError` or an
//! `InternalError` moves on to the next server.
//!
//! ## Idle sessions
//!
//! Sessions that have not been used for longer than the idle timeout (5
//! minutes by default) are evicted, which drops and thereby closes their
//! transport. Eviction is checked when a query finishes, but the store is
//! scanned at most once per idle timeout so the common case costs nothing. A
//! session that is in use is never evicted however old its last use is.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::thread;
//!
//! use dns_tls_dispatcher::dispatcher::Dispatcher;
//! use dns_tls_dispatcher::dispatcher::types::{DispatcherOptions, Response};
//! use dns_tls_dispatcher::server::ServerIdentity;
//!
//! let servers: Vec<ServerIdentity> = vec![
//!     "2001:db8::53".parse()?,
//!     "192.0.2.53".parse()?,
//! ];
//!
//! let dispatcher = Dispatcher::new(
//!     DispatcherOptions::default(),
//!     |server, mark| TlsTransport::new(server, mark, &socket_factory),
//! );
//!
//! for _ in 0..10 {
//!     let dispatcher = dispatcher.clone();
//!     let servers = servers.clone();
//!     thread::spawn(move || {
//!         let mut answer = [0u8; 512];
//!         let (code, len) = dispatcher.query(&servers, 0x1000d, &query, &mut answer);
//!         if code == Response::Success {
//!             // Use &answer[..len] here
//!         }
//!     });
//! }
//! ```

#![allow(missing_docs)]

pub mod dispatcher;
pub mod error;
pub mod server;
pub mod transport;
