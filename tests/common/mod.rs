// Copyright 2020 Joyent, Inc.

#![allow(dead_code)]

use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use slog::{o, Drain, Level, LevelFilter, Logger};

use dns_tls_dispatcher::server::ServerIdentity;
use dns_tls_dispatcher::transport::{
    Mark, Transport, TransportCode, TransportResponse,
};

pub const DEFAULT_LOG_LEVEL: Level = Level::Info;
pub const LOG_LEVEL_ENV_VAR: &str = "DISPATCHER_LOG_LEVEL";

pub fn parse_log_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::Trace),
        "debug" => Some(Level::Debug),
        "info" => Some(Level::Info),
        "warning" => Some(Level::Warning),
        "error" => Some(Level::Error),
        "critical" => Some(Level::Critical),
        _ => None,
    }
}

pub fn log_from_env() -> Logger {
    let level = env::var(LOG_LEVEL_ENV_VAR)
        .ok()
        .and_then(|l| parse_log_level(&l))
        .unwrap_or(DEFAULT_LOG_LEVEL);
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    Logger::root(
        Mutex::new(LevelFilter::new(
            slog_term::FullFormat::new(plain).build(),
            level,
        ))
        .fuse(),
        o!("build-id" => "0.1.0"),
    )
}

pub fn v4_server(last: u8) -> ServerIdentity {
    ServerIdentity::new(SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, last)),
        853,
    ))
}

pub fn v6_server(last: u16) -> ServerIdentity {
    ServerIdentity::new(SocketAddr::new(
        IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, last)),
        853,
    ))
}

/// How a fake server answers.
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Answer with the query itself
    Echo,
    /// Answer with this many bytes
    Answer(usize),
    /// Fail every query with this code
    Fail(TransportCode),
    /// Wait on the first barrier to announce the query is in flight, then on
    /// the second before echoing the query
    Block(Arc<Barrier>, Arc<Barrier>),
}

/// Records what the fake transports were asked to do.
#[derive(Debug, Default)]
pub struct FakeNetwork {
    behaviors: Mutex<HashMap<SocketAddr, Behavior>>,
    created: Mutex<Vec<(ServerIdentity, Mark)>>,
    queried: Mutex<Vec<(ServerIdentity, Mark)>>,
    next_id: AtomicUsize,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeNetwork::default())
    }

    pub fn set_behavior(&self, server: &ServerIdentity, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(server.address, behavior);
    }

    /// The number of transports built for (`server`, `mark`).
    pub fn created_count(&self, server: &ServerIdentity, mark: Mark) -> usize {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, m)| s == server && *m == mark)
            .count()
    }

    pub fn total_created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    /// The servers queried, in order.
    pub fn queried_servers(&self) -> Vec<ServerIdentity> {
        self.queried
            .lock()
            .unwrap()
            .iter()
            .map(|(s, _)| s.clone())
            .collect()
    }
}

/// Build a transport for (`server`, `mark`) that answers according to the
/// behaviors set on `network`.
pub fn fake_transport(
    network: &Arc<FakeNetwork>,
    server: &ServerIdentity,
    mark: Mark,
) -> FakeTransport {
    network.created.lock().unwrap().push((server.clone(), mark));
    FakeTransport {
        id: network.next_id.fetch_add(1, Ordering::SeqCst),
        server: server.clone(),
        mark,
        network: Arc::clone(network),
    }
}

#[derive(Debug)]
pub struct FakeTransport {
    pub id: usize,
    server: ServerIdentity,
    mark: Mark,
    network: Arc<FakeNetwork>,
}

impl Transport for FakeTransport {
    fn query(&self, query: &[u8]) -> TransportResponse {
        self.network
            .queried
            .lock()
            .unwrap()
            .push((self.server.clone(), self.mark));

        let behavior = self
            .network
            .behaviors
            .lock()
            .unwrap()
            .get(&self.server.address)
            .cloned()
            .unwrap_or(Behavior::Echo);

        match behavior {
            Behavior::Echo => TransportResponse::success(query.to_vec()),
            Behavior::Answer(len) => TransportResponse::success(vec![0xab; len]),
            Behavior::Fail(code) => TransportResponse {
                code,
                response: Vec::new(),
            },
            Behavior::Block(in_flight, finish) => {
                in_flight.wait();
                finish.wait();
                TransportResponse::success(query.to_vec())
            }
        }
    }
}
