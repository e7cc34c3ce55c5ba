// Copyright 2020 Joyent, Inc.

use std::sync::Mutex;
use std::thread;

use slog::{info, o, Drain, Logger};

use dns_tls_dispatcher::dispatcher::types::{DispatcherOptions, Response};
use dns_tls_dispatcher::dispatcher::Dispatcher;
use dns_tls_dispatcher::server::{server_key, ServerIdentity};
use dns_tls_dispatcher::transport::{
    Mark, Transport, TransportCode, TransportResponse,
};

// Stands in for a TLS session: answers every query with the query itself,
// except that IPv6 servers are unreachable.
#[derive(Debug)]
pub struct EchoTransport {
    reachable: bool,
}

impl EchoTransport {
    fn new(server: &ServerIdentity, _mark: Mark) -> Self {
        EchoTransport {
            reachable: !server.is_ipv6(),
        }
    }
}

impl Transport for EchoTransport {
    fn query(&self, query: &[u8]) -> TransportResponse {
        if self.reachable {
            TransportResponse::success(query.to_vec())
        } else {
            TransportResponse {
                code: TransportCode::NetworkError,
                response: Vec::new(),
            }
        }
    }
}

fn main() {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let log = Logger::root(
        Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
        o!("build-id" => "0.1.0"),
    );

    let servers: Vec<ServerIdentity> =
        ["192.0.2.53", "2001:db8::53", "192.0.2.54:853"]
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();

    for server in servers.iter() {
        info!(log, "configured server {} ({})", server, server_key(server));
    }

    let opts = DispatcherOptions {
        idle_timeout: None,
        log: Some(log.clone()),
    };
    let dispatcher = Dispatcher::new(opts, EchoTransport::new);

    let threads: Vec<_> = (0..4u32)
        .map(|mark| {
            let dispatcher = dispatcher.clone();
            let servers = servers.clone();
            let log = log.clone();
            thread::spawn(move || {
                let mut answer = [0u8; 512];
                for n in 0..5u8 {
                    let query = [n; 32];
                    let (code, len) =
                        dispatcher.query(&servers, mark, &query, &mut answer);
                    if code == Response::Success {
                        info!(log, "mark {} query {}: {} bytes", mark, n, len);
                    } else {
                        info!(log, "mark {} query {}: {}", mark, n, code);
                    }
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }

    let stats = dispatcher.get_stats();
    info!(
        log,
        "sessions: {}, sweeps: {}, evictions: {}",
        stats.sessions,
        stats.cleanup_sweeps,
        stats.evictions
    );
}
