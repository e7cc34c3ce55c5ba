// Copyright 2020 Joyent, Inc.

/// An opaque routing context (the socket mark) a query is sent under. Sessions
/// are never shared across marks. This is a type alias for u32.
pub type Mark = u32;

/// The outcome of a query as reported by a transport.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransportCode {
    /// The server answered.
    Success,
    /// The connection, handshake, or I/O with the server failed.
    NetworkError,
    /// Any other failure inside the transport.
    InternalError,
}

/// The result of one query sent over a transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportResponse {
    pub code: TransportCode,
    /// The raw answer. Only meaningful when `code` is `Success`.
    pub response: Vec<u8>,
}

impl TransportResponse {
    pub fn success(response: Vec<u8>) -> Self {
        TransportResponse {
            code: TransportCode::Success,
            response,
        }
    }

    pub fn network_error() -> Self {
        TransportResponse {
            code: TransportCode::NetworkError,
            response: Vec::new(),
        }
    }

    pub fn internal_error() -> Self {
        TransportResponse {
            code: TransportCode::InternalError,
            response: Vec::new(),
        }
    }
}

/// DNS-over-TLS transport
///
/// The `Transport` trait defines the interface a TLS session to one server
/// must implement in order to be driven by a
/// [`Dispatcher`](../dispatcher/struct.Dispatcher.html). One transport owns
/// one connection to one server under one mark, and it is created lazily the
/// first time a query is dispatched for that pair. Connecting, handshaking,
/// certificate validation, and framing all belong to the transport.
///
/// The dispatcher shares a single transport among every caller querying the
/// same server under the same mark, and it calls `query` without holding any
/// dispatcher lock. Implementations must therefore accept concurrent calls to
/// `query`, either by pipelining them over the connection or by queueing them
/// internally. Nothing about the relative order of concurrent answers is
/// assumed.
///
/// A transport is closed by dropping it. The dispatcher drops its handle when
/// the session is evicted for being idle.
pub trait Transport: Send + Sync + 'static {
    /// Send one wire-format query and block until the answer arrives or the
    /// attempt fails. Any deadline must be enforced by the implementation.
    fn query(&self, query: &[u8]) -> TransportResponse;
}
