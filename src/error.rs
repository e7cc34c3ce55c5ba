// Copyright 2020 Joyent, Inc.

use thiserror::Error;

/// Errors raised while configuring a dispatcher or describing its servers.
///
/// Query outcomes are never reported through this type; they are expressed as
/// [`Response`](../dispatcher/types/enum.Response.html) codes.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid DNS-over-TLS server address")]
    InvalidServerAddress(#[from] std::net::AddrParseError),
    #[error("invalid server certificate fingerprint: {0}")]
    InvalidFingerprint(String),
    #[error("idle timeout must be greater than zero")]
    InvalidIdleTimeout,
}
