// Copyright 2020 Joyent, Inc.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use derive_more::{Display, From, Into};
use sha1::Sha1;

use crate::error::Error;

/// The well-known DNS-over-TLS port.
pub const DEFAULT_DOT_PORT: ServerPort = 853;

/// A base64 encoded identifier based on the server address, name, and
/// fingerprints.
#[derive(
    Clone, Debug, Display, Eq, From, Hash, Into, Ord, PartialOrd, PartialEq,
)]
pub struct ServerKey(String);
/// The port number for a server. This is a type alias for u16.
pub type ServerPort = u16;
/// The host name the server certificate is expected to carry. An empty name
/// means no name validation (opportunistic mode). This is a type alias for
/// String.
pub type ServerName = String;
/// A pinned certificate fingerprint. This is a type alias for Vec<u8>.
pub type Fingerprint = Vec<u8>;

/// The address family of a server.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// A type representing one remote DNS-over-TLS endpoint along with the
/// credentials it is expected to present.
///
/// Two identities are equal only if the address, the expected name, and the
/// set of pinned fingerprints are all equal. Sessions are never shared between
/// identities that differ in any of these.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ServerIdentity {
    /// The address and port of the server.
    pub address: SocketAddr,
    /// The expected certificate host name.
    pub name: ServerName,
    /// The pinned certificate fingerprints, if any.
    pub fingerprints: BTreeSet<Fingerprint>,
}

impl ServerIdentity {
    /// Return a new `ServerIdentity` with no expected name and no pinned
    /// fingerprints.
    pub fn new(address: SocketAddr) -> Self {
        ServerIdentity {
            address,
            name: ServerName::new(),
            fingerprints: BTreeSet::new(),
        }
    }

    pub fn with_name<S: Into<ServerName>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprints.insert(fingerprint);
        self
    }

    /// Add pinned fingerprints given in their base64 encoded form.
    pub fn with_base64_fingerprints(
        mut self,
        encoded: &[&str],
    ) -> Result<Self, Error> {
        for fp in encoded {
            let decoded = base64::decode(fp)
                .map_err(|e| Error::InvalidFingerprint(e.to_string()))?;
            if decoded.is_empty() {
                return Err(Error::InvalidFingerprint(String::from(
                    "empty fingerprint",
                )));
            }
            self.fingerprints.insert(decoded);
        }
        Ok(self)
    }

    pub fn family(&self) -> AddressFamily {
        match self.address.ip() {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    pub fn is_ipv6(&self) -> bool {
        self.family() == AddressFamily::Ipv6
    }
}

impl From<SocketAddr> for ServerIdentity {
    fn from(address: SocketAddr) -> Self {
        ServerIdentity::new(address)
    }
}

impl FromStr for ServerIdentity {
    type Err = Error;

    // Accepts either "addr:port" or a bare address, in which case the
    // DNS-over-TLS port is implied.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = match SocketAddr::from_str(s) {
            Ok(addr) => addr,
            Err(_) => SocketAddr::new(IpAddr::from_str(s)?, DEFAULT_DOT_PORT),
        };
        Ok(ServerIdentity::new(address))
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if self.name.is_empty() {
            write!(fmt, "{}", self.address)
        } else {
            write!(fmt, "{}@{}", self.name, self.address)
        }
    }
}

/// Return a base64 encoded identifier based on the fields of the server.
pub fn server_key(server: &ServerIdentity) -> ServerKey {
    let mut sha1 = Sha1::new();
    sha1.update(server.address.to_string().as_bytes());
    sha1.update(b"||");
    sha1.update(server.name.as_bytes());
    for fp in server.fingerprints.iter() {
        sha1.update(b"||");
        sha1.update(fp);
    }

    base64::encode(&sha1.digest().bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{Ipv4Addr, Ipv6Addr};

    fn v4(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, last)), 853)
    }

    #[test]
    fn identity_equality_includes_credentials() {
        let plain = ServerIdentity::new(v4(1));
        let named = ServerIdentity::new(v4(1)).with_name("dns.example.com");
        let pinned = ServerIdentity::new(v4(1)).with_fingerprint(vec![1, 2]);

        assert_eq!(plain, ServerIdentity::new(v4(1)));
        assert_ne!(plain, named);
        assert_ne!(plain, pinned);
        assert_ne!(server_key(&plain), server_key(&named));
        assert_ne!(server_key(&plain), server_key(&pinned));
        assert_eq!(server_key(&named), server_key(&named.clone()));
    }

    #[test]
    fn identity_family() {
        let s4 = ServerIdentity::new(v4(1));
        let s6 = ServerIdentity::new(SocketAddr::new(
            IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)),
            853,
        ));
        assert_eq!(s4.family(), AddressFamily::Ipv4);
        assert!(!s4.is_ipv6());
        assert_eq!(s6.family(), AddressFamily::Ipv6);
        assert!(s6.is_ipv6());
    }

    #[test]
    fn identity_from_str() {
        let with_port: ServerIdentity = "192.0.2.1:8853".parse().unwrap();
        assert_eq!(with_port.address.port(), 8853);

        let bare: ServerIdentity = "2001:db8::1".parse().unwrap();
        assert_eq!(bare.address.port(), DEFAULT_DOT_PORT);
        assert!(bare.is_ipv6());

        let bracketed: ServerIdentity = "[2001:db8::1]:853".parse().unwrap();
        assert_eq!(bare, bracketed);

        match "not-an-address".parse::<ServerIdentity>() {
            Err(Error::InvalidServerAddress(_)) => (),
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn identity_base64_fingerprints() {
        let fp = base64::encode(&[0xde, 0xad, 0xbe, 0xef]);
        let server = ServerIdentity::new(v4(1))
            .with_base64_fingerprints(&[fp.as_str()])
            .unwrap();
        assert!(server.fingerprints.contains(&vec![0xde, 0xad, 0xbe, 0xef]));

        let bad = ServerIdentity::new(v4(1))
            .with_base64_fingerprints(&["definitely not base64!"]);
        assert!(bad.is_err());

        let empty = ServerIdentity::new(v4(1)).with_base64_fingerprints(&[""]);
        assert!(empty.is_err());
    }

    #[test]
    fn identity_display() {
        let plain = ServerIdentity::new(v4(7));
        assert_eq!(plain.to_string(), "192.0.2.7:853");
        let named = plain.with_name("dot.example.com");
        assert_eq!(named.to_string(), "dot.example.com@192.0.2.7:853");
    }
}
