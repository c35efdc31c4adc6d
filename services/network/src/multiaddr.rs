//! Multiaddress parsing
//!
//! Listen and bootstrap endpoints keep the familiar multiaddr text form
//! (`/ip4/1.2.3.4/tcp/4001`, `/dns4/node.example/tcp/4001`); internally
//! everything dials plain TCP.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultiaddrError {
    #[error("unsupported multiaddr: {0}")]
    Unsupported(String),

    #[error("bad port in multiaddr: {0}")]
    BadPort(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum HostKind {
    Ip4,
    Dns4,
}

/// A `/ip4|dns4/<host>/tcp/<port>` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Multiaddr {
    kind: HostKind,
    host: String,
    port: u16,
}

impl Multiaddr {
    pub fn ip4(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: HostKind::Ip4,
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form for the dialer.
    pub fn socket_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for Multiaddr {
    type Err = MultiaddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        // Expected shape: ["", "ip4", host, "tcp", port]
        if parts.len() != 5 || !parts[0].is_empty() || parts[3] != "tcp" {
            return Err(MultiaddrError::Unsupported(s.to_string()));
        }
        let kind = match parts[1] {
            "ip4" => HostKind::Ip4,
            "dns4" => HostKind::Dns4,
            _ => return Err(MultiaddrError::Unsupported(s.to_string())),
        };
        if parts[2].is_empty() {
            return Err(MultiaddrError::Unsupported(s.to_string()));
        }
        let port = parts[4]
            .parse::<u16>()
            .map_err(|_| MultiaddrError::BadPort(s.to_string()))?;
        Ok(Self {
            kind,
            host: parts[2].to_string(),
            port,
        })
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.kind {
            HostKind::Ip4 => "ip4",
            HostKind::Dns4 => "dns4",
        };
        write!(f, "/{}/{}/tcp/{}", scheme, self.host, self.port)
    }
}

impl Serialize for Multiaddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Multiaddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
