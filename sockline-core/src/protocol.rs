//! Transport protocols a client or server can speak.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transport selected at construction. Decides the dial/listen strategy and whether
/// frames arrive on a byte stream or as individual datagrams.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Tls,
    Unix,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [Protocol::Tcp, Protocol::Udp, Protocol::Tls, Protocol::Unix];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Tls => "tls",
            Protocol::Unix => "unix",
        }
    }

    /// True for connection-oriented byte streams (TCP, TLS, Unix).
    pub fn is_stream(&self) -> bool {
        !matches!(self, Protocol::Udp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseProtocolError(s.to_string()))
    }
}

/// A protocol name outside tcp/udp/tls/unix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol: {0}")]
pub struct ParseProtocolError(pub String);
