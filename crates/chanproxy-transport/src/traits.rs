use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A connected byte-stream endpoint.
///
/// Anything that can be split into independent read and write halves and
/// moved onto a runtime task qualifies: Unix streams, TCP streams, and
/// in-memory duplex pipes in tests.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A listening endpoint that hands out new byte-stream connections.
pub trait StreamListener: Send + 'static {
    /// Stream type produced for each accepted connection.
    type Stream: ByteStream;

    /// Wait for the next incoming connection.
    fn accept(&self) -> impl Future<Output = Result<Self::Stream>> + Send;

    /// Describes how a peer can reach this listener.
    fn connection_info(&self) -> ConnectionInfo;
}

/// The kind of transport a listener is bound on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Unix,
    Tcp,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Unix => "unix",
            TransportKind::Tcp => "tcp",
        }
    }
}

/// Reconnection details for a bound listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub transport: TransportKind,
    /// Socket path for `unix`, `host:port` for `tcp`.
    pub address: String,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.transport.as_str(), self.address)
    }
}
