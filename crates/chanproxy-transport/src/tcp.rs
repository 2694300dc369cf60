use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{ConnectionInfo, StreamListener, TransportKind};

/// TCP listener for channel hosts that are reached over the network.
pub struct TcpSocketListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpSocketListener {
    /// Bind and listen on `addr`. Port `0` picks an ephemeral port.
    pub async fn bind(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let address = format!("{addr:?}");
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { address, source })?;

        info!(%local_addr, "listening on tcp socket");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Connect to a listening TCP endpoint.
    pub async fn connect(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<TcpStream> {
        let address = format!("{addr:?}");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect {
                address: address.clone(),
                source,
            })?;
        // Frames are small and latency-sensitive.
        stream.set_nodelay(true)?;
        debug!(address, "connected to tcp socket");
        Ok(stream)
    }

    /// The bound local address, with the ephemeral port resolved.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl StreamListener for TcpSocketListener {
    type Stream = TcpStream;

    async fn accept(&self) -> Result<TcpStream> {
        let (stream, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted tcp connection");
        Ok(stream)
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            transport: TransportKind::Tcp,
            address: self.local_addr.to_string(),
        }
    }
}
