//! Paired TCP + UDP endpoint bound to a single remote peer.
//!
//! The endpoint handshake runs on the freshly opened stream before any
//! frame is exchanged:
//!
//! ```text
//! connector                          acceptor
//!   bind UDP (same local IP, port 0)   bind UDP (same local IP, port 0)
//!   ── u16 BE datagram port ──────────→
//!   ←────────────────── u16 BE datagram port ──
//!   udp.connect(peer_ip:port)          udp.connect(peer_ip:port)
//! ```
//!
//! After the exchange each UDP socket only talks to its peer.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs, UdpSocket};

use crate::{ConnectionId, TransportError};

/// How long the datagram port exchange may take.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest datagram payload that fits an Ethernet MTU without IP
/// fragmentation.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1472;

/// Accepts incoming peers on a TCP port.
pub struct TransportListener {
    listener: TcpListener,
}

impl TransportListener {
    /// Binds a listener to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        tracing::info!(addr, "transport listening");
        Ok(Self { listener })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for the next peer and completes the endpoint handshake.
    pub async fn accept(&self) -> Result<TransportEndpoint, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        let endpoint = TransportEndpoint::open(stream, false).await?;
        tracing::debug!(id = %endpoint.id, %addr, "accepted endpoint");
        Ok(endpoint)
    }
}

/// One reliable stream and one datagram socket bound to the same peer.
pub struct TransportEndpoint {
    id: ConnectionId,
    stream: TcpStream,
    datagram: UdpSocket,
    peer_addr: SocketAddr,
    peer_datagram_addr: SocketAddr,
}

impl TransportEndpoint {
    /// Opens a stream to `addr` and completes the endpoint handshake.
    pub async fn connect(
        addr: impl ToSocketAddrs,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(TransportError::ConnectFailed)?;
        let endpoint = Self::open(stream, true).await?;
        tracing::debug!(
            id = %endpoint.id,
            peer = %endpoint.peer_addr,
            "connected endpoint"
        );
        Ok(endpoint)
    }

    async fn open(
        mut stream: TcpStream,
        initiator: bool,
    ) -> Result<Self, TransportError> {
        stream.set_nodelay(true).map_err(TransportError::ConnectFailed)?;
        let local_addr =
            stream.local_addr().map_err(TransportError::ConnectFailed)?;
        let peer_addr =
            stream.peer_addr().map_err(TransportError::ConnectFailed)?;

        let datagram = UdpSocket::bind(SocketAddr::new(local_addr.ip(), 0))
            .await
            .map_err(TransportError::BindFailed)?;
        let own_port = datagram
            .local_addr()
            .map_err(TransportError::BindFailed)?
            .port();

        let exchange = async {
            if initiator {
                stream.write_u16(own_port).await?;
                stream.read_u16().await
            } else {
                let port = stream.read_u16().await?;
                stream.write_u16(own_port).await?;
                Ok(port)
            }
        };
        let peer_port = match tokio::time::timeout(HANDSHAKE_TIMEOUT, exchange)
            .await
        {
            Ok(Ok(port)) => port,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TransportError::ConnectionClosed(
                    "peer closed during handshake".into(),
                ));
            }
            Ok(Err(e)) => {
                return Err(TransportError::HandshakeFailed(e.to_string()));
            }
            Err(_) => {
                return Err(TransportError::HandshakeFailed(
                    "timed out waiting for datagram port".into(),
                ));
            }
        };

        let peer_datagram_addr = SocketAddr::new(peer_addr.ip(), peer_port);
        datagram
            .connect(peer_datagram_addr)
            .await
            .map_err(TransportError::ConnectFailed)?;

        Ok(Self {
            id: ConnectionId::allocate(),
            stream,
            datagram,
            peer_addr,
            peer_datagram_addr,
        })
    }

    /// Returns the unique identifier for this endpoint.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the peer's stream address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Returns the peer's datagram address.
    pub fn peer_datagram_addr(&self) -> SocketAddr {
        self.peer_datagram_addr
    }

    /// Returns the local datagram address.
    pub fn local_datagram_addr(&self) -> io::Result<SocketAddr> {
        self.datagram.local_addr()
    }

    /// Splits the endpoint into its four single-owner halves.
    ///
    /// `max_datagram_size` bounds the receive buffer of the datagram
    /// reader; longer datagrams are truncated by the OS.
    pub fn into_split(self, max_datagram_size: usize) -> EndpointHalves {
        let (read, write) = self.stream.into_split();
        let datagram = Arc::new(self.datagram);
        EndpointHalves {
            reliable_tx: ReliableSender { inner: write },
            reliable_rx: ReliableReceiver { inner: read },
            unreliable_tx: UnreliableSender {
                socket: Arc::clone(&datagram),
            },
            unreliable_rx: UnreliableReceiver {
                socket: datagram,
                max_datagram_size,
            },
        }
    }
}

/// The four halves of a split [`TransportEndpoint`].
pub struct EndpointHalves {
    pub reliable_tx: ReliableSender,
    pub reliable_rx: ReliableReceiver,
    pub unreliable_tx: UnreliableSender,
    pub unreliable_rx: UnreliableReceiver,
}

/// Write side of the reliable stream.
pub struct ReliableSender {
    inner: OwnedWriteHalf,
}

impl ReliableSender {
    /// Writes all of `data` to the stream. Waits for socket buffer space.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.inner
            .write_all(data)
            .await
            .map_err(TransportError::SendFailed)
    }

    /// Flushes buffered stream data.
    pub async fn flush(&mut self) -> Result<(), TransportError> {
        self.inner.flush().await.map_err(TransportError::SendFailed)
    }

    /// Shuts down the write direction of the stream.
    pub async fn close(mut self) -> Result<(), TransportError> {
        self.inner
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)
    }
}

/// Read side of the reliable stream.
pub struct ReliableReceiver {
    inner: OwnedReadHalf,
}

impl ReliableReceiver {
    /// Appends whatever bytes are available to `buf`, waiting for at
    /// least one. Returns `0` once the peer has closed the stream.
    pub async fn receive(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<usize, TransportError> {
        self.inner
            .read_buf(buf)
            .await
            .map_err(TransportError::ReceiveFailed)
    }
}

/// Send side of the datagram socket.
pub struct UnreliableSender {
    socket: Arc<UdpSocket>,
}

impl UnreliableSender {
    /// Sends one datagram to the peer.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.socket
            .send(data)
            .await
            .map(|_| ())
            .map_err(TransportError::SendFailed)
    }
}

/// Receive side of the datagram socket.
pub struct UnreliableReceiver {
    socket: Arc<UdpSocket>,
    max_datagram_size: usize,
}

impl UnreliableReceiver {
    /// Waits for the next datagram from the peer.
    pub async fn receive(&mut self) -> Result<Bytes, TransportError> {
        let mut buf = BytesMut::with_capacity(self.max_datagram_size);
        self.socket
            .recv_buf(&mut buf)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        Ok(buf.freeze())
    }
}
