//! Shared fixtures for the connection integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tidewire_connection::{Connection, ConnectionConfig, Role};
use tidewire_protocol::{
    AnyMessage, Catalog, Channel, ChatMessage, ClientDelivery, CoreMessage,
    Message, Packet, ProtocolError, ServerDelivery, WireReader, WireWriter,
};
use tidewire_transport::{ConnectionId, TransportEndpoint, TransportListener};

pub const WAIT: Duration = Duration::from_secs(5);

// -- Packet -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Message for Position {
    const NAME: &'static str = "Position";
    const CHANNEL: Channel = Channel::Unreliable;

    fn encode(&self, w: &mut WireWriter) {
        w.put_f32(self.x);
        w.put_f32(self.y);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            x: r.read_f32()?,
            y: r.read_f32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestPacket {
    Core(CoreMessage),
    Position(Position),
}

impl From<Position> for TestPacket {
    fn from(m: Position) -> Self {
        Self::Position(m)
    }
}

impl Packet for TestPacket {
    fn message(&self) -> &dyn AnyMessage {
        match self {
            Self::Core(m) => m.message(),
            Self::Position(m) => m,
        }
    }

    fn from_core(msg: CoreMessage) -> Self {
        Self::Core(msg)
    }

    fn as_core(&self) -> Option<&CoreMessage> {
        match self {
            Self::Core(m) => Some(m),
            Self::Position(_) => None,
        }
    }
}

pub fn chat(pnum: i32, msg: &str) -> TestPacket {
    TestPacket::Core(CoreMessage::Chat(ChatMessage {
        pnum,
        msg: msg.into(),
    }))
}

pub fn position(x: f32, y: f32) -> TestPacket {
    TestPacket::Position(Position { x, y })
}

/// Records everything delivered to it.
#[derive(Debug, Default)]
pub struct Log {
    pub client: Vec<TestPacket>,
    pub server: Vec<(ConnectionId, TestPacket)>,
}

impl ClientDelivery<Log> for TestPacket {
    fn deliver_to_client(self, ctx: &mut Log) {
        ctx.client.push(self);
    }
}

impl ServerDelivery<Log> for TestPacket {
    fn deliver_to_server(self, from: ConnectionId, ctx: &mut Log) {
        ctx.server.push((from, self));
    }
}

// -- Setup ------------------------------------------------------------------

pub fn catalog() -> Arc<Catalog<TestPacket>> {
    let mut builder = Catalog::builder();
    builder.register_core();
    builder.register::<Position>();
    Arc::new(builder.build())
}

/// Config with a ping interval long enough to stay out of the way.
pub fn quiet_config() -> ConnectionConfig {
    ConnectionConfig {
        ping_interval: Duration::from_secs(60),
        ..ConnectionConfig::default()
    }
}

/// Opens a (client, server) connection pair over localhost.
pub async fn connection_pair(
    config: ConnectionConfig,
) -> (Connection<TestPacket>, Connection<TestPacket>) {
    connection_pair_with(catalog(), config).await
}

/// Like [`connection_pair`], with both sides sharing `catalog`.
pub async fn connection_pair_with(
    catalog: Arc<Catalog<TestPacket>>,
    config: ConnectionConfig,
) -> (Connection<TestPacket>, Connection<TestPacket>) {
    let listener = TransportListener::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = listener.local_addr().expect("local addr");

    let server_catalog = Arc::clone(&catalog);
    let server_config = config.clone();
    let server = tokio::spawn(async move {
        let endpoint = listener.accept().await.expect("should accept");
        Connection::open(
            endpoint,
            Role::ServerSide,
            server_catalog,
            server_config,
        )
    });
    let client = Connection::connect(addr, catalog, config)
        .await
        .expect("should connect");
    let server = server.await.expect("accept task");
    (client, server)
}

/// Accepts one server-side connection while a raw endpoint connects.
pub async fn raw_client_pair() -> (TransportEndpoint, Connection<TestPacket>)
{
    let listener = TransportListener::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = listener.local_addr().expect("local addr");

    let server = tokio::spawn(async move {
        let endpoint = listener.accept().await.expect("should accept");
        Connection::open(endpoint, Role::ServerSide, catalog(), quiet_config())
    });
    let raw = TransportEndpoint::connect(addr).await.expect("connect");
    let server = server.await.expect("accept task");
    (raw, server)
}

/// Polls `conn` until a packet arrives on `channel` or `WAIT` elapses.
pub async fn next_inbound(
    conn: &Connection<TestPacket>,
    channel: Channel,
) -> TestPacket {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(packet) = conn.poll_inbound(channel) {
                return packet;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for inbound packet")
}

/// Waits for `conn` to reach `Closed`, failing the test after `WAIT`.
pub async fn wait_closed(conn: &Connection<TestPacket>) {
    tokio::time::timeout(WAIT, conn.closed())
        .await
        .expect("connection should close");
}
