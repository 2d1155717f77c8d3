//! Chat room with player positions.
//!
//! ```text
//! chat server [addr]
//! chat client [addr] [name]
//! ```
//!
//! Clients type lines to chat, `move X Y` to broadcast a position over
//! the unreliable channel, and `/quit` to leave.

use std::sync::Arc;
use std::time::Duration;

use tidewire::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Packets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerMove { pub pnum: i32, pub x: f32, pub y: f32 }

impl Message for PlayerMove {
    const NAME: &'static str = "PlayerMove";
    const CHANNEL: Channel = Channel::Unreliable;

    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.pnum);
        w.put_f32(self.x);
        w.put_f32(self.y);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { pnum: r.read_i32()?, x: r.read_f32()?, y: r.read_f32()? })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GamePacket {
    Core(CoreMessage),
    Move(PlayerMove),
}

impl From<PlayerMove> for GamePacket {
    fn from(m: PlayerMove) -> Self { Self::Move(m) }
}

impl Packet for GamePacket {
    fn message(&self) -> &dyn AnyMessage {
        match self {
            Self::Core(m) => m.message(),
            Self::Move(m) => m,
        }
    }

    fn from_core(msg: CoreMessage) -> Self { Self::Core(msg) }

    fn as_core(&self) -> Option<&CoreMessage> {
        match self {
            Self::Core(m) => Some(m),
            _ => None,
        }
    }
}

/// Both sides build the same table: core messages first, then moves.
fn catalog() -> Arc<Catalog<GamePacket>> {
    let mut builder = Catalog::<GamePacket>::builder();
    builder.register_core();
    builder.register::<PlayerMove>();
    Arc::new(builder.build())
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Relays everything a player says or does to everyone else.
struct Room {
    players: ConnectionSet<GamePacket>,
    lines: Vec<String>,
}

impl ServerDelivery<Room> for GamePacket {
    fn deliver_to_server(self, from: ConnectionId, room: &mut Room) {
        match self {
            GamePacket::Core(CoreMessage::Chat(chat)) => {
                tracing::info!(%from, pnum = chat.pnum, msg = %chat.msg, "chat");
                room.lines.push(chat.msg.clone());
                let relay = GamePacket::Core(CoreMessage::Chat(chat));
                room.players.send_to_all_except(from, relay);
            }
            GamePacket::Core(CoreMessage::Disconnect(d)) => {
                tracing::info!(%from, reason = %d.reason, "player left");
            }
            GamePacket::Move(m) => {
                room.players.send_to_all_except(from, GamePacket::Move(m));
            }
            GamePacket::Core(_) => {}
        }
    }
}

async fn run_server(addr: &str) -> Result<(), TidewireError> {
    let server = Arc::new(ServerBuilder::new().bind(addr).build(catalog()).await?);
    let room = Arc::new(Mutex::new(Room { players: server.connections(), lines: Vec::new() }));

    let stopper = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.shutdown();
        }
    });

    server.run(room).await
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

#[derive(Default)]
struct View {
    player_number: Option<i32>,
    left: bool,
}

impl ClientDelivery<View> for GamePacket {
    fn deliver_to_client(self, view: &mut View) {
        match self {
            GamePacket::Core(CoreMessage::ConnectionEstablished(e)) => {
                println!("* joined as player {}", e.player_number);
                view.player_number = Some(e.player_number);
            }
            GamePacket::Core(CoreMessage::Chat(chat)) => {
                println!("[{}] {}", chat.pnum, chat.msg);
            }
            GamePacket::Core(CoreMessage::Disconnect(d)) => {
                println!("* disconnected: {}", d.reason);
                view.left = true;
            }
            GamePacket::Move(m) => {
                println!("* player {} moved to ({}, {})", m.pnum, m.x, m.y);
            }
            GamePacket::Core(_) => {}
        }
    }
}

/// Turns one typed line into a packet. `None` for `/quit`.
fn parse_line(line: &str, pnum: i32, name: &str) -> Option<GamePacket> {
    let line = line.trim();
    if line == "/quit" {
        return None;
    }
    let mut words = line.split_whitespace();
    if words.next() == Some("move") {
        let x = words.next().and_then(|w| w.parse().ok());
        let y = words.next().and_then(|w| w.parse().ok());
        if let (Some(x), Some(y)) = (x, y) {
            return Some(GamePacket::Move(PlayerMove { pnum, x, y }));
        }
    }
    let msg = format!("{name}: {line}");
    Some(GamePacket::Core(CoreMessage::Chat(ChatMessage { pnum, msg })))
}

async fn run_client(addr: &str, name: &str) -> Result<(), TidewireError> {
    let conn = Client::connect(addr, catalog(), ConnectionConfig::default()).await?;
    let mut view = View::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_millis(16));

    while !view.left {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    let pnum = view.player_number.unwrap_or(0);
                    match parse_line(&line, pnum, name) {
                        Some(packet) => conn.try_send(packet)?,
                        None => break,
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            },
            _ = tick.tick() => {
                conn.service_client(&mut view);
            }
        }
    }

    conn.shutdown_with_reason(&format!("{name} left")).await;
    conn.service_client(&mut view);
    if let Some(latency) = conn.latency() {
        tracing::info!(?latency, "last measured round trip");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let addr = args.get(1).map(String::as_str).unwrap_or(tidewire::DEFAULT_BIND_ADDR);
    match args.first().map(String::as_str) {
        Some("server") => run_server(addr).await?,
        Some("client") => {
            let name = args.get(2).map(String::as_str).unwrap_or("anon");
            run_client(addr, name).await?;
        }
        _ => eprintln!("usage: chat server|client [addr] [name]"),
    }
    Ok(())
}
