//! A live peer connection: four queues, four workers, one lifecycle.
//!
//! ```text
//!            enqueue()                               service_*()
//!               │                                        ▲
//!     ┌─────────┴─────────┐                    ┌─────────┴─────────┐
//!     ▼                   ▼                    │                   │
//! [out reliable]   [out unreliable]     [in reliable]     [in unreliable]
//!     │                   │                    ▲                   ▲
//! stream writer    datagram writer       stream reader    datagram reader
//!     │                   │                    │                   │
//!     └── TCP ────────────┼────────────────────┘                   │
//!                         └── UDP ─────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Active ──(shutdown / peer gone / I/O failure)──→ Terminating ──→ Closed
//! ```
//!
//! The state lives in a `watch` channel, so every transition also wakes
//! every worker parked on it. `Closed` is set once all four workers have
//! returned and released their socket halves.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tidewire_protocol::{
    Catalog, Channel, ClientDelivery, CoreMessage, Disconnect, Packet, Ping,
    Pong, ServerDelivery,
};
use tidewire_transport::{ConnectionId, TransportEndpoint};
use tokio::net::ToSocketAddrs;
use tokio::sync::watch;

use crate::queue::PacketQueue;
use crate::{worker, ConnectionConfig, ConnectionError};

/// `latency_micros` value meaning "no pong received yet".
const NO_LATENCY: u64 = u64::MAX;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Which side of the game this connection belongs to. Only used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    ClientSide,
    ServerSide,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientSide => write!(f, "client"),
            Self::ServerSide => write!(f, "server"),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Workers running, messages accepted.
    Active,
    /// Shutting down: enqueue is refused, writers drain, the stream
    /// reader keeps reading until the peer ends its stream.
    Terminating,
    /// Every worker has exited. Terminal.
    Closed,
}

impl ConnectionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Terminating => write!(f, "Terminating"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

/// State shared by the owner handle and the four workers.
pub(crate) struct Shared<P> {
    pub(crate) id: ConnectionId,
    pub(crate) role: Role,
    pub(crate) peer_addr: SocketAddr,
    pub(crate) catalog: Arc<Catalog<P>>,
    pub(crate) config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    pub(crate) outbound_reliable: PacketQueue<P>,
    pub(crate) outbound_unreliable: PacketQueue<P>,
    inbound_reliable: PacketQueue<P>,
    inbound_unreliable: PacketQueue<P>,
    latency_micros: AtomicU64,
    /// Set once the single `Disconnect` notice has been posted inbound.
    notice_posted: AtomicBool,
    /// Set once a `Disconnect` has been queued for the peer.
    farewell_queued: AtomicBool,
    epoch: Instant,
}

impl<P: Packet> Shared<P> {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn outbound(&self, channel: Channel) -> &PacketQueue<P> {
        match channel {
            Channel::Reliable => &self.outbound_reliable,
            Channel::Unreliable => &self.outbound_unreliable,
        }
    }

    fn inbound(&self, channel: Channel) -> &PacketQueue<P> {
        match channel {
            Channel::Reliable => &self.inbound_reliable,
            Channel::Unreliable => &self.inbound_unreliable,
        }
    }

    /// Routes `packet` to the outbound queue of its channel. Refused
    /// (and dropped) once the connection has left `Active`.
    pub(crate) fn enqueue(&self, packet: P) -> bool {
        // Held across the push so `begin_terminating` cannot slip in
        // between; the writer's final drain then sees every packet
        // accepted here.
        let state = self.state.borrow();
        if !state.is_active() {
            tracing::trace!(
                conn_id = %self.id,
                message = packet.name(),
                "connection not active, message dropped"
            );
            return false;
        }
        self.outbound(packet.channel()).push(packet);
        drop(state);
        true
    }

    /// Moves `Active → Terminating`. Only the first caller wins; it also
    /// posts the local `Disconnect` notice unless the peer's own notice
    /// was already posted.
    pub(crate) fn begin_terminating(&self, reason: &str) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.is_active() {
                *state = ConnectionState::Terminating;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(
                conn_id = %self.id,
                role = %self.role,
                %reason,
                "connection terminating"
            );
            self.post_notice(|| {
                P::from_core(CoreMessage::Disconnect(Disconnect {
                    reason: reason.to_owned(),
                }))
            });
        }
        changed
    }

    pub(crate) fn mark_closed(&self) {
        self.state.send_replace(ConnectionState::Closed);
        tracing::info!(
            conn_id = %self.id,
            role = %self.role,
            peer = %self.peer_addr,
            "connection closed"
        );
    }

    fn post_notice(&self, notice: impl FnOnce() -> P) {
        if !self.notice_posted.swap(true, Ordering::AcqRel) {
            self.inbound_reliable.push(notice());
        }
    }

    /// Handles one decoded inbound packet. Ping and Pong are consumed
    /// here; everything else is queued for delivery.
    pub(crate) fn accept_inbound(&self, packet: P, channel: Channel) {
        match packet.as_core() {
            Some(CoreMessage::Ping(ping)) => {
                let pong = Pong {
                    sent_at_micros: ping.sent_at_micros,
                };
                self.enqueue(P::from_core(CoreMessage::Pong(pong)));
            }
            Some(CoreMessage::Pong(pong)) => {
                self.record_pong(pong.sent_at_micros);
            }
            Some(CoreMessage::Disconnect(notice)) => {
                let reason = notice.reason.clone();
                tracing::info!(conn_id = %self.id, %reason, "peer disconnected");
                self.post_notice(|| packet);
                self.begin_terminating(&reason);
            }
            _ => self.inbound(channel).push(packet),
        }
    }

    pub(crate) fn send_ping(&self) {
        let ping = Ping {
            sent_at_micros: self.now_micros(),
        };
        self.enqueue(P::from_core(CoreMessage::Ping(ping)));
    }

    fn record_pong(&self, sent_at_micros: i64) {
        let rtt = self.now_micros() - sent_at_micros;
        match u64::try_from(rtt) {
            Ok(rtt) => {
                self.latency_micros.store(rtt, Ordering::Relaxed);
                tracing::trace!(conn_id = %self.id, rtt_micros = rtt, "pong");
            }
            Err(_) => {
                tracing::debug!(
                    conn_id = %self.id,
                    sent_at_micros,
                    "pong from the future ignored"
                );
            }
        }
    }

    fn now_micros(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(i64::MAX)
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Owner handle of one live peer connection.
///
/// Dropping the handle starts termination; the workers then wind down
/// on their own.
pub struct Connection<P: Packet> {
    shared: Arc<Shared<P>>,
}

impl<P: Packet> Connection<P> {
    /// Takes ownership of an opened endpoint and starts the workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(
        endpoint: TransportEndpoint,
        role: Role,
        catalog: Arc<Catalog<P>>,
        config: ConnectionConfig,
    ) -> Self {
        let id = endpoint.id();
        let peer_addr = endpoint.peer_addr();
        let halves = endpoint.into_split(config.max_datagram_size);
        let (state, _) = watch::channel(ConnectionState::Active);

        let shared = Arc::new(Shared {
            id,
            role,
            peer_addr,
            catalog,
            config,
            state,
            outbound_reliable: PacketQueue::new(),
            outbound_unreliable: PacketQueue::new(),
            inbound_reliable: PacketQueue::new(),
            inbound_unreliable: PacketQueue::new(),
            latency_micros: AtomicU64::new(NO_LATENCY),
            notice_posted: AtomicBool::new(false),
            farewell_queued: AtomicBool::new(false),
            epoch: Instant::now(),
        });
        worker::spawn(Arc::clone(&shared), halves);

        tracing::info!(conn_id = %id, %role, peer = %peer_addr, "connection opened");
        Self { shared }
    }

    /// Connects to a server and opens a client-side connection.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        catalog: Arc<Catalog<P>>,
        config: ConnectionConfig,
    ) -> Result<Self, ConnectionError> {
        let endpoint = TransportEndpoint::connect(addr).await?;
        Ok(Self::open(endpoint, Role::ClientSide, catalog, config))
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn catalog(&self) -> &Arc<Catalog<P>> {
        &self.shared.catalog
    }

    /// Last measured round-trip time, or `None` before the first pong.
    pub fn latency(&self) -> Option<Duration> {
        match self.shared.latency_micros.load(Ordering::Relaxed) {
            NO_LATENCY => None,
            micros => Some(Duration::from_micros(micros)),
        }
    }

    /// Queues `packet` for the writer of its channel. Never blocks.
    ///
    /// Returns `false` (and drops the packet) when the connection is no
    /// longer active.
    pub fn enqueue(&self, packet: P) -> bool {
        self.shared.enqueue(packet)
    }

    /// Like [`enqueue`](Self::enqueue), but reports why a packet could
    /// not be queued. Also rejects message types missing from the
    /// catalog, which the writer would otherwise drop with a warning.
    pub fn try_send(&self, packet: P) -> Result<(), ConnectionError> {
        self.shared.catalog.id_for(packet.message())?;
        if self.shared.enqueue(packet) {
            Ok(())
        } else {
            Err(ConnectionError::NotActive(self.shared.id))
        }
    }

    /// Removes the oldest delivered packet of `channel`, if any.
    pub fn poll_inbound(&self, channel: Channel) -> Option<P> {
        self.shared.inbound(channel).pop()
    }

    pub fn outbound_len(&self, channel: Channel) -> usize {
        self.shared.outbound(channel).len()
    }

    pub fn inbound_len(&self, channel: Channel) -> usize {
        self.shared.inbound(channel).len()
    }

    /// Delivers everything queued inbound to a client context, reliable
    /// packets first. Returns how many packets were delivered.
    pub fn service_client<C: ?Sized>(&self, ctx: &mut C) -> usize
    where
        P: ClientDelivery<C>,
    {
        let mut delivered = 0;
        for packet in self.take_inbound() {
            packet.deliver_to_client(ctx);
            delivered += 1;
        }
        delivered
    }

    /// Delivers everything queued inbound to a server context, tagged
    /// with this connection's id.
    pub fn service_server<S: ?Sized>(&self, ctx: &mut S) -> usize
    where
        P: ServerDelivery<S>,
    {
        let from = self.shared.id;
        let mut delivered = 0;
        for packet in self.take_inbound() {
            packet.deliver_to_server(from, ctx);
            delivered += 1;
        }
        delivered
    }

    fn take_inbound(&self) -> impl Iterator<Item = P> {
        self.shared
            .inbound_reliable
            .take_all()
            .into_iter()
            .chain(self.shared.inbound_unreliable.take_all())
    }

    /// Graceful shutdown: tells the peer, drains, and waits for `Closed`.
    ///
    /// Safe to call any number of times from any number of tasks; every
    /// call returns once the connection is closed.
    pub async fn shutdown(&self) {
        self.shutdown_with_reason("connection closed locally").await;
    }

    /// [`shutdown`](Self::shutdown) with the reason sent to the peer.
    pub async fn shutdown_with_reason(&self, reason: &str) {
        if self.shared.is_active()
            && !self.shared.farewell_queued.swap(true, Ordering::AcqRel)
        {
            self.shared.enqueue(P::from_core(CoreMessage::Disconnect(
                Disconnect {
                    reason: reason.to_owned(),
                },
            )));
        }
        self.shared.begin_terminating(reason);
        self.closed().await;
    }

    /// Waits until the connection reaches `Closed`, without starting a
    /// shutdown.
    pub async fn closed(&self) {
        let mut state = self.shared.subscribe();
        // The sender lives in `shared`, which we hold, so this cannot
        // fail.
        let _ = state
            .wait_for(|s| matches!(s, ConnectionState::Closed))
            .await;
    }
}

impl<P: Packet> Drop for Connection<P> {
    fn drop(&mut self) {
        self.shared.begin_terminating("connection handle dropped");
    }
}

impl<P: Packet> fmt::Debug for Connection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("role", &self.shared.role)
            .field("peer_addr", &self.shared.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}
