//! The server's collection of live connections.
//!
//! Think of this as the server-side registry: the accept loop inserts,
//! game code sends and broadcasts, and one aggregation loop services
//! every connection's inbound queues.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use tidewire_protocol::{Packet, ServerDelivery};
use tidewire_transport::ConnectionId;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::{Connection, ConnectionError, ConnectionState};

type ConnectionMap<P> = HashMap<ConnectionId, Arc<Connection<P>>>;

/// Cheap-to-clone handle to a shared set of connections.
///
/// Iteration always works on a snapshot taken under the lock, so
/// delivery code never runs while the set is locked.
pub struct ConnectionSet<P: Packet> {
    inner: Arc<RwLock<ConnectionMap<P>>>,
}

impl<P: Packet> Clone for ConnectionSet<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Packet> Default for ConnectionSet<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Packet> ConnectionSet<P> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Adds a connection and returns the shared handle to it.
    pub fn insert(&self, connection: Connection<P>) -> Arc<Connection<P>> {
        let id = connection.id();
        let connection = Arc::new(connection);
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&connection));
        tracing::debug!(conn_id = %id, "connection added to set");
        connection
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection<P>>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every connection in the set, in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    fn snapshot(&self) -> Vec<Arc<Connection<P>>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn take(&self, id: ConnectionId) -> Option<Arc<Connection<P>>> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    // -- Sending ----------------------------------------------------------

    /// Queues `packet` on every connection. Returns how many accepted it.
    pub fn broadcast(&self, packet: P) -> usize
    where
        P: Clone,
    {
        self.snapshot()
            .iter()
            .filter(|conn| conn.enqueue(packet.clone()))
            .count()
    }

    /// Queues `packet` on one connection.
    pub fn send_to(
        &self,
        id: ConnectionId,
        packet: P,
    ) -> Result<(), ConnectionError> {
        let conn = self.get(id).ok_or(ConnectionError::NotFound(id))?;
        if conn.enqueue(packet) {
            Ok(())
        } else {
            Err(ConnectionError::NotActive(id))
        }
    }

    /// Queues `packet` on every connection except `except`, typically the
    /// one the packet came from. Returns how many accepted it.
    pub fn send_to_all_except(&self, except: ConnectionId, packet: P) -> usize
    where
        P: Clone,
    {
        self.snapshot()
            .iter()
            .filter(|conn| conn.id() != except)
            .filter(|conn| conn.enqueue(packet.clone()))
            .count()
    }

    // -- Lifecycle --------------------------------------------------------

    /// Shuts one connection down, waits for it to close, and drops it
    /// from the set.
    pub async fn remove(&self, id: ConnectionId) -> Result<(), ConnectionError> {
        let conn = self.get(id).ok_or(ConnectionError::NotFound(id))?;
        conn.shutdown().await;
        self.take(id);
        tracing::info!(conn_id = %id, "connection removed");
        Ok(())
    }

    /// Delivers every connection's inbound packets to `ctx`, then drops
    /// connections that have closed. Returns the number of packets
    /// delivered.
    ///
    /// A connection's state is read before its queues are drained, so the
    /// final `Disconnect` notice of a closed connection is always
    /// delivered before the connection is reaped.
    pub fn service_all<S: ?Sized>(&self, ctx: &mut S) -> usize
    where
        P: ServerDelivery<S>,
    {
        let mut delivered = 0;
        for conn in self.snapshot() {
            let closed = conn.state() == ConnectionState::Closed;
            delivered += conn.service_server(ctx);
            if closed {
                self.take(conn.id());
                tracing::debug!(conn_id = %conn.id(), "reaped closed connection");
            }
        }
        delivered
    }

    /// Spawns the aggregation loop: every `period`, lock `ctx` and run
    /// [`service_all`](Self::service_all). Missed ticks are skipped.
    ///
    /// The loop runs until the returned handle is aborted.
    pub fn spawn_service_loop<S>(
        &self,
        ctx: Arc<Mutex<S>>,
        period: Duration,
    ) -> JoinHandle<()>
    where
        S: Send + 'static,
        P: ServerDelivery<S>,
    {
        let set = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let mut ctx = ctx.lock().await;
                set.service_all(&mut *ctx);
            }
        })
    }

    /// Shuts every connection down concurrently and waits until all are
    /// closed.
    ///
    /// The closed connections stay in the set until the next
    /// [`service_all`](Self::service_all) has delivered their final
    /// `Disconnect` notices and reaps them.
    pub async fn shutdown_all(&self) {
        let conns = self.snapshot();
        let count = conns.len();
        join_all(conns.iter().map(|conn| conn.shutdown())).await;
        tracing::info!(count, "all connections shut down");
    }
}
