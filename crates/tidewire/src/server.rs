//! `Server` builder and accept loop.
//!
//! This is the entry point for running a Tidewire game server. It ties
//! the layers together: every accepted endpoint becomes a server-side
//! [`Connection`], joins the [`ConnectionSet`], and is greeted with its
//! player number. One aggregation loop services all of them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tidewire_connection::{
    Connection, ConnectionConfig, ConnectionSet, Role,
};
use tidewire_protocol::{
    Catalog, ConnectionEstablished, CoreMessage, Packet, ServerDelivery,
};
use tidewire_transport::TransportListener;
use tokio::sync::{watch, Mutex};

use crate::TidewireError;

/// Address the builder binds to unless told otherwise.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7878";

/// How often the service loop drains inbound queues (about 60 Hz).
pub const DEFAULT_SERVICE_INTERVAL: Duration = Duration::from_millis(16);

/// Builder for configuring and starting a Tidewire server.
///
/// # Example
///
/// ```rust,ignore
/// use tidewire::prelude::*;
///
/// let server = ServerBuilder::new()
///     .bind("0.0.0.0:7878")
///     .build(catalog)
///     .await?;
/// server.run(Arc::new(Mutex::new(world))).await
/// ```
pub struct ServerBuilder {
    bind_addr: String,
    connection_config: ConnectionConfig,
    service_interval: Duration,
}

impl ServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            connection_config: ConnectionConfig::default(),
            service_interval: DEFAULT_SERVICE_INTERVAL,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the configuration every accepted connection gets.
    pub fn connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection_config = config;
        self
    }

    /// Sets how often the service loop delivers inbound packets.
    pub fn service_interval(mut self, interval: Duration) -> Self {
        self.service_interval = interval;
        self
    }

    /// Binds the listener. Connections are only accepted once
    /// [`Server::run`] is called.
    pub async fn build<P: Packet>(
        self,
        catalog: Arc<Catalog<P>>,
    ) -> Result<Server<P>, TidewireError> {
        let listener = TransportListener::bind(&self.bind_addr).await?;
        let (shutdown, _) = watch::channel(false);

        Ok(Server {
            listener,
            catalog,
            connections: ConnectionSet::new(),
            connection_config: self.connection_config,
            service_interval: self.service_interval,
            shutdown,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Tidewire game server.
///
/// Call [`run()`](Self::run) to start accepting connections and
/// [`shutdown()`](Self::shutdown) from anywhere to stop it.
pub struct Server<P: Packet> {
    listener: TransportListener,
    catalog: Arc<Catalog<P>>,
    connections: ConnectionSet<P>,
    connection_config: ConnectionConfig,
    service_interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl<P: Packet> Server<P> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the live connections, for sending and broadcasting.
    pub fn connections(&self) -> ConnectionSet<P> {
        self.connections.clone()
    }

    pub fn catalog(&self) -> &Arc<Catalog<P>> {
        &self.catalog
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown) is called.
    ///
    /// Each accepted peer is sent `ConnectionEstablished` with its player
    /// number, counting from 1. Inbound packets of every connection are
    /// delivered to `ctx` by a service loop running every
    /// `service_interval`. On shutdown every connection is closed
    /// gracefully before this returns.
    pub async fn run<S>(&self, ctx: Arc<Mutex<S>>) -> Result<(), TidewireError>
    where
        S: Send + 'static,
        P: ServerDelivery<S>,
    {
        let service = self
            .connections
            .spawn_service_loop(Arc::clone(&ctx), self.service_interval);
        let mut shutdown = self.shutdown.subscribe();
        let mut next_player_number = 1;

        tracing::info!(
            addr = ?self.local_addr().ok(),
            "tidewire server running"
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(endpoint) => {
                        let conn = Connection::open(
                            endpoint,
                            Role::ServerSide,
                            Arc::clone(&self.catalog),
                            self.connection_config.clone(),
                        );
                        conn.enqueue(P::from_core(
                            CoreMessage::ConnectionEstablished(
                                ConnectionEstablished {
                                    player_number: next_player_number,
                                },
                            ),
                        ));
                        tracing::info!(
                            conn_id = %conn.id(),
                            player_number = next_player_number,
                            "player connected"
                        );
                        next_player_number += 1;
                        self.connections.insert(conn);
                    }
                    // One bad peer (e.g. a failed handshake) must not
                    // stop the server.
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                },
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        service.abort();
        self.connections.shutdown_all().await;
        // Hand the final Disconnect notices to the game and reap.
        self.connections.service_all(&mut *ctx.lock().await);
        tracing::info!("tidewire server stopped");
        Ok(())
    }

    /// Stops the accept loop; [`run`](Self::run) then closes every
    /// connection and returns.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
