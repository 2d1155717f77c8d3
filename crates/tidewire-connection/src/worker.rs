//! The four per-connection worker tasks and their supervisor.
//!
//! Each worker owns exactly one socket half. Workers only suspend while
//! waiting for peer data, for socket buffer space, or for a wake-up
//! (queue push, state change, ping tick).
//!
//! Once the connection leaves `Active` the writers flush what is queued
//! and the stream reader keeps reading until the peer ends its stream,
//! both bounded by `drain_timeout`. The datagram reader stops when the
//! stream reader does.

use std::sync::Arc;

use bytes::BytesMut;
use tidewire_protocol::{
    encode_end_of_stream, encode_reliable, encode_unreliable, Channel,
    DatagramDecoder, Packet, StreamDecoder, StreamItem,
};
use tidewire_transport::{
    EndpointHalves, ReliableReceiver, ReliableSender, TransportError,
    UnreliableReceiver, UnreliableSender,
};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::connection::{ConnectionState, Shared};

/// Spawns the workers plus a supervisor that marks the connection
/// `Closed` once all of them have returned.
pub(crate) fn spawn<P: Packet>(
    shared: Arc<Shared<P>>,
    halves: EndpointHalves,
) {
    let EndpointHalves {
        reliable_tx,
        reliable_rx,
        unreliable_tx,
        unreliable_rx,
    } = halves;

    let (stream_done, stream_done_rx) = watch::channel(false);

    let stream_reader =
        tokio::spawn(stream_reader(Arc::clone(&shared), reliable_rx));
    let stream_writer =
        tokio::spawn(stream_writer(Arc::clone(&shared), reliable_tx));
    let datagram_reader = tokio::spawn(datagram_reader(
        Arc::clone(&shared),
        unreliable_rx,
        stream_done_rx,
    ));
    let datagram_writer =
        tokio::spawn(datagram_writer(Arc::clone(&shared), unreliable_tx));

    tokio::spawn(async move {
        let sr = stream_reader.await;
        stream_done.send_replace(true);
        let (sw, dr, dw) =
            tokio::join!(stream_writer, datagram_reader, datagram_writer);
        for (worker, result) in [
            ("stream reader", sr),
            ("stream writer", sw),
            ("datagram reader", dr),
            ("datagram writer", dw),
        ] {
            if let Err(e) = result {
                tracing::error!(
                    conn_id = %shared.id,
                    worker,
                    error = %e,
                    "worker panicked"
                );
            }
        }
        // Only still Active here if a worker panicked.
        shared.begin_terminating("connection workers stopped");
        shared.mark_closed();
    });
}

// ---------------------------------------------------------------------------
// Reliable stream
// ---------------------------------------------------------------------------

async fn stream_reader<P: Packet>(
    shared: Arc<Shared<P>>,
    mut rx: ReliableReceiver,
) {
    let mut state = shared.subscribe();
    let mut decoder =
        StreamDecoder::with_capacity(shared.config.read_buffer_capacity);
    // Set once the connection leaves `Active`; from then on the peer has
    // until this instant to finish its stream.
    let mut deadline: Option<Instant> = None;

    'read: loop {
        // Parse everything already buffered before reading again.
        loop {
            match decoder.next_frame(&shared.catalog) {
                Ok(Some(StreamItem::Frame(id, packet))) => {
                    tracing::trace!(
                        conn_id = %shared.id,
                        %id,
                        message = packet.name(),
                        "frame received"
                    );
                    shared.accept_inbound(packet, Channel::Reliable);
                }
                Ok(Some(StreamItem::End)) => {
                    shared.begin_terminating("peer closed the stream");
                    break 'read;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        conn_id = %shared.id,
                        error = %e,
                        "dropping reliable frame"
                    );
                }
            }
        }

        if deadline.is_none() && !shared.is_active() {
            deadline = Some(Instant::now() + shared.config.drain_timeout);
        }
        let received = match deadline {
            None => tokio::select! {
                res = rx.receive(decoder.buffer_mut()) => res,
                _ = state.changed() => continue,
            },
            Some(deadline) => {
                let receive = rx.receive(decoder.buffer_mut());
                match time::timeout_at(deadline, receive).await {
                    Ok(res) => res,
                    Err(_) => {
                        tracing::debug!(
                            conn_id = %shared.id,
                            "peer did not end its stream in time"
                        );
                        break;
                    }
                }
            }
        };
        match received {
            Ok(0) => {
                shared.begin_terminating("peer closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(
                    conn_id = %shared.id,
                    error = %e,
                    "stream receive failed"
                );
                shared.begin_terminating(&e.to_string());
                break;
            }
        }
    }
    tracing::debug!(conn_id = %shared.id, "stream reader stopped");
}

async fn stream_writer<P: Packet>(
    shared: Arc<Shared<P>>,
    mut tx: ReliableSender,
) {
    let mut state = shared.subscribe();
    let mut ping = time::interval(shared.config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while shared.is_active() {
        let batch = send_reliable_batch(&shared, &mut tx);
        match send_or_abandon(&shared, &mut state, batch).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                tracing::debug!(
                    conn_id = %shared.id,
                    error = %e,
                    "stream send failed"
                );
                shared.begin_terminating(&e.to_string());
                discard_reliable(&shared);
                return;
            }
            None => {
                tracing::debug!(
                    conn_id = %shared.id,
                    "stream send stalled past drain timeout"
                );
                discard_reliable(&shared);
                return;
            }
        }
        if !shared.is_active() {
            break;
        }

        tokio::select! {
            _ = shared.outbound_reliable.notified() => {}
            _ = state.changed() => {}
            _ = ping.tick() => shared.send_ping(),
        }
    }

    // Terminating: flush what is left, then mark the end of the stream.
    let drain = async {
        send_reliable_batch(&shared, &mut tx).await?;
        tx.send(&encode_end_of_stream()).await?;
        tx.close().await
    };
    match time::timeout(shared.config.drain_timeout, drain).await {
        Ok(Ok(())) => {
            tracing::debug!(conn_id = %shared.id, "stream writer drained");
        }
        Ok(Err(e)) => {
            tracing::debug!(
                conn_id = %shared.id,
                error = %e,
                "stream writer failed while draining"
            );
        }
        Err(_) => {
            tracing::debug!(conn_id = %shared.id, "stream drain timed out");
        }
    }
    discard_reliable(&shared);
}

/// Empties the reliable queue once nothing more will be written. Only
/// called after the connection has left `Active`, so nothing refills it.
fn discard_reliable<P: Packet>(shared: &Shared<P>) {
    let dropped = shared.outbound_reliable.take_all().len();
    if dropped > 0 {
        tracing::debug!(
            conn_id = %shared.id,
            dropped,
            "reliable messages never sent"
        );
    }
}

/// Encodes everything queued on the reliable channel and writes it as
/// one batch.
async fn send_reliable_batch<P: Packet>(
    shared: &Shared<P>,
    tx: &mut ReliableSender,
) -> Result<(), TransportError> {
    let batch = shared.outbound_reliable.take_all();
    if batch.is_empty() {
        return Ok(());
    }

    let mut buf = BytesMut::new();
    for packet in batch {
        match encode_reliable(&shared.catalog, &packet) {
            Ok(frame) => {
                tracing::trace!(
                    conn_id = %shared.id,
                    message = packet.name(),
                    "frame sent"
                );
                buf.extend_from_slice(&frame);
            }
            Err(e) => {
                tracing::warn!(
                    conn_id = %shared.id,
                    error = %e,
                    "dropping outbound message"
                );
            }
        }
    }
    if buf.is_empty() {
        return Ok(());
    }
    tx.send(&buf).await?;
    tx.flush().await
}

/// Runs `send` to completion while the connection is active. If the
/// connection leaves `Active` mid-send, the send gets `drain_timeout` to
/// finish; `None` means it did not and the bytes in flight are lost.
async fn send_or_abandon<P, F>(
    shared: &Shared<P>,
    state: &mut watch::Receiver<ConnectionState>,
    send: F,
) -> Option<Result<(), TransportError>>
where
    F: Future<Output = Result<(), TransportError>>,
{
    tokio::pin!(send);
    tokio::select! {
        res = &mut send => return Some(res),
        _ = state.wait_for(|s| !s.is_active()) => {}
    }
    time::timeout(shared.config.drain_timeout, &mut send).await.ok()
}

// ---------------------------------------------------------------------------
// Datagrams
// ---------------------------------------------------------------------------

async fn datagram_reader<P: Packet>(
    shared: Arc<Shared<P>>,
    mut rx: UnreliableReceiver,
    mut stream_done: watch::Receiver<bool>,
) {
    let mut decoder = DatagramDecoder::new();

    loop {
        let received = tokio::select! {
            res = rx.receive() => res,
            _ = stream_done.changed() => break,
        };
        match received {
            Ok(datagram) => match decoder.push(&shared.catalog, &datagram) {
                Ok(Some(packet)) => {
                    tracing::trace!(
                        conn_id = %shared.id,
                        message = packet.name(),
                        "datagram received"
                    );
                    shared.accept_inbound(packet, Channel::Unreliable);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        conn_id = %shared.id,
                        error = %e,
                        "dropping datagram"
                    );
                }
            },
            // ICMP errors from a peer that is not listening land here;
            // the stream decides when the connection is dead.
            Err(e) => {
                tracing::debug!(
                    conn_id = %shared.id,
                    error = %e,
                    "datagram receive failed"
                );
            }
        }
    }
    tracing::debug!(conn_id = %shared.id, "datagram reader stopped");
}

async fn datagram_writer<P: Packet>(
    shared: Arc<Shared<P>>,
    mut tx: UnreliableSender,
) {
    let mut state = shared.subscribe();

    while shared.is_active() {
        send_unreliable_batch(&shared, &mut tx).await;
        tokio::select! {
            _ = shared.outbound_unreliable.notified() => {}
            _ = state.changed() => {}
        }
    }

    let drain = send_unreliable_batch(&shared, &mut tx);
    if time::timeout(shared.config.drain_timeout, drain).await.is_err() {
        let dropped = shared.outbound_unreliable.take_all().len();
        tracing::debug!(
            conn_id = %shared.id,
            dropped,
            "datagram drain timed out"
        );
    }
    tracing::debug!(conn_id = %shared.id, "datagram writer stopped");
}

/// Sends everything queued on the unreliable channel. A failed send
/// loses that one message.
async fn send_unreliable_batch<P: Packet>(
    shared: &Shared<P>,
    tx: &mut UnreliableSender,
) {
    while let Some(packet) = shared.outbound_unreliable.pop() {
        let (id, payload) =
            match encode_unreliable(&shared.catalog, &packet) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(
                        conn_id = %shared.id,
                        error = %e,
                        "dropping outbound message"
                    );
                    continue;
                }
            };
        let sent = async {
            tx.send(&id).await?;
            tx.send(&payload).await
        };
        if let Err(e) = sent.await {
            tracing::debug!(
                conn_id = %shared.id,
                error = %e,
                "datagram send failed"
            );
        }
    }
}
