//! Read loops shared by the client and the server.

use std::future::Future;
use std::io;

use sockline_core::frame::{self, DELIMITER};
use sockline_core::{Handler, PeerId};
use tokio::io::{AsyncBufReadExt, BufReader, ReadHalf};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::stream::BoxedStream;

/// Largest UDP payload; one receive never needs more.
pub(crate) const MAX_DATAGRAM: usize = 64 * 1024;

/// Why a read loop ended.
#[derive(Debug)]
pub(crate) enum LoopExit {
    Interrupted,
    Closed,
    Failed(io::Error),
}

impl LoopExit {
    pub(crate) fn log(&self, id: PeerId) {
        match self {
            LoopExit::Interrupted => tracing::debug!(peer = %id, "read loop interrupted"),
            LoopExit::Closed => tracing::debug!(peer = %id, "peer closed the connection"),
            LoopExit::Failed(e) => tracing::warn!(peer = %id, error = %e, "read failed"),
        }
    }
}

/// Await a handler callback, giving up if shutdown is signalled meanwhile. A full
/// downstream queue keeps the loop here, which stops further reads from this peer.
pub(crate) async fn deliver<F>(callback: F, shutdown: &mut watch::Receiver<bool>) -> bool
where
    F: Future<Output = ()>,
{
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = callback => true,
        _ = shutdown.changed() => false,
    }
}

/// Report `connected`, then hand every delimiter-terminated frame to `received`
/// until the stream ends, fails or shutdown is signalled. A partial frame left at
/// end of stream is discarded.
pub(crate) async fn read_stream<H: Handler>(
    id: PeerId,
    reader: ReadHalf<BoxedStream>,
    handler: &H,
    shutdown: &mut watch::Receiver<bool>,
) -> LoopExit {
    if !deliver(handler.connected(id), shutdown).await {
        return LoopExit::Interrupted;
    }
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        if *shutdown.borrow() {
            return LoopExit::Interrupted;
        }
        buf.clear();
        let read = tokio::select! {
            _ = shutdown.changed() => return LoopExit::Interrupted,
            read = reader.read_until(DELIMITER, &mut buf) => read,
        };
        match read {
            Ok(0) => return LoopExit::Closed,
            Ok(_) => {
                let payload = match frame::truncate_delimiter(&buf) {
                    Ok(payload) => payload.to_vec(),
                    Err(_) => {
                        tracing::debug!(peer = %id, len = buf.len(), "dropping partial frame at end of stream");
                        return LoopExit::Closed;
                    }
                };
                tracing::trace!(peer = %id, len = payload.len(), "rx");
                if !deliver(handler.received(id, payload), shutdown).await {
                    return LoopExit::Interrupted;
                }
            }
            Err(e) => return LoopExit::Failed(e),
        }
    }
}

/// Client side of UDP: every datagram from the connected remote is one frame.
pub(crate) async fn read_datagrams<H: Handler>(
    id: PeerId,
    socket: &UdpSocket,
    handler: &H,
    shutdown: &mut watch::Receiver<bool>,
) -> LoopExit {
    if !deliver(handler.connected(id), shutdown).await {
        return LoopExit::Interrupted;
    }
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        if *shutdown.borrow() {
            return LoopExit::Interrupted;
        }
        let n = tokio::select! {
            _ = shutdown.changed() => return LoopExit::Interrupted,
            read = socket.recv(&mut buf) => match read {
                Ok(n) => n,
                Err(e) => return LoopExit::Failed(e),
            },
        };
        if n == 0 {
            continue;
        }
        let payload = frame::datagram_payload(&buf[..n]).to_vec();
        tracing::trace!(peer = %id, len = payload.len(), "rx datagram");
        if !deliver(handler.received(id, payload), shutdown).await {
            return LoopExit::Interrupted;
        }
    }
}
