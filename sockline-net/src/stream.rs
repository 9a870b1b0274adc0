//! Stream connections (TCP, TLS, Unix) behind one boxed type, split into a read half
//! owned by the peer's read loop and a shared write half used by `send`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};

/// How long `close` waits for a graceful shutdown (e.g. TLS close_notify) before
/// dropping the write half.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Any bidirectional byte stream a transport can hand out.
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> PeerStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn PeerStream>;

/// Write side of one stream peer. Once closed, further writes fail with `NotConnected`.
/// Closing never waits behind a write stuck on a peer that stopped reading: the
/// pending write is abandoned first.
pub struct StreamConnection {
    remote: String,
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    closed: watch::Sender<bool>,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl StreamConnection {
    /// Split `stream`; the read half goes to the caller's read loop.
    pub fn split(stream: BoxedStream, remote: String) -> (ReadHalf<BoxedStream>, Arc<Self>) {
        let (reader, writer) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);
        let conn = Arc::new(Self {
            remote,
            writer: Mutex::new(Some(writer)),
            closed,
        });
        (reader, conn)
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote
    }

    /// Write one already-framed message and flush it. Fails with `NotConnected` if
    /// the connection is closed before or while the write is pending.
    pub async fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut closed = self.closed.subscribe();
        let mut guard = self.writer.lock().await;
        if *closed.borrow_and_update() {
            return Err(not_connected());
        }
        let writer = guard.as_mut().ok_or_else(not_connected)?;
        let write = async {
            writer.write_all(frame).await?;
            writer.flush().await
        };
        tokio::select! {
            written = write => written,
            _ = closed.changed() => Err(not_connected()),
        }
    }

    /// Shut the write side down. Closing twice is a no-op.
    pub async fn close(&self) -> io::Result<()> {
        self.closed.send_replace(true);
        let writer = self.writer.lock().await.take();
        match writer {
            Some(mut w) => match tokio::time::timeout(SHUTDOWN_GRACE, w.shutdown()).await {
                Ok(shutdown) => shutdown,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "shutdown timed out")),
            },
            None => Ok(()),
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}

/// What the server registry stores per peer.
#[derive(Debug, Clone)]
pub enum PeerHandle {
    Stream(Arc<StreamConnection>),
    /// Last source address seen from a datagram peer.
    Datagram(SocketAddr),
}

impl PeerHandle {
    pub fn remote_addr(&self) -> String {
        match self {
            PeerHandle::Stream(conn) => conn.remote_addr().to_string(),
            PeerHandle::Datagram(addr) => addr.to_string(),
        }
    }

    pub fn datagram_addr(&self) -> Option<SocketAddr> {
        match self {
            PeerHandle::Datagram(addr) => Some(*addr),
            PeerHandle::Stream(_) => None,
        }
    }
}
