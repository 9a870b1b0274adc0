//! Client role: one connection to one remote, reported to the handler as [`PeerId::CLIENT`].

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sockline_core::{address, frame, unix_path, Handler, PeerId, Protocol};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::reader;
use crate::resolve::{resolve, resolve_first};
use crate::stream::{BoxedStream, StreamConnection};
use crate::tls::{self, TlsClientSettings};

#[derive(Clone)]
enum Writer {
    Stream(Arc<StreamConnection>),
    Datagram(Arc<UdpSocket>),
}

impl Writer {
    async fn write(&self, frame: &[u8]) -> io::Result<()> {
        match self {
            Writer::Stream(conn) => conn.write_frame(frame).await,
            Writer::Datagram(socket) => socket.send(frame).await.map(|_| ()),
        }
    }

    async fn close(&self) {
        if let Writer::Stream(conn) = self {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "close failed");
            }
        }
    }
}

/// A live connection: its writer, the read loop's interrupt and the loop itself.
struct Link {
    writer: Writer,
    shutdown: watch::Sender<bool>,
    reader: JoinHandle<()>,
}

enum Transport {
    Stream(BoxedStream, String),
    Datagram(UdpSocket),
}

pub struct Client<H: Handler> {
    host: String,
    port: u16,
    protocol: Protocol,
    tls: Option<TlsClientSettings>,
    handler: Arc<H>,
    connected: Arc<AtomicBool>,
    link: Mutex<Option<Link>>,
    span: tracing::Span,
}

impl<H: Handler> Client<H> {
    pub fn new(host: impl Into<String>, port: u16, handler: H, protocol: Protocol) -> Self {
        let host = host.into();
        let span = tracing::info_span!("client", protocol = %protocol, addr = %address(&host, port));
        Self {
            host,
            port,
            protocol,
            tls: None,
            handler: Arc::new(handler),
            connected: Arc::new(AtomicBool::new(false)),
            link: Mutex::new(None),
            span,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16, handler: H) -> Self {
        Self::new(host, port, handler, Protocol::Tcp)
    }

    pub fn udp(host: impl Into<String>, port: u16, handler: H) -> Self {
        Self::new(host, port, handler, Protocol::Udp)
    }

    /// Unix-domain client dialing `path`.
    pub fn unix(path: impl AsRef<Path>, handler: H) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        Self::new(path, 0, handler, Protocol::Unix)
    }

    /// TLS client trusting the roots in `ca_pem`.
    pub fn tls(
        host: impl Into<String>,
        port: u16,
        handler: H,
        ca_pem: &[u8],
        verify_server: bool,
    ) -> Result<Self> {
        let settings = TlsClientSettings::from_pem(ca_pem, verify_server)?;
        Ok(Self::new(host, port, handler, Protocol::Tls).with_tls(settings))
    }

    pub fn with_tls(mut self, settings: TlsClientSettings) -> Self {
        self.tls = Some(settings);
        self
    }

    /// Replace the span every event of this client is recorded in.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Dial the remote and start the read loop.
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        if let Some(current) = link.as_ref() {
            if !current.reader.is_finished() {
                return Err(Error::AlreadyConnected);
            }
        }
        if let Some(stale) = link.take() {
            if let Err(e) = stale.reader.await {
                self.span.in_scope(|| tracing::error!(error = %e, "read loop panicked"));
            }
        }

        let transport = self.dial().instrument(self.span.clone()).await?;
        let (shutdown, mut stop) = watch::channel(false);
        let handler = self.handler.clone();
        let connected = self.connected.clone();
        self.connected.store(true, Ordering::Release);

        let (writer, reader) = match transport {
            Transport::Stream(stream, remote) => {
                let (read_half, conn) = StreamConnection::split(stream, remote);
                let loop_conn = conn.clone();
                let task = tokio::spawn(
                    async move {
                        let exit = reader::read_stream(PeerId::CLIENT, read_half, handler.as_ref(), &mut stop).await;
                        exit.log(PeerId::CLIENT);
                        connected.store(false, Ordering::Release);
                        if let Err(e) = loop_conn.close().await {
                            tracing::debug!(error = %e, "close failed");
                        }
                        handler.disconnected(PeerId::CLIENT).await;
                    }
                    .instrument(self.span.clone()),
                );
                (Writer::Stream(conn), task)
            }
            Transport::Datagram(socket) => {
                let socket = Arc::new(socket);
                let loop_socket = socket.clone();
                let task = tokio::spawn(
                    async move {
                        let exit =
                            reader::read_datagrams(PeerId::CLIENT, &loop_socket, handler.as_ref(), &mut stop).await;
                        exit.log(PeerId::CLIENT);
                        connected.store(false, Ordering::Release);
                        handler.disconnected(PeerId::CLIENT).await;
                    }
                    .instrument(self.span.clone()),
                );
                (Writer::Datagram(socket), task)
            }
        };
        self.span.in_scope(|| tracing::info!("connected"));
        *link = Some(Link {
            writer,
            shutdown,
            reader,
        });
        Ok(())
    }

    /// Frame `payload` and write it to the remote.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        let writer = {
            let link = self.link.lock().await;
            match link.as_ref() {
                Some(l) if self.is_connected() => l.writer.clone(),
                _ => return Err(Error::NotConnected),
            }
        };
        let framed = frame::encode_frame(payload)?;
        writer.write(&framed).await?;
        self.span.in_scope(|| tracing::trace!(len = payload.len(), "tx"));
        Ok(())
    }

    /// Interrupt the read loop, close the connection and wait for the loop to finish.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(link) = self.link.lock().await.take() else {
            return Err(Error::NotConnected);
        };
        link.shutdown.send_replace(true);
        link.writer.close().await;
        if let Err(e) = link.reader.await {
            self.span.in_scope(|| tracing::error!(error = %e, "read loop panicked"));
        }
        self.connected.store(false, Ordering::Release);
        self.span.in_scope(|| tracing::info!("disconnected"));
        Ok(())
    }

    async fn dial(&self) -> Result<Transport> {
        match self.protocol {
            Protocol::Tcp => {
                let (stream, remote) = self.dial_tcp().await?;
                Ok(Transport::Stream(Box::new(stream), remote))
            }
            Protocol::Tls => {
                let settings = self.tls.as_ref().ok_or(Error::TlsNotConfigured)?;
                let name = tls::server_name(&self.host)?;
                let (stream, remote) = self.dial_tcp().await?;
                let stream = settings.connector().connect(name, stream).await?;
                tracing::debug!(remote = %remote, "tls handshake complete");
                Ok(Transport::Stream(Box::new(stream), remote))
            }
            Protocol::Udp => {
                let target = resolve_first(&self.host, self.port).await?;
                let local: SocketAddr = if target.is_ipv4() {
                    ([0, 0, 0, 0], 0).into()
                } else {
                    ([0u16; 8], 0).into()
                };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(target).await?;
                tracing::debug!(remote = %target, "udp socket connected");
                Ok(Transport::Datagram(socket))
            }
            Protocol::Unix => {
                let path = unix_path(&self.host, self.port);
                dial_unix(&path).await
            }
        }
    }

    async fn dial_tcp(&self) -> Result<(TcpStream, String)> {
        let mut last = None;
        for addr in resolve(&self.host, self.port).await? {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok((stream, addr.to_string())),
                Err(e) => {
                    tracing::debug!(remote = %addr, error = %e, "dial failed");
                    last = Some(e);
                }
            }
        }
        Err(last.map(Error::Io).unwrap_or_else(|| Error::Resolve(address(&self.host, self.port))))
    }
}

#[cfg(unix)]
async fn dial_unix(path: &Path) -> Result<Transport> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    Ok(Transport::Stream(Box::new(stream), path.display().to_string()))
}

#[cfg(not(unix))]
async fn dial_unix(_path: &Path) -> Result<Transport> {
    Err(Error::Io(io::Error::new(
        io::ErrorKind::Unsupported,
        "unix sockets are not supported on this platform",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;

    #[tokio::test]
    async fn send_and_disconnect_need_a_connection() {
        let client = Client::tcp("127.0.0.1", 1, ChannelSink::default());
        assert!(!client.is_connected());
        assert!(matches!(client.send(b"x").await, Err(Error::NotConnected)));
        assert!(matches!(client.disconnect().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn tls_without_settings_fails() {
        let client = Client::new("127.0.0.1", 1, ChannelSink::default(), Protocol::Tls);
        assert!(matches!(client.connect().await, Err(Error::TlsNotConfigured)));
    }

    #[tokio::test]
    async fn refused_dial_is_returned() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let client = Client::tcp("127.0.0.1", port, ChannelSink::default());
        assert!(matches!(client.connect().await, Err(Error::Io(_))));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn payload_with_delimiter_is_rejected() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let client = Client::udp("127.0.0.1", port, ChannelSink::default());
        client.connect().await.unwrap();
        assert!(matches!(client.connect().await, Err(Error::AlreadyConnected)));
        assert!(matches!(client.send(b"a\0b").await, Err(Error::Frame(_))));
        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
    }
}
