//! Server role: accept many peers (or serve many datagram sources), keep them in a
//! registry keyed by [`PeerId`], unicast or broadcast frames to them.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sockline_core::{address, frame, unix_path, Handler, PeerId, PeerIdSequence, Protocol, Registry};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::reader::{self, MAX_DATAGRAM};
use crate::resolve::resolve_first;
use crate::stream::{BoxedStream, PeerHandle, StreamConnection};
use crate::tls::TlsServerSettings;

/// State shared with the dispatch task and every peer task.
struct Shared<H> {
    handler: H,
    peers: Registry<PeerHandle>,
    ids: PeerIdSequence,
}

/// Present while a listener is up.
struct Listening {
    shutdown: watch::Sender<bool>,
    dispatch: JoinHandle<()>,
    udp: Option<Arc<UdpSocket>>,
    local_addr: Option<SocketAddr>,
    socket_path: Option<PathBuf>,
}

pub struct Server<H: Handler> {
    host: String,
    port: u16,
    protocol: Protocol,
    tls: Option<TlsServerSettings>,
    shared: Arc<Shared<H>>,
    state: Mutex<Option<Listening>>,
    span: tracing::Span,
}

impl<H: Handler> Server<H> {
    pub fn new(host: impl Into<String>, port: u16, handler: H, protocol: Protocol) -> Self {
        let host = host.into();
        let span = tracing::info_span!("server", protocol = %protocol, addr = %address(&host, port));
        Self {
            host,
            port,
            protocol,
            tls: None,
            shared: Arc::new(Shared {
                handler,
                peers: Registry::new(),
                ids: PeerIdSequence::new(),
            }),
            state: Mutex::new(None),
            span,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16, handler: H) -> Self {
        Self::new(host, port, handler, Protocol::Tcp)
    }

    pub fn udp(host: impl Into<String>, port: u16, handler: H) -> Self {
        Self::new(host, port, handler, Protocol::Udp)
    }

    /// Unix-domain server listening on `path`. The socket file is removed on stop.
    pub fn unix(path: impl AsRef<Path>, handler: H) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        Self::new(path, 0, handler, Protocol::Unix)
    }

    /// TLS server presenting the chain in `cert_pem`, signed with `key_pem`.
    pub fn tls(host: impl Into<String>, port: u16, handler: H, cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let settings = TlsServerSettings::from_pem(cert_pem, key_pem)?;
        Ok(Self::new(host, port, handler, Protocol::Tls).with_tls(settings))
    }

    pub fn with_tls(mut self, settings: TlsServerSettings) -> Self {
        self.tls = Some(settings);
        self
    }

    /// Replace the span every event of this server is recorded in.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    pub async fn is_listening(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Bound address of a TCP, TLS or UDP listener.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().and_then(|l| l.local_addr)
    }

    /// Bind the listener and spawn its dispatch task. Returns once bound.
    pub async fn listen_and_serve(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(Error::AlreadyListening);
        }
        let (shutdown, stop) = watch::channel(false);
        let shared = self.shared.clone();
        let listening = match self.protocol {
            Protocol::Tcp | Protocol::Tls => {
                let acceptor = match self.protocol {
                    Protocol::Tls => Some(self.tls.as_ref().ok_or(Error::TlsNotConfigured)?.acceptor()),
                    _ => None,
                };
                let addr = resolve_first(&self.host, self.port).await?;
                let listener = TcpListener::bind(addr).await?;
                let local_addr = listener.local_addr()?;
                let dispatch = tokio::spawn(
                    accept_loop(StreamListener::Tcp(listener), acceptor, shared, stop).instrument(self.span.clone()),
                );
                Listening {
                    shutdown,
                    dispatch,
                    udp: None,
                    local_addr: Some(local_addr),
                    socket_path: None,
                }
            }
            Protocol::Udp => {
                let addr = resolve_first(&self.host, self.port).await?;
                let socket = Arc::new(UdpSocket::bind(addr).await?);
                let local_addr = socket.local_addr()?;
                let dispatch =
                    tokio::spawn(datagram_loop(socket.clone(), shared, stop).instrument(self.span.clone()));
                Listening {
                    shutdown,
                    dispatch,
                    udp: Some(socket),
                    local_addr: Some(local_addr),
                    socket_path: None,
                }
            }
            Protocol::Unix => {
                let path = unix_path(&self.host, self.port);
                let listener = bind_unix(&path)?;
                let dispatch =
                    tokio::spawn(accept_loop(listener, None, shared, stop).instrument(self.span.clone()));
                Listening {
                    shutdown,
                    dispatch,
                    udp: None,
                    local_addr: None,
                    socket_path: Some(path),
                }
            }
        };
        self.span.in_scope(|| tracing::info!(local = ?listening.local_addr, "listening"));
        *state = Some(listening);
        Ok(())
    }

    /// Frame `payload` and send it to peer `id`.
    pub async fn send(&self, id: PeerId, payload: &[u8]) -> Result<()> {
        let framed = frame::encode_frame(payload)?;
        self.send_frame(id, &framed).await
    }

    /// Send `payload` to every registered peer in registry order, stopping at the
    /// first failure. Peers that disconnect while the broadcast runs are skipped.
    pub async fn broadcast(&self, payload: &[u8]) -> Result<()> {
        let framed = frame::encode_frame(payload)?;
        for id in self.shared.peers.ids() {
            match self.send_frame(id, &framed).await {
                Ok(()) => {}
                Err(Error::UnknownPeer(_)) => {
                    self.span.in_scope(|| tracing::debug!(peer = %id, "peer left during broadcast"));
                }
                Err(e) => {
                    self.span
                        .in_scope(|| tracing::warn!(peer = %id, error = %e, "broadcast stopped"));
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Remote address of peer `id`.
    pub fn client_ip(&self, id: PeerId) -> Result<String> {
        let (_, handle) = self.shared.peers.get(id).ok_or(Error::UnknownPeer(id))?;
        Ok(handle.remote_addr())
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.shared.peers.ids()
    }

    /// Interrupt every loop, close all peers and wait for the dispatch task. The
    /// server can listen again afterwards. No-op when not listening.
    pub async fn stop(&self) -> Result<()> {
        let Some(listening) = self.state.lock().await.take() else {
            return Ok(());
        };
        listening.shutdown.send_replace(true);
        for (id, handle) in self.shared.peers.handles() {
            if let PeerHandle::Stream(conn) = handle {
                if let Err(e) = conn.close().await {
                    self.span.in_scope(|| tracing::debug!(peer = %id, error = %e, "close failed"));
                }
            }
        }
        self.shared.peers.reset();
        if let Err(e) = listening.dispatch.await {
            self.span.in_scope(|| tracing::error!(error = %e, "dispatch task panicked"));
        }
        drop(listening.udp);
        if let Some(path) = listening.socket_path {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.span.in_scope(|| tracing::info!("stopped"));
        Ok(())
    }

    async fn send_frame(&self, id: PeerId, framed: &[u8]) -> Result<()> {
        let (_, handle) = self.shared.peers.get(id).ok_or(Error::UnknownPeer(id))?;
        match handle {
            PeerHandle::Stream(conn) => {
                conn.write_frame(framed).await?;
            }
            PeerHandle::Datagram(to) => {
                let socket = self.udp_socket().await.ok_or(Error::NotListening)?;
                if let Err(e) = socket.send_to(framed, to).await {
                    self.span
                        .in_scope(|| tracing::warn!(peer = %id, remote = %to, error = %e, "send failed, dropping peer"));
                    if self.shared.peers.delete(id).is_some() {
                        self.shared.handler.disconnected(id).await;
                    }
                    return Err(e.into());
                }
            }
        }
        self.span.in_scope(|| tracing::trace!(peer = %id, len = framed.len(), "tx"));
        Ok(())
    }

    async fn udp_socket(&self) -> Option<Arc<UdpSocket>> {
        self.state.lock().await.as_ref().and_then(|l| l.udp.clone())
    }
}

enum StreamListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

impl StreamListener {
    async fn accept(&self) -> io::Result<(BoxedStream, String)> {
        match self {
            StreamListener::Tcp(listener) => {
                let (stream, remote) = listener.accept().await?;
                Ok((Box::new(stream), remote.to_string()))
            }
            #[cfg(unix)]
            StreamListener::Unix(listener) => {
                let (stream, remote) = listener.accept().await?;
                let remote = remote
                    .as_pathname()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "@".to_string());
                Ok((Box::new(stream), remote))
            }
        }
    }
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<StreamListener> {
    Ok(StreamListener::Unix(tokio::net::UnixListener::bind(path)?))
}

#[cfg(not(unix))]
fn bind_unix(_path: &Path) -> Result<StreamListener> {
    Err(Error::Io(io::Error::new(
        io::ErrorKind::Unsupported,
        "unix sockets are not supported on this platform",
    )))
}

/// Accept until interrupted, one task per peer. Waits for every peer task before returning.
async fn accept_loop<H: Handler>(
    listener: StreamListener,
    acceptor: Option<TlsAcceptor>,
    shared: Arc<Shared<H>>,
    mut stop: watch::Receiver<bool>,
) {
    let mut tasks = JoinSet::new();
    loop {
        if *stop.borrow() {
            break;
        }
        let accepted = tokio::select! {
            _ = stop.changed() => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "peer task panicked");
                }
                continue;
            }
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, remote)) => {
                tracing::debug!(remote = %remote, "accepted");
                tasks.spawn(
                    serve_peer(stream, remote, acceptor.clone(), shared.clone(), stop.clone()).in_current_span(),
                );
            }
            Err(e) => tracing::warn!(error = %e, "accept failed"),
        }
    }
    drop(listener);
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "peer task panicked");
        }
    }
    tracing::debug!("accept loop finished");
}

/// One stream peer from handshake to disconnect.
async fn serve_peer<H: Handler>(
    mut stream: BoxedStream,
    remote: String,
    acceptor: Option<TlsAcceptor>,
    shared: Arc<Shared<H>>,
    mut stop: watch::Receiver<bool>,
) {
    if let Some(acceptor) = acceptor {
        let handshake = tokio::select! {
            _ = stop.changed() => return,
            handshake = acceptor.accept(stream) => handshake,
        };
        stream = match handshake {
            Ok(tls) => Box::new(tls) as BoxedStream,
            Err(e) => {
                tracing::warn!(remote = %remote, error = %e, "tls handshake failed");
                return;
            }
        };
    }
    if *stop.borrow() {
        return;
    }

    let id = shared.ids.next_id();
    let span = tracing::debug_span!("peer", id = %id, remote = %remote);
    async move {
        let (read_half, conn) = StreamConnection::split(stream, remote);
        shared.peers.add_or_update(id, PeerHandle::Stream(conn.clone()));
        let exit = reader::read_stream(id, read_half, &shared.handler, &mut stop).await;
        exit.log(id);
        shared.peers.delete(id);
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "close failed");
        }
        shared.handler.disconnected(id).await;
    }
    .instrument(span)
    .await
}

/// Shared UDP receive loop. Each source address keeps one id while it is registered.
async fn datagram_loop<H: Handler>(socket: Arc<UdpSocket>, shared: Arc<Shared<H>>, mut stop: watch::Receiver<bool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        if *stop.borrow() {
            break;
        }
        let received = tokio::select! {
            _ = stop.changed() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        let (n, from) = match received {
            Ok(r) => r,
            // ICMP port unreachable from an earlier send_to surfaces here on some platforms.
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                tracing::warn!(error = %e, "receive reset");
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "receive failed, datagram loop ends");
                break;
            }
        };
        if n == 0 {
            continue;
        }
        let id = shared
            .peers
            .find_id(|h| h.datagram_addr() == Some(from))
            .unwrap_or_else(|| shared.ids.next_id());
        shared.peers.add_or_update(id, PeerHandle::Datagram(from));
        let payload = frame::datagram_payload(&buf[..n]).to_vec();
        tracing::trace!(peer = %id, remote = %from, len = payload.len(), "rx datagram");
        if !reader::deliver(shared.handler.connected(id), &mut stop).await {
            break;
        }
        if !reader::deliver(shared.handler.received(id, payload), &mut stop).await {
            break;
        }
    }
    tracing::debug!("datagram loop finished");
}
