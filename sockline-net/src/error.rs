//! Error type shared by clients, servers, TLS setup and configuration.

use sockline_core::{FrameError, ParseProtocolError, PeerId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Dial, listen, accept, read or write failure from the socket layer.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot resolve {0}")]
    Resolve(String),

    /// Bad certificate, key or CA material.
    #[error("tls error: {0}")]
    Tls(String),

    #[error("tls selected but no tls settings configured")]
    TlsNotConfigured,

    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("no connection with given id {0}")]
    UnknownPeer(PeerId),

    #[error("listener already up")]
    AlreadyListening,

    #[error("listener not up")]
    NotListening,

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

impl From<ParseProtocolError> for Error {
    fn from(e: ParseProtocolError) -> Self {
        Error::UnknownProtocol(e.0)
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e.to_string())
    }
}
