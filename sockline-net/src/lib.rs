//! Sockline transports: TCP, UDP, TLS and Unix-domain clients and servers exchanging
//! `0x00`-delimited messages.
//!
//! Reads flow transport → framing → [`Handler`]; writes flow caller → framing → transport.
//! A [`Server`] keeps its peers in a [`Registry`]; a [`Client`] reports its single
//! connection as [`PeerId::CLIENT`]. Nothing here installs a tracing subscriber.

pub mod client;
pub mod config;
pub mod error;
mod reader;
pub mod resolve;
pub mod server;
pub mod sink;
pub mod stream;
pub mod tls;

pub use client::Client;
pub use config::{Config, Role};
pub use error::{Error, Result};
pub use server::Server;
pub use sink::ChannelSink;
pub use sockline_core::{
    address, unix_path, Event, EventKind, FrameError, Handler, Message, PeerId, Protocol, Registry,
};
pub use stream::{BoxedStream, PeerHandle, PeerStream, StreamConnection};
pub use tls::{TlsClientSettings, TlsServerSettings};
