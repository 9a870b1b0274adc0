//! Sockline primitives shared by every transport.
//! No I/O here: the networking crate owns sockets and tasks and builds on these types.

pub mod address;
pub mod event;
pub mod frame;
pub mod peer;
pub mod protocol;
pub mod registry;

pub use address::{address, unix_path};
pub use event::{Event, EventKind, Handler, Message};
pub use frame::{append_delimiter, datagram_payload, encode_frame, truncate_delimiter, FrameError, DELIMITER};
pub use peer::{PeerId, PeerIdSequence};
pub use protocol::{ParseProtocolError, Protocol};
pub use registry::Registry;
