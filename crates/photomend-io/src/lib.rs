//! photomend-io: image codec and TCP transport for photomend.
//!
//! Wraps the pure restoration pipeline with everything that touches the
//! outside world: decoding and encoding image bytes ([`codec`]), the
//! length-prefixed wire format ([`protocol`]) and an async server and
//! client built on tokio ([`server`], [`client`]).

pub mod client;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod server;

pub use error::{CodecError, TransportError};
pub use protocol::{DEFAULT_FRAME_LIMIT, Response};
pub use server::Server;
