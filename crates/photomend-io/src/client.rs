//! TCP restoration client.

use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::TransportError;
use crate::protocol::{self, Response};

/// Send encoded image `bytes` to the server at `addr` and wait for the
/// restored image.
///
/// # Errors
///
/// Returns a [`TransportError`] if connecting fails, the stream breaks
/// or the reply exceeds `frame_limit`.
pub async fn send<A: ToSocketAddrs>(
    addr: A,
    bytes: &[u8],
    frame_limit: u64,
) -> Result<Response, TransportError> {
    let mut stream = TcpStream::connect(addr).await?;
    log::debug!(
        "client: sending {} bytes to {}",
        bytes.len(),
        stream.peer_addr()?,
    );
    protocol::write_request(&mut stream, bytes).await?;
    let response = protocol::read_response(&mut stream, frame_limit).await?;
    log::debug!("client: received {} bytes", response.image.len());
    Ok(response)
}
