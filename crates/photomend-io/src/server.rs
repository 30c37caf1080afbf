//! TCP restoration server.
//!
//! Accepts connections in a loop and serves each on its own task. A
//! connection carries one request: the encoded image is decoded, run
//! through the pipeline on a blocking thread, and the restored image is
//! sent back in the request's format together with a timing summary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::ImageFormat;
use photomend_pipeline::{Pipeline, RestoreConfig, Workers};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};

use crate::codec;
use crate::error::TransportError;
use crate::protocol::{self, Response};

/// Shared per-server state handed to every connection.
#[derive(Clone)]
struct Shared {
    config: RestoreConfig,
    workers: Arc<Workers>,
    frame_limit: u64,
}

/// A bound restoration server.
pub struct Server {
    listener: TcpListener,
    shared: Shared,
}

impl Server {
    /// Bind to `addr` and start the worker pool described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Pipeline`] if `config` is invalid or the
    /// pool cannot start, and [`TransportError::Io`] if binding fails.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        config: RestoreConfig,
        frame_limit: u64,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let workers = Arc::new(Workers::new(config.workers)?);
        let listener = TcpListener::bind(addr).await?;
        log::info!(
            "server: listening on {} with {} workers",
            listener.local_addr()?,
            workers.count(),
        );
        Ok(Self {
            listener,
            shared: Shared {
                config,
                workers,
                frame_limit,
            },
        })
    }

    /// Address the server is listening on.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the socket cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections until accepting fails.
    ///
    /// Failures on a single connection are logged and do not stop the
    /// server.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the listener stops accepting.
    pub async fn run(self) -> Result<(), TransportError> {
        loop {
            let (mut stream, peer) = self.listener.accept().await?;
            log::debug!("server: connection from {peer}");
            let shared = self.shared.clone();
            tokio::spawn(async move {
                match handle(&mut stream, &shared).await {
                    Ok(elapsed) => log::info!("server: restored image for {peer} in {elapsed:?}"),
                    Err(err) => log::warn!("server: connection from {peer} failed: {err}"),
                }
            });
        }
    }
}

/// Serve one request on `stream` with a fresh pool of `config.workers`
/// threads.
///
/// # Errors
///
/// Returns a [`TransportError`] if reading, restoring or replying fails.
pub async fn handle_connection<S>(
    stream: &mut S,
    config: &RestoreConfig,
    frame_limit: u64,
) -> Result<Duration, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    config.validate()?;
    let shared = Shared {
        config: config.clone(),
        workers: Arc::new(Workers::new(config.workers)?),
        frame_limit,
    };
    handle(stream, &shared).await
}

async fn handle<S>(stream: &mut S, shared: &Shared) -> Result<Duration, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = protocol::read_request(stream, shared.frame_limit).await?;
    let config = shared.config.clone();
    let workers = Arc::clone(&shared.workers);
    let start = Instant::now();
    let image = tokio::task::spawn_blocking(move || restore_bytes(&request, config, workers))
        .await??;
    let elapsed = start.elapsed();
    let response = Response {
        metadata: Some(summary(shared.workers.count(), elapsed)),
        image,
    };
    protocol::write_response(stream, &response).await?;
    Ok(elapsed)
}

/// Decode, restore and re-encode one image.
fn restore_bytes(
    bytes: &[u8],
    config: RestoreConfig,
    workers: Arc<Workers>,
) -> Result<Vec<u8>, TransportError> {
    let format = codec::detect_format(bytes)
        .filter(|f| matches!(f, ImageFormat::Png | ImageFormat::Jpeg))
        .unwrap_or(codec::DEFAULT_FORMAT);
    let image = codec::decode(bytes)?;
    let restored = Pipeline::with_workers(image, config, workers)?
        .detect_damage()
        .detect_edges()
        .feather()?
        .inpaint()?
        .correct_colors()
        .smooth()?
        .into_result()
        .restored;
    Ok(codec::encode(&restored, format)?)
}

fn summary(workers: usize, elapsed: Duration) -> String {
    format!("Workers: {workers}, Processing Time: {elapsed:?}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgba;
    use photomend_pipeline::RgbaImage;

    use super::*;
    use crate::protocol::DEFAULT_FRAME_LIMIT;

    fn config() -> RestoreConfig {
        RestoreConfig {
            workers: 2,
            ..RestoreConfig::default()
        }
    }

    fn scratched() -> RgbaImage {
        RgbaImage::from_fn(16, 12, |x, _| {
            if x == 8 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([90, 70, 50, 255])
            }
        })
    }

    #[test]
    fn summary_names_workers_and_time() {
        let text = summary(4, Duration::from_millis(12));
        assert_eq!(text, "Workers: 4, Processing Time: 12ms");
    }

    #[test]
    fn restore_bytes_keeps_png_format() {
        let workers = Arc::new(Workers::new(2).unwrap());
        let bytes = codec::encode(&scratched(), ImageFormat::Png).unwrap();
        let out = restore_bytes(&bytes, config(), workers).unwrap();
        assert_eq!(codec::detect_format(&out), Some(ImageFormat::Png));
        let restored = codec::decode(&out).unwrap();
        assert_eq!(restored.dimensions(), (16, 12));
        assert!(restored.get_pixel(8, 6).0[..3].iter().all(|&c| c < 255));
    }

    #[test]
    fn restore_bytes_rejects_garbage() {
        let workers = Arc::new(Workers::new(1).unwrap());
        let err = restore_bytes(b"not an image", config(), workers).unwrap_err();
        assert!(matches!(err, TransportError::Codec(_)));
    }

    #[tokio::test]
    async fn handle_connection_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1 << 16);
        let bytes = codec::encode(&scratched(), ImageFormat::Png).unwrap();

        let serve = tokio::spawn(async move {
            handle_connection(&mut server, &config(), DEFAULT_FRAME_LIMIT).await
        });
        protocol::write_request(&mut client, &bytes).await.unwrap();
        let response = protocol::read_response(&mut client, DEFAULT_FRAME_LIMIT)
            .await
            .unwrap();
        serve.await.unwrap().unwrap();

        let metadata = response.metadata.unwrap();
        assert!(metadata.starts_with("Workers: 2, Processing Time: "));
        assert_eq!(codec::decode(&response.image).unwrap().dimensions(), (16, 12));
    }

    #[tokio::test]
    async fn oversized_request_is_refused() {
        let (mut client, mut server) = tokio::io::duplex(1 << 10);
        let serve = tokio::spawn(async move { handle_connection(&mut server, &config(), 4).await });
        protocol::write_request(&mut client, &[0; 16]).await.unwrap();
        let err = serve.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { len: 16, limit: 4 }));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_reading() {
        let (_client, mut server) = tokio::io::duplex(64);
        let bad = RestoreConfig {
            workers: 0,
            ..RestoreConfig::default()
        };
        let err = handle_connection(&mut server, &bad, DEFAULT_FRAME_LIMIT)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Pipeline(_)));
    }
}
