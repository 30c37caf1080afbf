//! Error types for decoding, encoding and transport.

use std::string::FromUtf8Error;

use photomend_pipeline::PipelineError;

/// Errors that can occur while decoding or encoding images.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The input byte slice is empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The image data could not be decoded.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[source] image::ImageError),

    /// The image could not be encoded.
    #[error("failed to encode image: {0}")]
    ImageEncode(#[source] image::ImageError),
}

/// Errors that can occur while exchanging images over a byte stream.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The underlying stream failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame announced more bytes than the receiver accepts.
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    FrameTooLarge {
        /// Announced frame length.
        len: u64,
        /// Configured limit.
        limit: u64,
    },

    /// Response metadata was not valid UTF-8.
    #[error("response metadata is not valid UTF-8: {0}")]
    InvalidMetadata(#[from] FromUtf8Error),

    /// Decoding or encoding the image failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The restoration pipeline failed.
    #[error("restoration failed: {0}")]
    Pipeline(#[from] PipelineError),

    /// The blocking restoration task panicked or was cancelled.
    #[error("restoration task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
