//! Generic frame-source trait for camera drivers and video streams.

use async_trait::async_trait;
use crawler_types::{ColorFrame, CrawlerError};

/// A camera, stream decoder, or any other producer of raw color frames.
///
/// `next_frame` returning `Ok(None)` means "nothing new since the last
/// call" and is not an error.
#[async_trait]
pub trait FrameSource: Send {
    /// Stable identifier, e.g. `"front_rgb"`.
    fn id(&self) -> &str;

    /// Acquire the underlying transport.
    ///
    /// # Errors
    ///
    /// [`CrawlerError::TransportUnavailable`] when the device or stream
    /// cannot be opened. Callers retry with backoff.
    async fn open(&mut self) -> Result<(), CrawlerError>;

    /// Read the next frame, if any.
    ///
    /// # Errors
    ///
    /// [`CrawlerError::TransportUnavailable`] when the transport dropped;
    /// the caller re-opens it.
    async fn next_frame(&mut self) -> Result<Option<ColorFrame>, CrawlerError>;

    /// Release the transport. Called once on shutdown.
    async fn close(&mut self) {}
}
